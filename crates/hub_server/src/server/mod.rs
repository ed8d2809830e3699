//! Server coordinator module.

pub mod core;

pub use core::Server;
