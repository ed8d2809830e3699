//! Main application entry point for the Switchboard messaging server.
//!
//! Provides CLI interface, configuration loading, and server startup
//! around the coordinator in the `hub_server` crate.

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use hub_server::Server;

mod cli;
mod config;
mod listener;
mod logging;
mod session;
mod signals;

use cli::CliArgs;
use config::AppConfig;

/// Main application struct wiring configuration, coordinator, and the
/// TCP front-end together.
pub struct Application {
    config: AppConfig,
    server: Arc<Server>,
}

impl Application {
    /// Creates the application from parsed CLI arguments.
    ///
    /// Loads the configuration file (creating a default one if missing),
    /// applies CLI overrides, validates the result, and initializes
    /// logging before constructing the coordinator.
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        // Apply CLI overrides
        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }
        if let Some(workers) = args.workers {
            config.server.worker_pool_size = workers;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Err(e) = config.validate() {
            anyhow::bail!("Configuration validation failed: {e}");
        }

        logging::setup_logging(&config.logging.level, config.logging.json_format)?;

        let server = Server::new(config.to_server_config());

        info!("🚀 Switchboard v{}", env!("CARGO_PKG_VERSION"));
        info!(
            "📂 Config: {} | Channels: {}",
            args.config_path.display(),
            config.channels.names.join(", ")
        );

        Ok(Self { config, server })
    }

    /// Runs the server until a shutdown signal arrives.
    pub async fn run(self) -> anyhow::Result<()> {
        let bind_address: SocketAddr = self
            .config
            .server
            .bind_address
            .parse()
            .context("invalid bind address")?;

        // Resolve channels up front so a misconfigured name surfaces at
        // boot instead of on the first subscription
        let channels = self.server.channels().await?;
        info!("📋 Channels resolved: {:?}", channels.names());
        info!(
            "🧵 Worker pool size: {} | 💓 Heartbeat: {}ms",
            self.config.server.worker_pool_size, self.config.server.heartbeat_interval_ms
        );

        let listener_handle = {
            let server = Arc::clone(&self.server);
            tokio::spawn(async move {
                if let Err(e) = listener::run(server, bind_address).await {
                    error!("❌ Listener error: {}", e);
                    std::process::exit(1);
                }
            })
        };

        info!("✅ Switchboard is now running on {}", bind_address);
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        signals::wait_for_shutdown().await?;

        info!("🛑 Shutdown signal received, closing connections...");
        listener_handle.abort();
        self.server.restart().await;
        info!("✅ Switchboard shutdown complete");

        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}
