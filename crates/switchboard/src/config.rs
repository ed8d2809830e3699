//! Configuration management for the Switchboard messaging server.
//!
//! This module handles loading, validation, and conversion of server
//! configuration from TOML files and command-line arguments.

use crate::session::LineSessionClass;
use hub_server::{ServerConfig, StaticChannel, StaticChannelSource};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Default worker pool size for serde deserialization
fn default_worker_pool_size() -> usize {
    4
}

/// Default heartbeat interval in milliseconds
fn default_heartbeat_interval_ms() -> u64 {
    3000
}

/// Default channel set served by a fresh installation
fn default_channel_names() -> Vec<String> {
    vec!["chat".to_string(), "notifications".to_string()]
}

/// Application configuration loaded from TOML file.
///
/// This is the main configuration structure that encompasses all server
/// settings including networking, channels, and logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration settings
    pub server: ServerSettings,
    /// Channel configuration settings
    pub channels: ChannelSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// Server-specific configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "127.0.0.1:8080")
    pub bind_address: String,
    /// Number of worker tasks executing connection callbacks
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Interval between heartbeat pings, in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

/// Channel registry configuration.
///
/// Every listed name is resolved at startup; an unknown name fails the
/// first channel lookup rather than the boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Names of the channels clients may subscribe to
    #[serde(default = "default_channel_names")]
    pub names: Vec<String>,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "127.0.0.1:8080".to_string(),
                worker_pool_size: default_worker_pool_size(),
                heartbeat_interval_ms: default_heartbeat_interval_ms(),
            },
            channels: ChannelSettings {
                names: default_channel_names(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at
    /// the specified path and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded or default configuration, or an error if loading or
    /// creation failed.
    pub async fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create default config file
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the application configuration to a coordinator configuration.
    ///
    /// Wires the line-protocol connection class, a static channel source
    /// covering every configured channel name, and the in-process pub/sub
    /// adapter.
    ///
    /// # Returns
    ///
    /// A `ServerConfig` instance ready for use with the coordinator.
    pub fn to_server_config(&self) -> ServerConfig {
        let mut source = StaticChannelSource::new();
        for name in &self.channels.names {
            source = source.register(Arc::new(StaticChannel::new(name.clone())));
        }

        let mut config = ServerConfig::new(Arc::new(LineSessionClass));
        config.worker_pool_size = self.server.worker_pool_size;
        config.heartbeat_interval = Duration::from_millis(self.server.heartbeat_interval_ms);
        config.channel_names = self.channels.names.clone();
        config.channel_source = Arc::new(source);
        config
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string
    /// describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        // Validate bind address
        if self
            .server
            .bind_address
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(format!(
                "Invalid bind address: {}",
                &self.server.bind_address
            ));
        }

        // Validate worker pool size
        if self.server.worker_pool_size == 0 {
            return Err("Worker pool size must be at least 1".to_string());
        }

        // Validate heartbeat interval
        if self.server.heartbeat_interval_ms == 0 {
            return Err("Heartbeat interval must be at least 1ms".to_string());
        }

        // Validate channel names
        if self.channels.names.iter().any(|name| name.is_empty()) {
            return Err("Channel names cannot be empty".to_string());
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use tokio::fs;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.server.bind_address, "127.0.0.1:8080");
        assert_eq!(config.server.worker_pool_size, 4);
        assert_eq!(config.server.heartbeat_interval_ms, 3000);
        assert_eq!(config.channels.names, vec!["chat", "notifications"]);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[server]
bind_address = "0.0.0.0:3000"
worker_pool_size = 8
heartbeat_interval_ms = 1500

[channels]
names = ["chat", "presence"]

[logging]
level = "debug"
json_format = true
"#;

        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(&temp_file.path().to_path_buf())
            .await
            .unwrap();

        assert_eq!(config.server.bind_address, "0.0.0.0:3000");
        assert_eq!(config.server.worker_pool_size, 8);
        assert_eq!(config.server.heartbeat_interval_ms, 1500);
        assert_eq!(config.channels.names, vec!["chat", "presence"]);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
    }

    #[tokio::test]
    async fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();

        assert_eq!(config.server.bind_address, "127.0.0.1:8080");
        assert!(path.exists());
    }

    #[test]
    fn test_serde_deserialization_with_defaults() {
        let toml_content = r#"
[server]
bind_address = "127.0.0.1:8080"

[channels]

[logging]
level = "info"
json_format = false
"#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();

        // Missing fields fall back to defaults
        assert_eq!(config.server.worker_pool_size, 4);
        assert_eq!(config.server.heartbeat_interval_ms, 3000);
        assert_eq!(config.channels.names, vec!["chat", "notifications"]);
    }

    #[test]
    fn test_validation_invalid_bind_address() {
        let mut config = AppConfig::default();
        config.server.bind_address = "invalid_address".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Invalid bind address"));
    }

    #[test]
    fn test_validation_zero_workers() {
        let mut config = AppConfig::default();
        config.server.worker_pool_size = 0;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Worker pool size"));
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = AppConfig::default();
        config.logging.level = "invalid_level".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Invalid log level"));
    }

    #[test]
    fn test_validation_empty_channel_name() {
        let mut config = AppConfig::default();
        config.channels.names.push(String::new());

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Channel names"));
    }

    #[test]
    fn test_to_server_config_conversion() {
        let mut config = AppConfig::default();
        config.server.worker_pool_size = 6;
        config.server.heartbeat_interval_ms = 500;
        config.channels.names = vec!["chat".to_string()];

        let server_config = config.to_server_config();
        assert_eq!(server_config.worker_pool_size, 6);
        assert_eq!(server_config.heartbeat_interval, Duration::from_millis(500));
        assert_eq!(server_config.channel_names, vec!["chat"]);
    }
}
