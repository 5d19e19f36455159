//! Configuration management for the warden proxy.
//!
//! The application's own settings (gateway bind address, hub tunables,
//! logging) live in a TOML file that is created with defaults on first
//! run. Backend registrations are deliberately not persisted here: they
//! are runtime operations through the gateway.

use control_plane::HubSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Application configuration loaded from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Gateway (WebSocket surface) settings
    pub gateway: GatewaySettings,
    /// Broadcast hub tunables
    #[serde(default)]
    pub hub: HubSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// Settings for the WebSocket surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Address the gateway listens on (e.g., "127.0.0.1:8765")
    pub bind_address: String,
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
            gateway: GatewaySettings {
                bind_address: "127.0.0.1:8765".to_string(),
            },
            hub: HubSettings::default(),
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
    /// If the file doesn't exist, writes a default configuration there
    /// and returns it.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self
            .gateway
            .bind_address
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(format!(
                "Invalid bind address: {}",
                &self.gateway.bind_address
            ));
        }

        if self.hub.queue_capacity == 0 {
            return Err("Hub queue capacity must be at least 1".to_string());
        }
        if self.hub.eviction_threshold == 0 {
            return Err("Hub eviction threshold must be at least 1".to_string());
        }

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
