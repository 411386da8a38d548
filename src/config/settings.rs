//! Configuration settings for the message bus.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::NetError;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the TCP transport binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Listening port.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Server address to connect to.
    #[serde(default = "default_client_address")]
    pub address: String,
    /// Server port to connect to.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Limits and timing.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum frame size in bytes, header included.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Interval between pumps in milliseconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// How long shutdown waits for peers to disconnect.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format ("pretty" or "json").
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Trace every frame sent and received (hex dump).
    #[serde(default)]
    pub log_messages: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_client_address() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_max_frame_size() -> usize {
    16 * 1024
}

fn default_tick_interval() -> u64 {
    16
}

fn default_shutdown_grace() -> u64 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: default_client_address(),
            port: default_port(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            tick_interval_ms: default_tick_interval(),
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_messages: false,
        }
    }
}

impl LimitsConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

impl Settings {
    /// Load settings from a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, NetError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| NetError::Config {
            message: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;

        Self::from_toml(&content).map_err(|e| NetError::Config {
            message: format!("Invalid config file '{}': {}", path.display(), e),
        })
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, NetError> {
        let settings: Settings = toml::from_str(content).map_err(|e| NetError::Config {
            message: format!("Failed to parse config: {}", e),
        })?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate the settings.
    fn validate(&self) -> Result<(), NetError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(NetError::Config {
                message: format!(
                    "Invalid log level '{}'. Valid levels: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(NetError::Config {
                message: format!(
                    "Invalid log format '{}'. Valid formats: {:?}",
                    self.logging.format, valid_formats
                ),
            });
        }

        // A frame must at least hold the message type and one payload byte.
        if self.limits.max_frame_size < 3 {
            return Err(NetError::Config {
                message: format!(
                    "max_frame_size must be at least 3 bytes, got {}",
                    self.limits.max_frame_size
                ),
            });
        }

        if self.limits.tick_interval_ms == 0 {
            return Err(NetError::Config {
                message: "tick_interval_ms must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_values() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 5000);
        assert_eq!(settings.server.bind_address, "0.0.0.0");
        assert_eq!(settings.client.address, "localhost");
        assert_eq!(settings.limits.max_frame_size, 16384);
        assert_eq!(settings.limits.tick_interval(), Duration::from_millis(16));
        assert_eq!(settings.limits.shutdown_grace(), Duration::from_secs(1));
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.logging.log_messages);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings.server.port, 5000);
        assert_eq!(settings.logging.format, "pretty");
    }

    #[test]
    fn test_partial_sections() {
        let settings = Settings::from_toml(
            r#"
            [server]
            port = 7100

            [limits]
            tick_interval_ms = 33

            [logging]
            format = "json"
            log_messages = true
            "#,
        )
        .unwrap();

        assert_eq!(settings.server.port, 7100);
        assert_eq!(settings.server.bind_address, "0.0.0.0");
        assert_eq!(settings.limits.tick_interval_ms, 33);
        assert_eq!(settings.limits.max_frame_size, 16384);
        assert_eq!(settings.logging.format, "json");
        assert!(settings.logging.log_messages);
    }

    #[test]
    fn test_invalid_values_rejected() {
        for content in [
            "[logging]\nlevel = \"loud\"",
            "[logging]\nformat = \"xml\"",
            "[limits]\nmax_frame_size = 2",
            "[limits]\ntick_interval_ms = 0",
            "[server]\nport = \"five\"",
        ] {
            assert!(
                matches!(Settings::from_toml(content), Err(NetError::Config { .. })),
                "accepted: {}",
                content
            );
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[client]\naddress = \"10.0.0.5\"\nport = 6001").unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.client.address, "10.0.0.5");
        assert_eq!(settings.client.port, 6001);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Settings::load("/nonexistent/relaybus.toml");
        assert!(matches!(result, Err(NetError::Config { .. })));
    }
}
