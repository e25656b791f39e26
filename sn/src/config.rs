//! Sensornet configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::channel::memory::DEFAULT_MAX_PENDING;
use crate::controller::registry::{DEFAULT_CAPACITY, MAX_CAPACITY};

/// Main Sensornet configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Message channel configuration
    pub channel: ChannelConfig,

    /// External peer configuration
    pub peer: PeerConfig,

    /// Controller configuration
    pub controller: ControllerConfig,

    /// Sensor and actuator configuration
    pub devices: DevicesConfig,

    /// Log level used when none is given on the command line
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.controller.registry_capacity == 0 {
            return Err(eyre::eyre!("controller.registry-capacity must be at least 1"));
        }
        if self.controller.registry_capacity > MAX_CAPACITY {
            return Err(eyre::eyre!(
                "controller.registry-capacity must not exceed {} (got {})",
                MAX_CAPACITY,
                self.controller.registry_capacity
            ));
        }
        if self.channel.max_pending == 0 {
            return Err(eyre::eyre!("channel.max-pending must be at least 1"));
        }
        if self.channel.poll_interval_ms == 0 {
            return Err(eyre::eyre!("channel.poll-interval-ms must be greater than 0"));
        }
        if self.controller.relay_poll_interval_ms == 0 {
            return Err(eyre::eyre!("controller.relay-poll-interval-ms must be greater than 0"));
        }
        if self.devices.report_interval_ms == 0 {
            return Err(eyre::eyre!("devices.report-interval-ms must be greater than 0"));
        }
        if let Some(level) = &self.log_level {
            level
                .parse::<tracing::Level>()
                .map_err(|_| eyre::eyre!("log-level '{}' is not a valid level", level))?;
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .sensornet.yml
        let local_config = PathBuf::from(".sensornet.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/sensornet/sensornet.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("sensornet").join("sensornet.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Message channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Socket the controller serves the channel on
    #[serde(rename = "socket-path")]
    pub socket_path: Option<PathBuf>,

    /// Pause after an empty receive, in milliseconds
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Messages kept queued per recipient before the oldest is dropped
    #[serde(rename = "max-pending")]
    pub max_pending: usize,
}

impl ChannelConfig {
    /// Configured socket path, or the well-known one
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(crate::channel::get_socket_path)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            poll_interval_ms: 50,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

/// External peer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Socket the cloud serves and the relay bridge connects to
    #[serde(rename = "socket-path")]
    pub socket_path: Option<PathBuf>,
}

impl PeerConfig {
    /// Configured socket path, or the well-known one
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(crate::relay::get_peer_socket_path)
    }
}

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Maximum number of registered devices
    #[serde(rename = "registry-capacity")]
    pub registry_capacity: usize,

    /// Relay bridge idle pause, in milliseconds
    #[serde(rename = "relay-poll-interval-ms")]
    pub relay_poll_interval_ms: u64,
}

impl ControllerConfig {
    pub fn relay_poll_interval(&self) -> Duration {
        Duration::from_millis(self.relay_poll_interval_ms)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            registry_capacity: DEFAULT_CAPACITY,
            relay_poll_interval_ms: 50,
        }
    }
}

/// Sensor and actuator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    /// How often a sensor reports a reading, in milliseconds
    #[serde(rename = "report-interval-ms")]
    pub report_interval_ms: u64,
}

impl DevicesConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            report_interval_ms: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.controller.registry_capacity, DEFAULT_CAPACITY);
        assert_eq!(config.devices.report_interval_ms, 1000);
        assert!(config.channel.socket_path.is_none());
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
channel:
  socket-path: /tmp/sn/channel.sock
  poll-interval-ms: 10
  max-pending: 32

peer:
  socket-path: /tmp/sn/cloud.sock

controller:
  registry-capacity: 8
  relay-poll-interval-ms: 20

devices:
  report-interval-ms: 250

log-level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.channel.socket_path(), PathBuf::from("/tmp/sn/channel.sock"));
        assert_eq!(config.channel.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.channel.max_pending, 32);
        assert_eq!(config.peer.socket_path(), PathBuf::from("/tmp/sn/cloud.sock"));
        assert_eq!(config.controller.registry_capacity, 8);
        assert_eq!(config.controller.relay_poll_interval(), Duration::from_millis(20));
        assert_eq!(config.devices.report_interval(), Duration::from_millis(250));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
controller:
  registry-capacity: 3
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.controller.registry_capacity, 3);
        assert_eq!(config.controller.relay_poll_interval_ms, 50);
        assert_eq!(config.channel.poll_interval_ms, 50);
        assert!(config.channel.socket_path().ends_with("sensornet/channel.sock"));
        assert!(config.peer.socket_path().ends_with("sensornet/cloud.sock"));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = Config::default();
        config.controller.registry_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_capacity() {
        let yaml = "controller:\n  registry-capacity: 18446744073709551615\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let error = config.validate().unwrap_err().to_string();
        assert!(error.contains("registry-capacity must not exceed"));

        let mut config = Config::default();
        config.controller.registry_capacity = MAX_CAPACITY;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_max_pending() {
        let mut config = Config::default();
        config.channel.max_pending = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let mut config = Config::default();
        config.devices.report_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.channel.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let config = Config {
            log_level: Some("loud".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sensornet.yml");
        fs::write(&path, "devices:\n  report-interval-ms: 5\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.devices.report_interval_ms, 5);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.yml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
