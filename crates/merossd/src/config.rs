//! Configuration file parsing and structures.
//!
//! merossd uses TOML for declarative configuration. The Meross cloud
//! integration and the HTTP API are both optional tables; the daemon runs
//! with whichever are present.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

use crate::integrations::meross::HardwareVariant;

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub integrations: IntegrationsConfig,
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target level overrides, e.g. `rumqttc = "warn"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Build the subscriber filter: the global level plus per-target overrides
    pub fn filter(&self) -> Targets {
        let mut targets = Targets::new().with_default(LevelFilter::from(self.level));
        for (target, level) in &self.overrides {
            targets = targets.with_target(target.clone(), LevelFilter::from(*level));
        }
        targets
    }
}

/// Integration configuration container
#[derive(Debug, Deserialize)]
pub struct IntegrationsConfig {
    /// Meross cloud integration
    #[serde(default)]
    pub meross: Option<MerossConfig>,

    /// HTTP API
    #[serde(default)]
    pub api: Option<ApiConfig>,
}

/// Meross cloud integration configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MerossConfig {
    /// Vendor MQTT broker hostname
    pub broker: String,
    pub port: u16,

    /// MQTT client identifier, must be unique per cloud account session
    pub client_id: String,

    /// Cloud account user id
    pub user_id: String,

    /// Cloud account signing key
    pub key: String,

    /// Seconds between full status polls of every valve
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Valve subdevices to expose as climate entities
    #[serde(default)]
    pub devices: Vec<ValveDeviceConfig>,
}

fn default_poll_interval_secs() -> u64 {
    300
}

/// One valve subdevice behind a hub
#[derive(Debug, Clone, Deserialize)]
pub struct ValveDeviceConfig {
    /// Hub appliance UUID
    pub uuid: String,

    /// Subdevice id of the valve on that hub
    pub subdevice_id: String,

    /// Human-readable name
    pub name: String,

    /// Hardware variant: "mts100" or "mts100v3"
    pub model: HardwareVariant,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,
    pub listen: String,
    pub port: u16,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        toml::from_str(&contents).map_err(ConfigError::Parse)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [logging]
            level = "debug"

            [integrations]
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert!(config.integrations.meross.is_none());
        assert!(config.integrations.api.is_none());
    }

    #[test]
    fn test_parse_meross_integration() {
        let toml = r#"
            [integrations.meross]
            broker = "mqtt-eu.meross.com"
            port = 443
            client_id = "app:merossd"
            user_id = "123456"
            key = "secret"

            [[integrations.meross.devices]]
            uuid = "1812019999"
            subdevice_id = "0000111122"
            name = "Bedroom valve"
            model = "mts100v3"

            [[integrations.meross.devices]]
            uuid = "1812019999"
            subdevice_id = "0000333344"
            name = "Hallway valve"
            model = "mts100"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        let meross = config.integrations.meross.unwrap();
        assert_eq!(meross.broker, "mqtt-eu.meross.com");
        assert_eq!(meross.poll_interval_secs, 300); // default
        assert_eq!(meross.devices.len(), 2);
        assert_eq!(meross.devices[0].model, HardwareVariant::Mts100V3);
        assert_eq!(meross.devices[1].model, HardwareVariant::Mts100);
    }

    #[test]
    fn test_logging_overrides_feed_filter() {
        let toml = r#"
            [logging]
            level = "info"

            [logging.overrides]
            rumqttc = "warn"

            [integrations]
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        let filter = config.logging.filter();
        assert!(filter.would_enable("merossd", &tracing::Level::INFO));
        assert!(!filter.would_enable("rumqttc", &tracing::Level::INFO));
        assert!(filter.would_enable("rumqttc", &tracing::Level::WARN));
    }

    #[test]
    fn test_unknown_model_rejected() {
        let toml = r#"
            [integrations.meross]
            broker = "mqtt-eu.meross.com"
            port = 443
            client_id = "app:merossd"
            user_id = "123456"
            key = "secret"

            [[integrations.meross.devices]]
            uuid = "1812019999"
            subdevice_id = "0000111122"
            name = "Bedroom valve"
            model = "mts200"
        "#;

        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merossd.toml");
        std::fs::write(
            &path,
            r#"
            [integrations]

            [integrations.api]
            enabled = true
            listen = "127.0.0.1"
            port = 8565
        "#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        let api = config.integrations.api.unwrap();
        assert!(api.enabled);
        assert_eq!(api.port, 8565);

        assert!(matches!(
            Config::from_file(dir.path().join("missing.toml")),
            Err(ConfigError::Io(_, _))
        ));
    }
}
