//! Daemon configuration.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields a usable configuration.

use crate::identity::parse_mac;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Daemon configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub api: ApiConfig,
    pub auth: AuthConfig,
    pub transport: TransportConfig,
    pub storage: StorageConfig,
    pub device: DeviceConfig,
    pub poll: PollConfig,
    pub lights: LightsConfig,
    pub measurements: MeasurementsConfig,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, colored.
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// Overridden by `RUST_LOG` when set.
    pub level: String,
    pub format: LogFormat,
    pub timestamps: bool,
    /// Include the module target.
    pub target: bool,
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            timestamps: true,
            target: false,
            thread_names: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// `:authority` and certificate name. Defaults to `host`.
    pub authority: Option<String>,
    /// Largest gRPC response accepted, in bytes.
    pub response_capacity: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "api.ganymede.dev".to_string(),
            port: 443,
            authority: None,
            response_capacity: transport::DEFAULT_RESPONSE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct AuthConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub audience: String,
    pub scope: String,
    pub refresh_interval_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            host: "auth.ganymede.dev".to_string(),
            port: 443,
            client_id: String::new(),
            audience: "ganymede-api".to_string(),
            scope: "offline_access".to_string(),
            refresh_interval_secs: 3600,
        }
    }
}

impl AuthConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct TransportConfig {
    pub connect_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub perform_timeout_ms: u64,
    /// PEM bundle replacing the built-in web PKI roots.
    pub ca_file: Option<PathBuf>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            handshake_timeout_ms: 10_000,
            perform_timeout_ms: 5_000,
            ca_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/ganymede-device"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct DeviceConfig {
    /// `xx:xx:xx:xx:xx:xx`. Empty means the first non-loopback interface.
    pub mac: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct PollConfig {
    pub period_secs: u64,
    /// Server-provided periods shorter than this are ignored.
    pub min_period_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            period_secs: 3600,
            min_period_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct LightsConfig {
    pub tick_secs: u64,
}

impl Default for LightsConfig {
    fn default() -> Self {
        Self { tick_secs: 10 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct MeasurementsConfig {
    pub enabled: bool,
    /// Sensor sampling period.
    pub interval_secs: u64,
}

impl Default for MeasurementsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.api.host.is_empty() {
            return invalid("api.host must not be empty".into());
        }
        if self.auth.host.is_empty() {
            return invalid("auth.host must not be empty".into());
        }
        if !self.device.mac.is_empty() && parse_mac(&self.device.mac).is_none() {
            return invalid(format!(
                "device.mac {:?} is not of the form xx:xx:xx:xx:xx:xx",
                self.device.mac
            ));
        }
        if self.poll.min_period_secs == 0 {
            return invalid("poll.min_period_secs must be greater than 0".into());
        }
        if self.poll.period_secs == 0 {
            return invalid("poll.period_secs must be greater than 0".into());
        }
        if self.lights.tick_secs == 0 {
            return invalid("lights.tick_secs must be greater than 0".into());
        }
        if self.auth.refresh_interval_secs == 0 {
            return invalid("auth.refresh_interval_secs must be greater than 0".into());
        }
        if self.measurements.interval_secs == 0 {
            return invalid("measurements.interval_secs must be greater than 0".into());
        }
        if self.api.response_capacity < grpc::HEADER_SIZE {
            return invalid(format!(
                "api.response_capacity must be at least {} bytes",
                grpc::HEADER_SIZE
            ));
        }

        Ok(())
    }

    /// The default configuration as TOML.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

impl ApiConfig {
    pub fn authority(&self) -> &str {
        self.authority.as_deref().unwrap_or(&self.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.api.port, 443);
        assert_eq!(config.auth.refresh_interval_secs, 3600);
        assert_eq!(config.poll.period_secs, 3600);
        assert_eq!(config.poll.min_period_secs, 600);
        assert_eq!(config.lights.tick_secs, 10);
        assert_eq!(config.transport.handshake_timeout_ms, 10_000);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.api.authority(), config.api.host);
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
            [api]
            host = "127.0.0.1"
            authority = "localhost"

            [logging]
            format = "json"

            [device]
            mac = "AA:BB:CC:DD:EE:FF"
            "#,
        )
        .unwrap();
        assert_eq!(config.api.authority(), "localhost");
        assert_eq!(config.api.port, 443);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let error = Config::parse("[poll]\nperiod = 5\n").unwrap_err();
        assert!(matches!(error, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_mac_rejected() {
        let error = Config::parse("[device]\nmac = \"aa:bb:cc\"\n").unwrap_err();
        assert!(matches!(error, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_min_period_rejected() {
        let error = Config::parse("[poll]\nmin_period_secs = 0\n").unwrap_err();
        assert!(matches!(error, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_empty_host_rejected() {
        let error = Config::parse("[auth]\nhost = \"\"\n").unwrap_err();
        assert!(matches!(error, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_printed_config_loads() {
        let printed = Config::default().to_toml();
        let config = Config::parse(&printed).unwrap();
        assert_eq!(config.storage.path, Config::default().storage.path);
    }
}
