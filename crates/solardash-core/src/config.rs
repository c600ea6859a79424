//! Dashboard configuration.
//!
//! Loaded from TOML; every section is optional and falls back to the values a
//! stock controller on the local network uses.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::coordinator::{HistorySettings, DEFAULT_PUSH_EVENT};
use crate::metrics::BatteryProfile;
use crate::push::ReconnectPolicy;
use crate::series::Bucketing;

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive form understood by `EnvFilter`.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DashboardConfig {
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    #[serde(default)]
    pub battery: BatteryProfile,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_push_path")]
    pub push_path: String,
    #[serde(default = "default_push_event")]
    pub push_event: String,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

fn default_base_url() -> String {
    "http://192.168.12.62:3000".to_string()
}

fn default_push_path() -> String {
    "/events".to_string()
}

fn default_push_event() -> String {
    DEFAULT_PUSH_EVENT.to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            push_path: default_push_path(),
            push_event: default_push_event(),
            request_timeout: default_request_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,
    #[serde(default)]
    pub bucketing: Bucketing,
}

fn default_window_hours() -> u32 {
    168
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            window_hours: default_window_hours(),
            bucketing: Bucketing::default(),
        }
    }
}

impl From<&HistoryConfig> for HistorySettings {
    fn from(config: &HistoryConfig) -> Self {
        HistorySettings {
            window_hours: config.window_hours,
            bucketing: config.bucketing,
        }
    }
}

impl DashboardConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_string_lossy().to_string()));
        }

        let contents =
            fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: DashboardConfig =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic checks beyond what deserialization enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base_url = self.device.base_url.trim();
        if base_url.is_empty() {
            return Err(invalid("device.base_url must not be empty"));
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(invalid("device.base_url must start with http:// or https://"));
        }
        if !self.device.push_path.starts_with('/') {
            return Err(invalid("device.push_path must start with '/'"));
        }
        if self.history.window_hours == 0 {
            return Err(invalid("history.window_hours must be positive"));
        }
        if !(self.battery.nominal_voltage.is_finite() && self.battery.nominal_voltage > 0.0) {
            return Err(invalid("battery.nominal_voltage must be positive"));
        }
        if !(self.battery.capacity_ah.is_finite() && self.battery.capacity_ah > 0.0) {
            return Err(invalid("battery.capacity_ah must be positive"));
        }
        if self.reconnect.max_backoff < self.reconnect.initial_backoff {
            return Err(invalid("reconnect.max_backoff must not be below initial_backoff"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::BatteryChemistry;
    use crate::push::ReconnectRule;

    #[test]
    fn empty_file_uses_defaults() {
        let config = DashboardConfig::from_toml_str("").unwrap();

        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.device.base_url, "http://192.168.12.62:3000");
        assert_eq!(config.device.push_event, "solar-data");
        assert_eq!(config.device.poll_interval, Duration::from_secs(5));
        assert_eq!(config.history.window_hours, 168);
        assert_eq!(config.history.bucketing, Bucketing::Hour);
        assert_eq!(config.reconnect, ReconnectPolicy::default());
    }

    #[test]
    fn full_file_is_parsed() {
        let config = DashboardConfig::from_toml_str(
            r#"
            log_level = "DEBUG"

            [device]
            base_url = "http://10.0.0.5:3000"
            request_timeout = "3s"
            poll_interval = "1m"

            [history]
            window_hours = 24
            bucketing = "day"

            [reconnect]
            on_transport_error = "never"
            max_attempts = 2

            [battery]
            nominal_voltage = 48.0
            chemistry = "Lithium"
            capacity_ah = 280.0
            shutoff_temperature = 50.0
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.device.base_url, "http://10.0.0.5:3000");
        assert_eq!(config.device.request_timeout, Duration::from_secs(3));
        assert_eq!(config.device.poll_interval, Duration::from_secs(60));
        assert_eq!(config.history.bucketing, Bucketing::Day);
        assert_eq!(config.reconnect.on_transport_error, ReconnectRule::Never);
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.battery.chemistry, BatteryChemistry::Lithium);
        assert_eq!(config.battery.capacity_ah, 280.0);
    }

    #[test]
    fn unknown_chemistry_string_is_not_an_error() {
        let config = DashboardConfig::from_toml_str("[battery]\nchemistry = \"gel\"\n").unwrap();
        assert_eq!(config.battery.chemistry, BatteryChemistry::Unknown);
    }

    #[test]
    fn validation_rejects_bad_values() {
        for toml_str in [
            "[device]\nbase_url = \"\"\n",
            "[device]\nbase_url = \"ftp://host\"\n",
            "[history]\nwindow_hours = 0\n",
            "[battery]\nnominal_voltage = 0.0\n",
            "[battery]\ncapacity_ah = -1.0\n",
            "[reconnect]\ninitial_backoff = \"10s\"\nmax_backoff = \"1s\"\n",
        ] {
            assert!(
                matches!(
                    DashboardConfig::from_toml_str(toml_str),
                    Err(ConfigError::ValidationError(_))
                ),
                "accepted {toml_str:?}"
            );
        }
    }

    #[test]
    fn missing_file_is_reported() {
        let result = DashboardConfig::from_file("/nonexistent/solardash.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }
}
