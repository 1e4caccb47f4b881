//! Configuration loading for the recon scan platform.
//!
//! Defaults live in code; an optional TOML file overrides them, and
//! `RECON_*` environment variables override both. A `.env` file is
//! honored via dotenvy before the environment is read.
#![allow(missing_docs)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Failures while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8700)),
        }
    }
}

/// Scan engine tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScannerConfig {
    /// Retained jobs; eviction only removes terminal jobs.
    pub history_capacity: usize,
    /// Replay-ring capacity of each job's event broker.
    pub event_history_capacity: usize,
    /// Per-subscriber broadcast queue capacity.
    pub broadcast_capacity: usize,
    /// Cadence of stats events while a stage runs.
    #[serde(deserialize_with = "de_duration")]
    pub stats_interval: Duration,
    /// Hard ceiling on a single stage's runtime.
    #[serde(deserialize_with = "de_duration")]
    pub tool_timeout: Duration,
    /// Newest log lines retained on a job record.
    pub max_log_lines: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            history_capacity: 64,
            event_history_capacity: 512,
            broadcast_capacity: 512,
            stats_interval: Duration::from_secs(1),
            tool_timeout: Duration::from_secs(600),
            max_log_lines: 5000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub scanner: ScannerConfig,
}

impl Config {
    /// Load configuration: defaults, then the optional TOML file, then
    /// `RECON_*` environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `RECON_*` overrides from an environment-shaped iterator.
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "RECON_BIND" => {
                    self.server.bind = value.parse().map_err(|_| invalid(&key, &value))?;
                }
                "RECON_HISTORY_CAPACITY" => {
                    self.scanner.history_capacity =
                        value.parse().map_err(|_| invalid(&key, &value))?;
                }
                "RECON_EVENT_HISTORY_CAPACITY" => {
                    self.scanner.event_history_capacity =
                        value.parse().map_err(|_| invalid(&key, &value))?;
                }
                "RECON_BROADCAST_CAPACITY" => {
                    self.scanner.broadcast_capacity =
                        value.parse().map_err(|_| invalid(&key, &value))?;
                }
                "RECON_STATS_INTERVAL" => {
                    self.scanner.stats_interval = humantime::parse_duration(&value)
                        .map_err(|_| invalid(&key, &value))?;
                }
                "RECON_TOOL_TIMEOUT" => {
                    self.scanner.tool_timeout = humantime::parse_duration(&value)
                        .map_err(|_| invalid(&key, &value))?;
                }
                "RECON_MAX_LOG_LINES" => {
                    self.scanner.max_log_lines =
                        value.parse().map_err(|_| invalid(&key, &value))?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scanner.history_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "scanner.history_capacity".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.scanner.stats_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "scanner.stats_interval".into(),
                reason: "must be non-zero".into(),
            });
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("could not parse {value:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.bind.port(), 8700);
        assert_eq!(config.scanner.history_capacity, 64);
        assert_eq!(config.scanner.stats_interval, Duration::from_secs(1));
        config.validate().expect("defaults validate");
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
bind = "0.0.0.0:9000"

[scanner]
history_capacity = 8
stats_interval = "250ms"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).expect("parse config");
        assert_eq!(config.server.bind.port(), 9000);
        assert_eq!(config.scanner.history_capacity, 8);
        assert_eq!(config.scanner.stats_interval, Duration::from_millis(250));
        // untouched fields keep their defaults
        assert_eq!(config.scanner.max_log_lines, 5000);
    }

    #[test]
    fn env_overrides_win() {
        let mut config = Config::default();
        config
            .apply_overrides(vec![
                ("RECON_BIND".to_string(), "127.0.0.1:1234".to_string()),
                ("RECON_TOOL_TIMEOUT".to_string(), "5m".to_string()),
                ("UNRELATED".to_string(), "ignored".to_string()),
            ])
            .expect("apply overrides");
        assert_eq!(config.server.bind.port(), 1234);
        assert_eq!(config.scanner.tool_timeout, Duration::from_secs(300));
    }

    #[test]
    fn malformed_override_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(vec![(
                "RECON_HISTORY_CAPACITY".to_string(),
                "lots".to_string(),
            )])
            .expect_err("bad value must be rejected");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn zero_history_capacity_fails_validation() {
        let mut config = Config::default();
        config.scanner.history_capacity = 0;
        assert!(config.validate().is_err());
    }
}
