//! Daemon configuration.
//!
//! Loaded from `$XDG_CONFIG_HOME/tabtime/config.toml` unless a path is given.
//! Every field has a default, so an absent file or an empty table yields a
//! working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tabtime_core::DEFAULT_RETENTION_MONTHS;

use crate::server::DEFAULT_SOCKET_PATH;
use crate::tracker::TrackerSettings;

/// Environment variable that overrides the socket path.
pub const SOCKET_ENV_VAR: &str = "TABTIME_SOCKET";

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Validation(String),
}

/// Daemon settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Unix socket the daemon listens on
    pub socket_path: PathBuf,

    /// JSON file backing the key-value store
    pub data_path: PathBuf,

    /// Period of the buffer flush ticker
    pub flush_interval_secs: u64,

    /// Buffered time older than this is flushed when a session ends
    pub opportunistic_flush_secs: u64,

    /// Period of the focus probe
    pub focus_poll_secs: u64,

    /// Period of the retention sweeper
    pub cleanup_interval_hours: u64,

    /// Calendar months of day records to keep, the current month included
    pub retention_months: u32,

    /// Process whose absence means the browser is not in the foreground.
    ///
    /// Focus polling is off when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_process: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            data_path: default_data_path(),
            flush_interval_secs: 15,
            opportunistic_flush_secs: 5,
            focus_poll_secs: 10,
            cleanup_interval_hours: 6,
            retention_months: DEFAULT_RETENTION_MONTHS,
            host_process: None,
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or from the default location.
    ///
    /// A missing file at the default location yields defaults; an explicitly
    /// requested file must exist. The socket environment override is applied
    /// last.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        if let Ok(socket) = std::env::var(SOCKET_ENV_VAR) {
            if !socket.is_empty() {
                config.socket_path = PathBuf::from(socket);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file without validating it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or names an unknown field.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Checks the interval and retention constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("flush_interval_secs", self.flush_interval_secs),
            ("opportunistic_flush_secs", self.opportunistic_flush_secs),
            ("focus_poll_secs", self.focus_poll_secs),
            ("cleanup_interval_hours", self.cleanup_interval_hours),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{name} must be non-zero")));
            }
        }

        if self.opportunistic_flush_secs >= self.flush_interval_secs {
            return Err(ConfigError::Validation(format!(
                "opportunistic_flush_secs ({}) must be lower than flush_interval_secs ({})",
                self.opportunistic_flush_secs, self.flush_interval_secs
            )));
        }

        if self.retention_months == 0 {
            return Err(ConfigError::Validation(
                "retention_months must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Flush timing for the tracker.
    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            flush_interval: Duration::from_secs(self.flush_interval_secs),
            opportunistic_flush: Duration::from_secs(self.opportunistic_flush_secs),
        }
    }

    pub fn focus_poll_interval(&self) -> Duration {
        Duration::from_secs(self.focus_poll_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_hours.saturating_mul(3600))
    }
}

/// `$XDG_CONFIG_HOME/tabtime/config.toml`, if a config directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tabtime").join("config.toml"))
}

fn default_data_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("tabtime")
        .join("store.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/tabtime.sock"));
        assert!(config.data_path.ends_with("tabtime/store.json"));
        assert_eq!(config.flush_interval_secs, 15);
        assert_eq!(config.opportunistic_flush_secs, 5);
        assert_eq!(config.focus_poll_secs, 10);
        assert_eq!(config.cleanup_interval_hours, 6);
        assert_eq!(config.retention_months, 3);
        assert!(config.host_process.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            flush_interval_secs = 30
            host_process = "firefox"
            "#,
        )
        .unwrap();

        assert_eq!(config.flush_interval_secs, 30);
        assert_eq!(config.host_process.as_deref(), Some("firefox"));
        assert_eq!(config.opportunistic_flush_secs, 5);
        assert_eq!(config.retention_months, 3);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = Config::from_toml("flush_every = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = Config {
            focus_poll_secs: 0,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("focus_poll_secs"));
    }

    #[test]
    fn test_opportunistic_must_be_below_flush_interval() {
        let config = Config {
            flush_interval_secs: 5,
            opportunistic_flush_secs: 5,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_zero_retention_rejected() {
        let config = Config {
            retention_months: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "retention_months = 6").unwrap();
        writeln!(file, "data_path = \"/var/lib/tabtime/store.json\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.retention_months, 6);
        assert_eq!(config.data_path, PathBuf::from("/var/lib/tabtime/store.json"));
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_durations() {
        let config = Config::default();
        let settings = config.tracker_settings();
        assert_eq!(settings.flush_interval, Duration::from_secs(15));
        assert_eq!(settings.opportunistic_flush, Duration::from_secs(5));
        assert_eq!(config.focus_poll_interval(), Duration::from_secs(10));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(6 * 3600));
    }
}
