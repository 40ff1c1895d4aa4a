//! Configuration for elohim-link

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::link::{SessionOptions, DEFAULT_LINK_PORT};

/// Default config file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("elohim-link")
        .join("config.toml")
}

/// Configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Link name used in logs and error events
    #[serde(default = "default_name")]
    pub name: String,

    /// Remote host: address or name
    #[serde(default = "default_host")]
    pub host: String,

    /// Remote port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bound on a single connect attempt
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Interval for throughput log lines (0 = off)
    #[serde(default = "default_rate_log_interval")]
    pub rate_log_interval_secs: u64,

    /// Log a hex/ascii dump of every write
    #[serde(default)]
    pub dump_writes: bool,
}

fn default_name() -> String {
    "link".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_LINK_PORT
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_rate_log_interval() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            rate_log_interval_secs: default_rate_log_interval(),
            dump_writes: false,
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Session options derived from this config
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            dump_writes: self.dump_writes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, DEFAULT_LINK_PORT);
        assert_eq!(config.connect_timeout_ms, 1000);
        assert!(!config.dump_writes);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("host = \"broker.local\"\nport = 8883\n").unwrap();
        assert_eq!(config.host, "broker.local");
        assert_eq!(config.port, 8883);
        assert_eq!(config.name, "link");
        assert_eq!(config.rate_log_interval_secs, 10);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config {
            name: "telemetry".into(),
            port: 5760,
            dump_writes: true,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load(dir.path().join("absent.toml")).is_err());
    }

    #[test]
    fn test_session_options() {
        let config = Config {
            connect_timeout_ms: 250,
            ..Default::default()
        };
        let options = config.session_options();
        assert_eq!(options.connect_timeout, Duration::from_millis(250));
    }
}
