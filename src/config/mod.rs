//! Configuration management for wildgate
//!
//! Loads, validates, and saves the TOML configuration that drives the
//! discovery daemon: file locations, acquisition source selection, capture
//! command parameters, and the firewall table to keep in sync.

use crate::error::{Result, WildgateError};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,
    pub source: SourceConfig,
    pub capture: CaptureConfig,
    pub table: TableConfig,
    pub pipeline: PipelineConfig,
    pub scan: ScanConfig,
}

/// File locations for configuration and persisted state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Wildcard pattern list, one `*.domain` per non-comment line
    pub patterns_file: PathBuf,
    /// Persisted set of discovered domains, newline-delimited
    pub discovered_file: PathBuf,
    /// Tail read-offset state (log source only)
    pub offset_file: PathBuf,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
}

/// Which acquisition source feeds the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Supervised packet-capture subprocess
    Capture,
    /// Blocking tail of the resolver reply log
    Log,
}

/// Acquisition source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub mode: SourceMode,
    /// Resolver reply log watched in log mode
    pub resolver_log: PathBuf,
    /// Poll interval while the log has no new data, in milliseconds
    pub poll_interval_ms: u64,
}

/// Capture subprocess configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Capture binary, resolved via PATH when not absolute
    pub command: PathBuf,
    /// Interface to capture on; autodetected when unset
    pub interface: Option<String>,
    /// Packet snap length handed to the capture command
    pub snap_len: u32,
    /// Capture filter expression selecting DNS responses
    pub filter: String,
}

/// Firewall table configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Name of the firewall address table to synchronize
    pub name: String,
    /// Control binary used to mutate the table
    pub control_command: PathBuf,
    /// Timeout for each control call, in seconds
    pub timeout_secs: u64,
}

/// Discovery pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pattern reload interval, in seconds
    pub reload_interval_secs: u64,
    /// Line channel capacity between source task and pipeline
    pub channel_capacity: usize,
}

/// Batch rescan configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Per-domain resolution timeout, in seconds
    pub resolve_timeout_secs: u64,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(WildgateError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| WildgateError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| WildgateError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.table.name.is_empty()
            || !self
                .table
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(WildgateError::Config(format!(
                "Invalid table name '{}': expected [A-Za-z0-9_]+",
                self.table.name
            )));
        }
        if self.capture.snap_len == 0 {
            return Err(WildgateError::Config(
                "capture.snap_len must be non-zero".to_string(),
            ));
        }
        if self.pipeline.reload_interval_secs == 0 {
            return Err(WildgateError::Config(
                "pipeline.reload_interval_secs must be non-zero".to_string(),
            ));
        }
        if self.pipeline.channel_capacity == 0 {
            return Err(WildgateError::Config(
                "pipeline.channel_capacity must be non-zero".to_string(),
            ));
        }
        if self.source.poll_interval_ms == 0 {
            return Err(WildgateError::Config(
                "source.poll_interval_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| WildgateError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("wildgate").join("config.toml"))
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.wildgate");
        let config_dir = PathBuf::from("~/.config/wildgate");

        Self {
            paths: PathsConfig {
                patterns_file: config_dir.join("patterns.conf"),
                discovered_file: data_dir.join("discovered.txt"),
                offset_file: data_dir.join("tail_offset.json"),
                pid_file: data_dir.join("wildgate.pid"),
                log_file: data_dir.join("logs").join("wildgate.log"),
            },
            source: SourceConfig {
                mode: SourceMode::Capture,
                resolver_log: PathBuf::from("/var/log/resolver/dns_replies.log"),
                poll_interval_ms: 200,
            },
            capture: CaptureConfig {
                command: PathBuf::from("tcpdump"),
                interface: None,
                snap_len: 512,
                filter: "udp port 53 and src port 53".to_string(),
            },
            table: TableConfig {
                name: "wildgate_bypass".to_string(),
                control_command: PathBuf::from("pfctl"),
                timeout_secs: 5,
            },
            pipeline: PipelineConfig {
                reload_interval_secs: 60,
                channel_capacity: 1024,
            },
            scan: ScanConfig {
                resolve_timeout_secs: 5,
            },
        }
    }
}

/// Expand a leading tilde against the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if path.starts_with("~") {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix("~") {
                return home.join(stripped);
            }
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.table.name, "wildgate_bypass");
        assert_eq!(config.source.mode, SourceMode::Capture);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let config = Config::default();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.table.name, config.table.name);
        assert_eq!(loaded.capture.snap_len, config.capture.snap_len);
        assert_eq!(loaded.source.mode, config.source.mode);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.toml");

        assert!(matches!(
            Config::load(&path),
            Err(WildgateError::ConfigNotFound { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_table_name() {
        let mut config = Config::default();
        config.table.name = "bad name; rm -rf".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        let expanded = expand_tilde(Path::new("~/.wildgate"));
        assert_eq!(expanded, home.join(".wildgate"));

        let expanded = expand_tilde(Path::new("/var/db/wildgate"));
        assert_eq!(expanded, PathBuf::from("/var/db/wildgate"));
    }
}
