// ABOUTME: Configuration types and parsing for gangway.yml.
// ABOUTME: Handles YAML parsing, file discovery, validation, and environment overrides.

mod ssh;

pub use ssh::SshConfig;

use crate::error::{Error, Result};
use crate::session::AccessLogFormat;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "gangway.yml";
pub const CONFIG_FILENAME_ALT: &str = "gangway.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".gangway/config.yml";

/// Overrides `ssh.binary` when set and non-empty.
pub const SSH_BINARY_ENV: &str = "GANGWAY_SSH_BINARY";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub ssh: SshConfig,

    #[serde(default)]
    pub tunnels: TunnelConfig,

    #[serde(default)]
    pub access_log: AccessLogConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunnelConfig {
    #[serde(default)]
    pub max_tunnels: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessLogConfig {
    #[serde(default)]
    pub format: AccessLogFormat,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty document deserializes as unit, not as an empty map.
        let config: Config = if yaml.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                tracing::debug!("Loading configuration from {}", path.display());
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Apply environment variable overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(binary) = std::env::var_os(SSH_BINARY_ENV).filter(|v| !v.is_empty()) {
            tracing::debug!("{} overrides ssh binary", SSH_BINARY_ENV);
            self.ssh.binary = PathBuf::from(binary);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.ssh.binary.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("ssh.binary cannot be empty".to_string()));
        }
        if self.ssh.command_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "ssh.command_timeout must be greater than zero".to_string(),
            ));
        }
        if self.ssh.max_concurrent_execs == Some(0) {
            return Err(Error::InvalidConfig(
                "ssh.max_concurrent_execs must be at least 1".to_string(),
            ));
        }
        if self.tunnels.max_tunnels == Some(0) {
            return Err(Error::InvalidConfig(
                "tunnels.max_tunnels must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
