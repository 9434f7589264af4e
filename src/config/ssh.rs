// ABOUTME: The `ssh` section of gangway.yml.
// ABOUTME: Converts into the client configuration used by every forked invocation.

use crate::ssh::{ClientConfig, HostKeyPolicy};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshConfig {
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    #[serde(default)]
    pub host_key_checking: HostKeyPolicy,

    #[serde(default)]
    pub known_hosts_file: Option<PathBuf>,

    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,

    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    #[serde(default)]
    pub max_concurrent_execs: Option<usize>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            host_key_checking: HostKeyPolicy::default(),
            known_hosts_file: None,
            command_timeout: default_command_timeout(),
            temp_dir: None,
            max_concurrent_execs: None,
        }
    }
}

fn default_binary() -> PathBuf {
    PathBuf::from("ssh")
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(300)
}

impl SshConfig {
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new()
            .binary(&self.binary)
            .host_key_policy(self.host_key_checking)
            .command_timeout(self.command_timeout);
        if let Some(path) = &self.known_hosts_file {
            config = config.known_hosts_file(path);
        }
        if let Some(path) = &self.temp_dir {
            config = config.temp_dir(path);
        }
        if let Some(limit) = self.max_concurrent_execs {
            config = config.max_concurrent_execs(limit);
        }
        config
    }
}
