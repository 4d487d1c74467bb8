// ABOUTME: Host inventory parsing for tether.yml.
// ABOUTME: Resolves a host name or inline address into a ready-to-use SessionConfig.

mod deserialize;
mod env_value;
mod server;

pub use env_value::SecretValue;
pub use server::HostConfig;

use crate::error::{Error, Result};
use crate::ssh::SessionConfig;
use deserialize::deserialize_hosts;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "tether.yml";
pub const CONFIG_FILENAME_ALT: &str = "tether.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".tether/config.yml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default, deserialize_with = "deserialize_hosts")]
    pub hosts: BTreeMap<String, HostConfig>,
}

/// Settings applied to every host unless the host overrides them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub auto_trust: bool,

    #[serde(default)]
    pub known_hosts: Option<PathBuf>,

    #[serde(default)]
    pub identity: Option<PathBuf>,

    #[serde(default, with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,

    #[serde(default, with = "humantime_serde")]
    pub command_timeout: Option<Duration>,

    #[serde(default)]
    pub max_auth_rounds: Option<u32>,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Look up a named host.
    pub fn host(&self, name: &str) -> Result<&HostConfig> {
        self.hosts
            .get(name)
            .ok_or_else(|| Error::UnknownHost(name.to_string()))
    }

    /// A named host from the inventory, or else an inline `[user@]host[:port]` target.
    ///
    /// A bare word that is not in the inventory is only treated as a hostname when the
    /// inventory is empty, so a typo in a host name fails loudly.
    pub fn resolve(&self, target: &str) -> Result<HostConfig> {
        if let Some(host) = self.hosts.get(target) {
            return Ok(host.clone());
        }
        let inline = target.contains('@') || target.contains(':');
        if !inline && !self.hosts.is_empty() {
            return Err(Error::UnknownHost(target.to_string()));
        }
        HostConfig::parse(target).map_err(Error::InvalidConfig)
    }

    /// Build the session configuration for `host`, filling gaps from `defaults`.
    ///
    /// The user falls back to `$USER` when neither the host nor the defaults name one.
    pub fn session_config(&self, host: &HostConfig) -> Result<SessionConfig> {
        let defaults = &self.defaults;
        let user = host
            .user
            .clone()
            .or_else(|| defaults.user.clone())
            .or_else(|| std::env::var("USER").ok())
            .ok_or_else(|| {
                Error::InvalidConfig(format!("no user configured for {}", host.host))
            })?;

        let mut config = SessionConfig::new(&host.host, user)
            .port(host.port.or(defaults.port).unwrap_or(22))
            .auto_trust(host.auto_trust.unwrap_or(defaults.auto_trust));

        if let Some(password) = &host.password {
            config.password = Some(password.resolve()?);
        }
        if let Some(identity) = host.identity.as_ref().or(defaults.identity.as_ref()) {
            config = config.identity(identity);
        }
        if let Some(path) = &defaults.known_hosts {
            config = config.known_hosts_path(path);
        }
        if let Some(timeout) = defaults.connect_timeout {
            config = config.connect_timeout(timeout);
        }
        if let Some(timeout) = defaults.command_timeout {
            config = config.command_timeout(timeout);
        }
        if let Some(rounds) = defaults.max_auth_rounds {
            config = config.max_auth_rounds(rounds);
        }
        Ok(config)
    }
}
