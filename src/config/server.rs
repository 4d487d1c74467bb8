// ABOUTME: Per-host connection settings from the inventory or the command line.
// ABOUTME: Parses formats like "host", "user@host", "host:port", "user@host:port".

use super::SecretValue;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<SecretValue>,
    #[serde(default)]
    pub identity: Option<PathBuf>,
    #[serde(default)]
    pub auto_trust: Option<bool>,
}

impl HostConfig {
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("host address cannot be empty".to_string());
        }

        // Parse format: [user@]host[:port]
        let (user_part, rest) = match s.rsplit_once('@') {
            Some((user, rest)) if user.is_empty() => {
                return Err(format!("empty user name in {rest:?}"));
            }
            Some((user, rest)) => (Some(user), rest),
            None => (None, s),
        };

        let (host, port) = if let Some(colon_pos) = rest.rfind(':') {
            let port_str = &rest[colon_pos + 1..];
            let port = port_str
                .parse::<u16>()
                .map_err(|_| format!("invalid port: {}", port_str))?;
            (&rest[..colon_pos], Some(port))
        } else {
            (rest, None)
        };

        if host.is_empty() {
            return Err("hostname cannot be empty".to_string());
        }

        Ok(HostConfig {
            host: host.to_string(),
            port,
            user: user_part.map(|s| s.to_string()),
            password: None,
            identity: None,
            auto_trust: None,
        })
    }
}
