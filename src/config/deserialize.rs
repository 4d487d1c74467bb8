// ABOUTME: Custom serde deserializers for config types.
// ABOUTME: Accepts host entries as a compact address string or a detailed map.

use serde::Deserialize;
use std::collections::BTreeMap;

use super::HostConfig;

pub fn deserialize_hosts<'de, D>(deserializer: D) -> Result<BTreeMap<String, HostConfig>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let entries: BTreeMap<String, HostEntry> = BTreeMap::deserialize(deserializer)?;
    entries
        .into_iter()
        .map(|(name, entry)| {
            entry
                .into_host_config()
                .map(|host| (name.clone(), host))
                .map_err(|e| serde::de::Error::custom(format!("host {name}: {e}")))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HostEntry {
    Simple(String),
    Detailed(HostConfig),
}

impl HostEntry {
    fn into_host_config(self) -> Result<HostConfig, String> {
        match self {
            HostEntry::Simple(s) => HostConfig::parse(&s),
            HostEntry::Detailed(c) => Ok(c),
        }
    }
}
