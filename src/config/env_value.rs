// ABOUTME: Secret values for the host inventory: a literal or a reference to an env var.
// ABOUTME: Resolved values are zeroized on drop and never shown by Debug.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;
use zeroize::Zeroizing;

#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SecretValue {
    Literal(String),
    FromEnv {
        #[serde(rename = "env")]
        var: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretValue::Literal(_) => f.write_str("Literal(<redacted>)"),
            SecretValue::FromEnv { var, .. } => f.debug_struct("FromEnv").field("env", var).finish(),
        }
    }
}

impl SecretValue {
    pub fn resolve(&self) -> Result<Zeroizing<String>> {
        match self {
            SecretValue::Literal(s) => Ok(Zeroizing::new(s.clone())),
            SecretValue::FromEnv { var, default } => match std::env::var(var) {
                Ok(val) => Ok(Zeroizing::new(val)),
                Err(_) => default
                    .clone()
                    .map(Zeroizing::new)
                    .ok_or_else(|| Error::MissingEnvVar(var.clone())),
            },
        }
    }
}
