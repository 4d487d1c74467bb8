// ABOUTME: Host identity trust store (trust on first use with change detection).
// ABOUTME: Persists host -> key fingerprint records in an append-only text file.

use super::error::Result;
use super::operator::Operator;
use russh::keys::ssh_key::{self, HashAlg};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Default trust file name under `~/.ssh`.
pub const DEFAULT_TRUST_FILE: &str = "tether_known_hosts";

/// Serializes every read/append of trust files across concurrent sessions.
static TRUST_LOCK: Mutex<()> = Mutex::const_new(());

/// The identity a server presented: key algorithm plus SHA-256 fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKey {
    pub algorithm: String,
    pub fingerprint: String,
}

impl HostKey {
    pub fn new(algorithm: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            fingerprint: fingerprint.into(),
        }
    }

    pub fn from_public_key(key: &ssh_key::PublicKey) -> Self {
        Self {
            algorithm: key.algorithm().to_string(),
            fingerprint: key.fingerprint(HashAlg::Sha256).to_string(),
        }
    }
}

/// One persisted line of the trust file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustRecord {
    pub host: String,
    pub key: HostKey,
}

impl TrustRecord {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let mut fields = line.split_whitespace();
        let host = fields.next()?;
        let algorithm = fields.next()?;
        let fingerprint = fields.next()?;
        Some(Self {
            host: host.to_string(),
            key: HostKey::new(algorithm, fingerprint),
        })
    }

    fn to_line(&self) -> String {
        format!(
            "{} {} {}\n",
            self.host, self.key.algorithm, self.key.fingerprint
        )
    }
}

/// What the store knows about a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Unknown,
    Known,
    Changed { recorded: String },
    OtherKeyType { recorded: String },
}

/// Why a host identity was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The recorded fingerprint differs from the presented one.
    IdentityChanged { recorded: String },
    /// Only keys of a different algorithm are recorded for this host.
    OtherKeyType { recorded: String },
    /// The operator did not trust the unknown key.
    NotConfirmed,
    /// The operator declined to persist the unknown key.
    NotPersisted,
    /// The key could not be written to the trust file.
    PersistFailed(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::IdentityChanged { recorded } => {
                write!(f, "host identity changed (recorded fingerprint {recorded})")
            }
            RejectReason::OtherKeyType { recorded } => write!(
                f,
                "a different key type ({recorded}) is recorded for this host"
            ),
            RejectReason::NotConfirmed => write!(f, "host key not trusted by operator"),
            RejectReason::NotPersisted => write!(f, "host key not saved by operator"),
            RejectReason::PersistFailed(e) => write!(f, "failed to save host key: {e}"),
        }
    }
}

/// Outcome of host verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Trusted,
    Rejected(RejectReason),
}

impl Verdict {
    pub fn is_trusted(&self) -> bool {
        matches!(self, Verdict::Trusted)
    }
}

enum Loaded {
    Missing,
    Unreadable,
    Records(Vec<TrustRecord>),
}

/// Decides whether a remote host identity is acceptable.
#[derive(Debug, Clone)]
pub struct HostTrustStore {
    path: PathBuf,
    auto_trust: bool,
}

impl HostTrustStore {
    pub fn new(path: impl Into<PathBuf>, auto_trust: bool) -> Self {
        Self {
            path: path.into(),
            auto_trust,
        }
    }

    /// `~/.ssh/tether_known_hosts`, if a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".ssh").join(DEFAULT_TRUST_FILE))
    }

    /// Identifier used as the record key: `host` on port 22, `[host]:port` otherwise.
    pub fn host_id(host: &str, port: u16) -> String {
        if port == 22 {
            host.to_string()
        } else {
            format!("[{host}]:{port}")
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Loaded {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Loaded::Records(content.lines().filter_map(TrustRecord::parse).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Loaded::Missing,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "trust file unreadable, treating host as unknown"
                );
                Loaded::Unreadable
            }
        }
    }

    fn classify(records: &[TrustRecord], host: &str, key: &HostKey) -> Lookup {
        let for_host: Vec<&TrustRecord> = records.iter().filter(|r| r.host == host).collect();
        let same_type: Vec<&TrustRecord> = for_host
            .iter()
            .copied()
            .filter(|r| r.key.algorithm == key.algorithm)
            .collect();

        if same_type.iter().any(|r| r.key.fingerprint == key.fingerprint) {
            Lookup::Known
        } else if let Some(record) = same_type.first() {
            Lookup::Changed {
                recorded: record.key.fingerprint.clone(),
            }
        } else if let Some(record) = for_host.first() {
            Lookup::OtherKeyType {
                recorded: record.key.algorithm.clone(),
            }
        } else {
            Lookup::Unknown
        }
    }

    /// Look up a host without prompting or writing.
    pub async fn lookup(&self, host: &str, key: &HostKey) -> Lookup {
        let _guard = TRUST_LOCK.lock().await;
        match self.load().await {
            Loaded::Records(records) => Self::classify(&records, host, key),
            Loaded::Missing | Loaded::Unreadable => Lookup::Unknown,
        }
    }

    /// Decide whether `key` is acceptable for `host`, prompting and recording as needed.
    ///
    /// A changed or other-type key is always rejected; `auto_trust` only affects hosts
    /// with no record at all.
    pub async fn verify(&self, host: &str, key: &HostKey, operator: &dyn Operator) -> Verdict {
        let _guard = TRUST_LOCK.lock().await;

        let (lookup, missing) = match self.load().await {
            Loaded::Records(records) => (Self::classify(&records, host, key), false),
            Loaded::Missing => (Lookup::Unknown, true),
            Loaded::Unreadable => (Lookup::Unknown, false),
        };

        match lookup {
            Lookup::Known => {
                tracing::debug!(host, fingerprint = %key.fingerprint, "host key matches trust store");
                Verdict::Trusted
            }
            Lookup::Changed { recorded } => {
                tracing::error!(
                    host,
                    presented = %key.fingerprint,
                    recorded = %recorded,
                    "host key changed; refusing connection"
                );
                operator.warning(&format!(
                    "Host key for {host} changed, the server now presents {} {}. \
                     For security reasons the connection will be stopped.",
                    key.algorithm, key.fingerprint
                ));
                Verdict::Rejected(RejectReason::IdentityChanged { recorded })
            }
            Lookup::OtherKeyType { recorded } => {
                tracing::error!(host, presented = %key.algorithm, recorded = %recorded, "host key type mismatch");
                operator.warning(&format!(
                    "The {} host key for {host} was not found but a {recorded} key exists. \
                     An attacker might change the default server key to confuse the client \
                     into thinking the key does not exist.",
                    key.algorithm
                ));
                Verdict::Rejected(RejectReason::OtherKeyType { recorded })
            }
            Lookup::Unknown => self.trust_unknown(host, key, missing, operator).await,
        }
    }

    async fn trust_unknown(
        &self,
        host: &str,
        key: &HostKey,
        missing: bool,
        operator: &dyn Operator,
    ) -> Verdict {
        if self.auto_trust {
            tracing::warn!(
                host,
                fingerprint = %key.fingerprint,
                "Trust-On-First-Use: accepting unknown host key"
            );
            if let Err(e) = self.append(host, key).await {
                tracing::warn!("Failed to save host key to trust file: {}", e);
            }
            return Verdict::Trusted;
        }

        if missing {
            operator.message(&format!(
                "Could not find trust file {}. If you accept the host key here, \
                 the file will be created.",
                self.path.display()
            ));
        }

        operator.message(&format!(
            "The authenticity of host '{host}' can't be established.\n{} key fingerprint is {}.",
            key.algorithm, key.fingerprint
        ));

        match operator.confirm("Do you trust the host key?").await {
            Ok(true) => {}
            Ok(false) => return Verdict::Rejected(RejectReason::NotConfirmed),
            Err(e) => {
                tracing::debug!(error = %e, "no answer to host key prompt");
                return Verdict::Rejected(RejectReason::NotConfirmed);
            }
        }

        match operator
            .confirm("This new key will be written on disk for further usage. Do you agree?")
            .await
        {
            Ok(true) => {}
            Ok(false) => return Verdict::Rejected(RejectReason::NotPersisted),
            Err(e) => {
                tracing::debug!(error = %e, "no answer to persist prompt");
                return Verdict::Rejected(RejectReason::NotPersisted);
            }
        }

        match self.append(host, key).await {
            Ok(()) => Verdict::Trusted,
            Err(e) => Verdict::Rejected(RejectReason::PersistFailed(e.to_string())),
        }
    }

    async fn append(&self, host: &str, key: &HostKey) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let record = TrustRecord {
            host: host.to_string(),
            key: key.clone(),
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(record.to_line().as_bytes()).await?;
        file.flush().await?;
        tracing::info!(host, path = %self.path.display(), "recorded host key");
        Ok(())
    }

    /// Remove every record for `host`, returning how many were dropped.
    pub async fn forget(&self, host: &str) -> Result<usize> {
        let _guard = TRUST_LOCK.lock().await;
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut kept = String::with_capacity(content.len());
        let mut removed = 0;
        for line in content.lines() {
            match TrustRecord::parse(line) {
                Some(record) if record.host == host => removed += 1,
                _ => {
                    kept.push_str(line);
                    kept.push('\n');
                }
            }
        }

        if removed > 0 {
            tokio::fs::write(&self.path, kept).await?;
        }
        Ok(removed)
    }
}
