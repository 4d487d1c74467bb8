// ABOUTME: SSH-specific error types.
// ABOUTME: Covers connection, host identity, authentication, execution, and transfer failures.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("host identity rejected for {host}: {reason}")]
    HostIdentityRejected { host: String, reason: String },

    #[error("authentication denied: no method succeeded")]
    AuthenticationDenied,

    #[error("authentication error: {0}")]
    AuthenticationError(String),

    #[error("failed to load key from {path}: {reason}")]
    KeyLoadFailed { path: PathBuf, reason: String },

    #[error("command execution failed: {message}")]
    Execution {
        message: String,
        /// Output captured before the failure; never complete.
        partial_output: String,
    },

    #[error("command timed out after {0:?}")]
    CommandTimeout(std::time::Duration),

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("remote side reported: {message}")]
    Remote { fatal: bool, message: String },

    #[error("operator input unavailable: {0}")]
    Operator(String),

    #[error("session is not connected")]
    NotConnected,

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("SSH key error: {0}")]
    Key(#[from] russh::keys::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Tagged failure reason, used for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    HostIdentityRejected,
    AuthenticationDenied,
    AuthenticationError,
    Execution,
    Transfer,
}

/// Boundary status: every failure collapses to `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
}

impl ErrorKind {
    pub fn status(self) -> Status {
        Status::Error
    }
}

impl Error {
    pub(crate) fn execution(message: impl Into<String>, partial_output: String) -> Self {
        Error::Execution {
            message: message.into(),
            partial_output,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection(_) | Error::NotConnected => ErrorKind::Connection,
            Error::HostIdentityRejected { .. } => ErrorKind::HostIdentityRejected,
            Error::AuthenticationDenied => ErrorKind::AuthenticationDenied,
            Error::AuthenticationError(_) | Error::KeyLoadFailed { .. } | Error::Operator(_) => {
                ErrorKind::AuthenticationError
            }
            Error::Execution { .. } | Error::CommandTimeout(_) => ErrorKind::Execution,
            Error::Transfer(_) | Error::Remote { .. } | Error::Io(_) => ErrorKind::Transfer,
            Error::Protocol(_) | Error::Key(_) => ErrorKind::Connection,
        }
    }

    pub fn status(&self) -> Status {
        self.kind().status()
    }
}

/// Collapse an operation result into the boundary status.
pub fn status_of<T>(result: &Result<T>) -> Status {
    match result {
        Ok(_) => Status::Ok,
        Err(e) => e.status(),
    }
}
