// ABOUTME: SSH client module for remote sessions.
// ABOUTME: Host trust, authentication negotiation, command execution and the session facade.

mod auth;
mod client;
mod error;
mod exec;
mod handler;
pub mod operator;
mod trust;

pub use auth::{
    AuthMethods, AuthNegotiator, AuthOutcome, AuthReply, AuthState, AuthTransport,
    DEFAULT_MAX_ROUNDS, InteractiveReply, Prompt, default_identity_files, is_password_prompt,
};
pub use client::{KEEPALIVE_MAX, Session, SessionConfig, split_remote};
pub use error::{Error, ErrorKind, Result, Status, status_of};
pub use exec::{
    CommandChannel, CommandExecutor, CommandOutput, ExecOptions, READ_CHUNK_SIZE, exec_or_close,
};
pub use operator::{ConsoleOperator, Operator, is_affirmative};
pub use trust::{
    DEFAULT_TRUST_FILE, HostKey, HostTrustStore, Lookup, RejectReason, TrustRecord, Verdict,
};
