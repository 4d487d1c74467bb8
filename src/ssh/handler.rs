// ABOUTME: russh client handler wiring host key checks to the trust store.
// ABOUTME: Records handshake progress so connect can bound it and report why a host was refused.

use super::operator::Operator;
use super::trust::{HostKey, HostTrustStore, RejectReason, Verdict};
use parking_lot::Mutex;
use russh::client;
use russh::keys::ssh_key;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// What the handshake has reached, shared between the handler and `Session::connect`.
#[derive(Debug, Default)]
pub(crate) struct HandshakeState {
    key_presented: AtomicBool,
    rejection: Mutex<Option<RejectReason>>,
}

impl HandshakeState {
    /// The server sent its host key; from here on the operator may be consulted.
    pub(crate) fn key_presented(&self) -> bool {
        self.key_presented.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_key_presented(&self) {
        self.key_presented.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take_rejection(&self) -> Option<RejectReason> {
        self.rejection.lock().take()
    }
}

/// SSH client handler for russh.
pub struct ClientHandler {
    host_id: String,
    trust: HostTrustStore,
    operator: Arc<dyn Operator>,
    state: Arc<HandshakeState>,
}

impl ClientHandler {
    pub(crate) fn new(
        host_id: String,
        trust: HostTrustStore,
        operator: Arc<dyn Operator>,
        state: Arc<HandshakeState>,
    ) -> Self {
        Self {
            host_id,
            trust,
            operator,
            state,
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        self.state.mark_key_presented();
        let key = HostKey::from_public_key(server_public_key);
        match self
            .trust
            .verify(&self.host_id, &key, self.operator.as_ref())
            .await
        {
            Verdict::Trusted => Ok(true),
            Verdict::Rejected(reason) => {
                tracing::warn!(host = %self.host_id, reason = %reason, "host key rejected");
                *self.state.rejection.lock() = Some(reason);
                Ok(false)
            }
        }
    }

    async fn auth_banner(
        &mut self,
        banner: &str,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        let banner = banner.trim_end();
        if !banner.is_empty() {
            self.operator.message(banner);
        }
        Ok(())
    }
}
