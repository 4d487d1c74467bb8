// ABOUTME: Session facade: connect, execute, push, pull and close over one SSH connection.
// ABOUTME: Every channel is opened and released inside a single call, before the session can close.

use super::auth::{AuthNegotiator, DEFAULT_MAX_ROUNDS, RusshAuth};
use super::error::{Error, Result};
use super::exec::{
    CommandChannel, CommandExecutor, CommandOutput, ExecOptions, RusshCommandChannel, exec_or_close,
};
use super::handler::{ClientHandler, HandshakeState};
use super::operator::{ConsoleOperator, Operator};
use super::trust::HostTrustStore;
use crate::diagnostics::Warning;
use crate::transfer::{
    CopySink, CopySource, ScpSink, ScpSource, TransferReport, pull_tree, push_tree, sink_command,
    source_command,
};
use russh::Disconnect;
use russh::client::{self, Config, Handle};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;
use zeroize::Zeroizing;

/// Unanswered keepalives before the connection is considered dead.
pub const KEEPALIVE_MAX: usize = 3;

/// Configuration for establishing an SSH session.
#[derive(Clone)]
pub struct SessionConfig {
    /// Remote host to connect to.
    pub host: String,
    /// SSH port (default: 22).
    pub port: u16,
    /// Username for authentication.
    pub user: String,
    /// Password supplied up front. Never prompted for again when set.
    pub password: Option<Zeroizing<String>>,
    /// Explicit private key files. When empty, the agent and default key files are tried.
    pub identities: Vec<PathBuf>,
    /// Accept unknown hosts without asking. A changed key is still rejected.
    pub auto_trust: bool,
    /// Trust file. If None, uses `~/.ssh/tether_known_hosts`.
    pub known_hosts_path: Option<PathBuf>,
    /// Bound on reaching the server and receiving its host key (default: 30 seconds).
    /// Time spent asking the operator about the key is not counted.
    pub connect_timeout: Duration,
    /// Interval between keepalives once the transport is up (default: 15 seconds).
    /// The connection is dropped after `KEEPALIVE_MAX` unanswered keepalives.
    pub keepalive_interval: Duration,
    /// Timeout for a single command. None waits as long as the command runs.
    pub command_timeout: Option<Duration>,
    /// Upper bound on interactive and password rounds.
    pub max_auth_rounds: u32,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("identities", &self.identities)
            .field("auto_trust", &self.auto_trust)
            .field("known_hosts_path", &self.known_hosts_path)
            .field("connect_timeout", &self.connect_timeout)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("command_timeout", &self.command_timeout)
            .field("max_auth_rounds", &self.max_auth_rounds)
            .finish()
    }
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            password: None,
            identities: Vec::new(),
            auto_trust: false,
            known_hosts_path: None,
            connect_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(15),
            command_timeout: None,
            max_auth_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Zeroizing::new(password.into()));
        self
    }

    pub fn identity(mut self, path: impl Into<PathBuf>) -> Self {
        self.identities.push(path.into());
        self
    }

    pub fn auto_trust(mut self, auto_trust: bool) -> Self {
        self.auto_trust = auto_trust;
        self
    }

    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    pub fn max_auth_rounds(mut self, rounds: u32) -> Self {
        self.max_auth_rounds = rounds.max(1);
        self
    }

    /// Trust store for this configuration.
    pub fn trust_store(&self) -> Result<HostTrustStore> {
        let path = match &self.known_hosts_path {
            Some(path) => path.clone(),
            None => HostTrustStore::default_path().ok_or_else(|| {
                Error::Connection("cannot locate trust file: HOME is not set".to_string())
            })?,
        };
        Ok(HostTrustStore::new(path, self.auto_trust))
    }
}

/// Split a remote destination into the directory the copy runs in and the name of the
/// top-level entry. A trailing `/` means "inside this directory, under the local name".
pub fn split_remote(remote: &str, local_name: &str) -> (String, String) {
    if remote.is_empty() || remote == "." {
        return (".".to_string(), local_name.to_string());
    }
    if remote.ends_with('/') {
        let dir = remote.trim_end_matches('/');
        let dir = if dir.is_empty() { "/" } else { dir };
        return (dir.to_string(), local_name.to_string());
    }
    match remote.rsplit_once('/') {
        Some(("", name)) => ("/".to_string(), name.to_string()),
        Some((dir, name)) => (dir.to_string(), name.to_string()),
        None => (".".to_string(), remote.to_string()),
    }
}

/// A remote session. Connect once, run any number of operations, then close.
pub struct Session {
    config: SessionConfig,
    operator: Arc<dyn Operator>,
    handle: Option<Handle<ClientHandler>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Session {
    /// A session that talks to the user on the terminal.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_operator(config, Arc::new(ConsoleOperator::new()))
    }

    pub fn with_operator(config: SessionConfig, operator: Arc<dyn Operator>) -> Self {
        Self {
            config,
            operator,
            handle: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_closed())
    }

    fn handle(&self) -> Result<&Handle<ClientHandler>> {
        self.handle.as_ref().ok_or(Error::NotConnected)
    }

    /// Open the transport, verify the host identity and authenticate.
    ///
    /// On any failure the transport is torn down and the session stays unconnected.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let host = self.config.host.clone();
        let port = self.config.port;
        let host_id = HostTrustStore::host_id(&host, port);
        tracing::debug!(host = %host_id, user = %self.config.user, "connecting");

        let state = Arc::new(HandshakeState::default());
        let handler = ClientHandler::new(
            host_id.clone(),
            self.config.trust_store()?,
            Arc::clone(&self.operator),
            Arc::clone(&state),
        );
        // No idle timeout; the link is quiet while the operator answers prompts.
        let russh_config = Config {
            inactivity_timeout: None,
            keepalive_interval: Some(self.config.keepalive_interval),
            keepalive_max: KEEPALIVE_MAX,
            ..Default::default()
        };
        let timed_out = || {
            Error::Connection(format!(
                "{host}:{port}: timed out after {:?}",
                self.config.connect_timeout
            ))
        };

        let deadline = Instant::now() + self.config.connect_timeout;
        let connecting = TcpStream::connect((host.as_str(), port));
        let stream = match tokio::time::timeout_at(deadline, connecting).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(Error::Connection(format!("{host}:{port}: {e}"))),
            Err(_) => return Err(timed_out()),
        };

        let handshake = client::connect_stream(Arc::new(russh_config), stream, handler);
        let mut handle = match until_key_presented(handshake, deadline, &state).await {
            Some(Ok(handle)) => handle,
            Some(Err(e)) => {
                if let Some(reason) = state.take_rejection() {
                    return Err(Error::HostIdentityRejected {
                        host: host_id,
                        reason: reason.to_string(),
                    });
                }
                return Err(Error::Connection(format!("{host}:{port}: {e}")));
            }
            None => return Err(timed_out()),
        };

        let password = self.config.password.as_deref().map(String::as_str);
        let outcome = {
            let mut transport = RusshAuth::new(&mut handle, &self.config.identities);
            let mut negotiator =
                AuthNegotiator::new(&self.config.user, password, self.operator.as_ref())
                    .max_rounds(self.config.max_auth_rounds);
            let outcome = negotiator.authenticate(&mut transport).await;
            tracing::debug!(history = ?negotiator.history(), "authentication finished");
            outcome
        };

        if let Err(e) = outcome.into_result() {
            if let Err(teardown) = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await
            {
                tracing::debug!(error = %teardown, "disconnect after failed authentication");
            }
            return Err(e);
        }

        tracing::info!(host = %host_id, user = %self.config.user, "connected");
        self.handle = Some(handle);
        Ok(())
    }

    /// Run `command` on a fresh channel, streaming output per `options`.
    pub async fn execute(&mut self, command: &str, options: ExecOptions) -> Result<CommandOutput> {
        let channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(|e| Error::execution(format!("failed to open channel: {e}"), String::new()))?;
        let mut channel = RusshCommandChannel::new(channel);
        let executor = CommandExecutor::new(self.operator.as_ref());

        let result = match self.config.command_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, executor.run(&mut channel, command, options)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(Error::CommandTimeout(limit)),
                }
            }
            None => executor.run(&mut channel, command, options).await,
        };

        if let Err(e) = channel.close().await {
            tracing::warn!(command, error = %e, "failed to close command channel");
        }
        result
    }

    /// Run `command` and capture its output.
    pub async fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        self.execute(command, ExecOptions::capture()).await
    }

    async fn open_copy_stream(
        &self,
        command: &str,
    ) -> Result<impl AsyncRead + AsyncWrite + Unpin + Send + use<>> {
        let channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(|e| Error::Transfer(format!("failed to open channel: {e}")))?;
        tracing::debug!(command, "starting remote copy");
        let mut channel = RusshCommandChannel::new(channel);
        exec_or_close(&mut channel, command)
            .await
            .map_err(|e| Error::Transfer(format!("failed to start remote copy: {e}")))?;
        Ok(channel.into_stream())
    }

    /// Copy the local file or tree at `local` to `remote`.
    ///
    /// `remote` names the entry to create. With a trailing `/` it names an existing
    /// directory to copy into.
    pub async fn push(&mut self, local: &Path, remote: &str) -> Result<TransferReport> {
        let local_name = local
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::Transfer(format!("{}: no usable file name", local.display())))?;
        let (dir, name) = split_remote(remote, local_name);
        tracing::info!(local = %local.display(), dir = %dir, name = %name, "push started");

        let stream = self.open_copy_stream(&sink_command(&dir)).await?;
        let mut sink = ScpSink::new(stream);
        let result = match sink.handshake().await {
            Ok(()) => push_tree(&mut sink, local, &name).await,
            Err(e) => Err(e),
        };
        let closed = CopySink::close(&mut sink).await;
        finish_transfer("push", result, closed)
    }

    /// Copy the remote file or tree at `remote` to `local`.
    pub async fn pull(&mut self, remote: &str, local: &Path) -> Result<TransferReport> {
        tracing::info!(remote, local = %local.display(), "pull started");
        let stream = self.open_copy_stream(&source_command(remote)).await?;
        let mut source = ScpSource::new(stream);
        let result = pull_tree(&mut source, local, self.operator.as_ref()).await;
        let closed = CopySource::close(&mut source).await;
        finish_transfer("pull", result, closed)
    }

    /// Disconnect. Safe to call repeatedly, and on a session that never connected.
    pub async fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.is_closed() {
            return;
        }
        if let Err(e) = handle.disconnect(Disconnect::ByApplication, "", "en").await {
            self.operator
                .warning(&format!("failed to disconnect cleanly: {e}"));
        }
        tracing::debug!(host = %self.config.host, "disconnected");
    }
}

/// Drive `handshake` until `deadline`.
///
/// Once the server has presented its host key the operator may be deciding whether to
/// trust it, so a handshake that got that far runs to completion.
async fn until_key_presented<F: Future>(
    handshake: F,
    deadline: Instant,
    state: &HandshakeState,
) -> Option<F::Output> {
    tokio::pin!(handshake);
    tokio::select! {
        output = &mut handshake => return Some(output),
        () = tokio::time::sleep_until(deadline) => {}
    }
    if state.key_presented() {
        tracing::debug!("connect deadline passed while the host key was being checked");
        Some(handshake.await)
    } else {
        None
    }
}

fn finish_transfer(
    direction: &str,
    result: Result<TransferReport>,
    closed: Result<()>,
) -> Result<TransferReport> {
    match &result {
        Ok(report) => tracing::info!(
            direction,
            files = report.files,
            directories = report.directories,
            bytes = report.bytes,
            warnings = report.diagnostics.warnings().len(),
            "transfer finished"
        ),
        Err(e) => tracing::error!(direction, error = %e, "transfer failed"),
    }
    match (result, closed) {
        (Ok(mut report), Err(e)) => {
            report
                .diagnostics
                .warn(Warning::teardown(format!("failed to close copy channel: {e}")));
            Ok(report)
        }
        (Err(e), Err(teardown)) => {
            tracing::debug!(error = %teardown, "failed to close copy channel after error");
            Err(e)
        }
        (result, Ok(())) => result,
    }
}
