// ABOUTME: Remote command execution over a command channel.
// ABOUTME: Streams output in bounded chunks, echoing and/or capturing it as best-effort text.

use super::error::{Error, Result};
use super::operator::Operator;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use russh::client::Msg;
use russh::{Channel, ChannelMsg};

/// Upper bound on bytes handed to the executor per read.
pub const READ_CHUNK_SIZE: usize = 8 * 1024;

/// A channel able to run one command and stream its standard output.
#[async_trait]
pub trait CommandChannel: Send {
    async fn exec(&mut self, command: &str) -> Result<()>;

    /// Read up to `buf.len()` bytes of output. `Ok(0)` signals end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Exit status, once the remote has reported one.
    fn exit_status(&self) -> Option<u32> {
        None
    }

    /// Standard error collected so far.
    fn take_stderr(&mut self) -> Vec<u8> {
        Vec::new()
    }

    /// Release the channel. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}

/// What to do with output as it arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecOptions {
    pub capture: bool,
    pub echo: bool,
}

impl ExecOptions {
    pub fn capture() -> Self {
        Self {
            capture: true,
            echo: false,
        }
    }

    pub fn echo() -> Self {
        Self {
            capture: false,
            echo: true,
        }
    }

    pub fn capture_and_echo() -> Self {
        Self {
            capture: true,
            echo: true,
        }
    }
}

/// Result of a remote command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit status, when the server reported one.
    pub exit_status: Option<u32>,
    /// Captured standard output (only with `capture`).
    pub stdout: Option<String>,
    /// Captured standard error (only with `capture`).
    pub stderr: Option<String>,
    /// False when streaming stopped at output that was not valid text.
    pub text_complete: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status.is_none_or(|code| code == 0)
    }
}

/// Decode the longest valid UTF-8 prefix of `pending`, leaving an incomplete trailing
/// sequence for the next chunk. `None` when the bytes are not text.
fn take_text(pending: &mut Vec<u8>) -> Option<String> {
    match std::str::from_utf8(pending) {
        Ok(text) => {
            let text = text.to_owned();
            pending.clear();
            Some(text)
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let text = std::str::from_utf8(&pending[..valid]).ok()?.to_owned();
            pending.drain(..valid);
            Some(text)
        }
        Err(_) => None,
    }
}

/// Runs commands and streams their output.
pub struct CommandExecutor<'a> {
    operator: &'a dyn Operator,
    chunk_size: usize,
}

impl<'a> CommandExecutor<'a> {
    pub fn new(operator: &'a dyn Operator) -> Self {
        Self {
            operator,
            chunk_size: READ_CHUNK_SIZE,
        }
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Execute `command` and read until end of stream.
    ///
    /// A read error is terminal even after partial output; the partial capture travels in
    /// the error. The channel is left open for the caller to close.
    pub async fn run<C>(
        &self,
        channel: &mut C,
        command: &str,
        options: ExecOptions,
    ) -> Result<CommandOutput>
    where
        C: CommandChannel + ?Sized,
    {
        channel
            .exec(command)
            .await
            .map_err(|e| Error::execution(format!("failed to exec command: {e}"), String::new()))?;

        let mut buf = vec![0u8; self.chunk_size];
        let mut pending = Vec::new();
        let mut captured = String::new();
        let mut text_complete = true;

        loop {
            let n = match channel.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(command, error = %e, "reading command output failed");
                    return Err(Error::execution(
                        format!("failed to read output: {e}"),
                        captured,
                    ));
                }
            };

            pending.extend_from_slice(&buf[..n]);
            let Some(text) = take_text(&mut pending) else {
                tracing::warn!(command, bytes = n, "output is not valid text, stopping");
                text_complete = false;
                break;
            };

            if options.echo && !text.is_empty() {
                self.operator.output(&text);
            }
            if options.capture {
                captured.push_str(&text);
            }
        }

        if text_complete && !pending.is_empty() {
            tracing::warn!(command, bytes = pending.len(), "output ended inside a character");
            text_complete = false;
        }

        let stderr = channel.take_stderr();
        Ok(CommandOutput {
            exit_status: channel.exit_status(),
            stdout: options.capture.then_some(captured),
            stderr: options
                .capture
                .then(|| String::from_utf8_lossy(&stderr).into_owned()),
            text_complete,
        })
    }
}

/// Start `command` on `channel`, closing the channel if the remote refuses it.
pub async fn exec_or_close<C>(channel: &mut C, command: &str) -> Result<()>
where
    C: CommandChannel + ?Sized,
{
    if let Err(e) = channel.exec(command).await {
        if let Err(close_error) = channel.close().await {
            tracing::debug!(command, error = %close_error, "failed to close refused channel");
        }
        return Err(e);
    }
    Ok(())
}

/// `CommandChannel` over a russh session channel.
pub struct RusshCommandChannel {
    channel: Channel<Msg>,
    pending: Vec<u8>,
    offset: usize,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
    eof: bool,
    remote_closed: bool,
    closed: bool,
}

impl RusshCommandChannel {
    pub fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel,
            pending: Vec::new(),
            offset: 0,
            stderr: Vec::new(),
            exit_status: None,
            eof: false,
            remote_closed: false,
            closed: false,
        }
    }

    /// Hand the raw channel over as a byte stream once a command is running.
    pub fn into_stream(self) -> impl AsyncRead + AsyncWrite + Unpin + Send {
        self.channel.into_stream()
    }
}

#[async_trait]
impl CommandChannel for RusshCommandChannel {
    async fn exec(&mut self, command: &str) -> Result<()> {
        self.channel.exec(true, command).await?;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if self.offset < self.pending.len() {
                let n = buf.len().min(self.pending.len() - self.offset);
                buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
                self.offset += n;
                return Ok(n);
            }
            if self.remote_closed || (self.eof && self.exit_status.is_some()) {
                return Ok(0);
            }

            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    self.pending.clear();
                    self.pending.extend_from_slice(&data);
                    self.offset = 0;
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    if ext == 1 {
                        self.stderr.extend_from_slice(&data);
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    self.exit_status = Some(exit_status);
                }
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    tracing::debug!(signal = ?signal_name, "remote command killed by signal");
                }
                Some(ChannelMsg::Eof) => {
                    self.eof = true;
                }
                Some(ChannelMsg::Close) | None => {
                    self.remote_closed = true;
                }
                Some(_) => {}
            }
        }
    }

    fn exit_status(&self) -> Option<u32> {
        self.exit_status
    }

    fn take_stderr(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.stderr)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.remote_closed {
            return Ok(());
        }
        if !self.eof
            && let Err(e) = self.channel.eof().await
        {
            tracing::debug!(error = %e, "failed to send eof on command channel");
        }
        self.channel.close().await?;
        Ok(())
    }
}
