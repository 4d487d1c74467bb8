// ABOUTME: Scripted command channel delivering canned output chunks.
// ABOUTME: Can fail mid-stream to exercise partial-output error handling.

use async_trait::async_trait;
use std::collections::VecDeque;
use tether::ssh::{CommandChannel, Error, Result};

pub struct ScriptedChannel {
    chunks: VecDeque<Vec<u8>>,
    fail_after: Option<usize>,
    reads: usize,
    exit_status: Option<u32>,
    stderr: Vec<u8>,
    refuse_exec: bool,
    pub executed: Vec<String>,
    pub closed: usize,
}

impl ScriptedChannel {
    pub fn new<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            fail_after: None,
            reads: 0,
            exit_status: Some(0),
            stderr: Vec::new(),
            refuse_exec: false,
            executed: Vec::new(),
            closed: 0,
        }
    }

    /// Reads after the first `chunks` fail with a transport error.
    pub fn fail_after(mut self, chunks: usize) -> Self {
        self.fail_after = Some(chunks);
        self
    }

    pub fn exit_status(mut self, status: Option<u32>) -> Self {
        self.exit_status = status;
        self
    }

    pub fn stderr(mut self, text: &str) -> Self {
        self.stderr = text.as_bytes().to_vec();
        self
    }

    pub fn refuse_exec(mut self) -> Self {
        self.refuse_exec = true;
        self
    }
}

#[async_trait]
impl CommandChannel for ScriptedChannel {
    async fn exec(&mut self, command: &str) -> Result<()> {
        if self.refuse_exec {
            return Err(Error::Connection("channel request refused".into()));
        }
        self.executed.push(command.to_string());
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.fail_after.is_some_and(|limit| self.reads >= limit) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "channel lost",
            )));
        }
        let Some(mut chunk) = self.chunks.pop_front() else {
            return Ok(0);
        };
        self.reads += 1;
        let n = buf.len().min(chunk.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            chunk.drain(..n);
            self.chunks.push_front(chunk);
        }
        Ok(n)
    }

    fn exit_status(&self) -> Option<u32> {
        self.exit_status
    }

    fn take_stderr(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.stderr)
    }

    async fn close(&mut self) -> Result<()> {
        self.closed += 1;
        Ok(())
    }
}
