// ABOUTME: Copy sub-protocol abstractions shared by push and pull.
// ABOUTME: CopySink emits tree-building requests; CopySource yields remote copy events.

use crate::ssh::Result;
use async_trait::async_trait;

/// One request produced by the remote side while it sends a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyEvent {
    NewFile { name: String, size: u64, mode: u32 },
    NewDirectory { name: String, mode: u32 },
    EndDirectory,
    Warning(String),
    EndOfStream,
    ProtocolError(String),
}

/// Receiving end of a push: the remote builds the tree as requests arrive.
///
/// Requests nest: every `push_directory` is matched by a `leave_directory`, and every
/// `push_file` is followed by exactly `size` bytes of `write` calls.
#[async_trait]
pub trait CopySink: Send {
    async fn push_directory(&mut self, name: &str, mode: u32) -> Result<()>;

    async fn push_file(&mut self, name: &str, size: u64, mode: u32) -> Result<()>;

    /// File data for the most recently announced file.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    async fn leave_directory(&mut self) -> Result<()>;

    /// Release the copy session. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}

/// Sending end of a pull: the remote walks its tree and reports each entry.
#[async_trait]
pub trait CopySource: Send {
    async fn next_event(&mut self) -> Result<CopyEvent>;

    /// Accept the pending `NewFile` / `NewDirectory` request.
    async fn accept(&mut self) -> Result<()>;

    /// Refuse the pending request; the transfer will not continue.
    async fn deny(&mut self, reason: &str) -> Result<()>;

    /// Data of the accepted file. `Ok(0)` before the announced size means the stream ended.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Release the copy session. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}

/// A received entry name must be a single path component.
pub fn is_valid_entry_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/') && !name.contains('\0')
}
