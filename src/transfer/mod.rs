// ABOUTME: Recursive tree transfer over the copy sub-protocol.
// ABOUTME: Push walks a local tree into a sink; pull rebuilds a remote tree from a source.

mod protocol;
mod pull;
mod push;
mod scp;

pub use protocol::{CopyEvent, CopySink, CopySource, is_valid_entry_name};
pub use pull::pull_tree;
pub use push::{BLOCK_SIZE, TransferNode, push_tree};
pub use scp::{ScpSink, ScpSource, shell_quote, sink_command, source_command};

use crate::diagnostics::Diagnostics;

/// What a push or pull moved, plus everything that went wrong without ending it.
#[derive(Debug, Default)]
pub struct TransferReport {
    pub files: u64,
    pub directories: u64,
    pub bytes: u64,
    pub diagnostics: Diagnostics,
}

impl TransferReport {
    /// True when every entry arrived intact.
    pub fn is_clean(&self) -> bool {
        !self.diagnostics.has_warnings()
    }
}
