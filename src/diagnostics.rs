// ABOUTME: Diagnostics accumulator for non-fatal warnings during a transfer or teardown.
// ABOUTME: Collects problems that shouldn't fail the whole operation but should be shown to users.

/// Collects non-fatal warnings.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!(kind = ?warning.kind, "{}", warning.message);
        self.warnings.push(warning);
    }

    /// Get all collected warnings.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Check if any warnings were collected.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Warnings of one kind.
    pub fn of_kind(&self, kind: WarningKind) -> impl Iterator<Item = &Warning> {
        self.warnings.iter().filter(move |w| w.kind == kind)
    }
}

/// A non-fatal warning.
#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    /// A local entry that could not be sent or written; the walk continued.
    pub fn item_failed(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::ItemFailed,
            message: message.into(),
        }
    }

    /// A local entry that is neither a file nor a directory.
    pub fn item_skipped(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::ItemSkipped,
            message: message.into(),
        }
    }

    /// A warning reported by the remote side.
    pub fn remote(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::RemoteWarning,
            message: message.into(),
        }
    }

    /// A file whose announced size could not be fully read; the remote copy is padded.
    pub fn damaged_file(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::DamagedFile,
            message: message.into(),
        }
    }

    /// Failed to cleanly release a channel or the session.
    pub fn teardown(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::Teardown,
            message: message.into(),
        }
    }
}

/// Categories of warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    ItemFailed,
    ItemSkipped,
    RemoteWarning,
    /// Remote file contents are not the local contents.
    DamagedFile,
    Teardown,
}
