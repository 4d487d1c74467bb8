// ABOUTME: Pull engine: consumes remote copy events and rebuilds the tree on local disk.
// ABOUTME: Any failure ends the pull, since the remote stream cannot be resynchronized.

use super::TransferReport;
use super::protocol::{CopyEvent, CopySource, is_valid_entry_name};
use super::push::BLOCK_SIZE;
use crate::diagnostics::Warning;
use crate::ssh::operator::Operator;
use crate::ssh::{Error, Result};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

/// Where entries land.
enum Placement {
    /// Entries are created inside an existing directory under their own names.
    Inside(PathBuf),
    /// The single top-level entry is created at this path.
    Rename(PathBuf),
}

/// A directory entered by the remote and not yet left.
struct Frame {
    path: PathBuf,
    /// Mode to apply on leaving; only for directories created by this pull.
    mode: Option<u32>,
}

struct Puller<'a, S: ?Sized> {
    source: &'a mut S,
    operator: &'a dyn Operator,
    placement: Placement,
    stack: Vec<Frame>,
    top_level_entries: usize,
    buf: Vec<u8>,
    report: TransferReport,
}

impl<S> Puller<'_, S>
where
    S: CopySource + ?Sized,
{
    /// Resolve the local path for a newly announced entry.
    async fn resolve(&mut self, name: &str) -> Result<PathBuf> {
        if !is_valid_entry_name(name) {
            let reason = format!("refusing entry with unsafe name {name:?}");
            self.source.deny(&reason).await?;
            return Err(Error::Transfer(reason));
        }
        if let Some(frame) = self.stack.last() {
            return Ok(frame.path.join(name));
        }

        self.top_level_entries += 1;
        match &self.placement {
            Placement::Inside(dir) => Ok(dir.join(name)),
            Placement::Rename(path) if self.top_level_entries == 1 => Ok(path.clone()),
            Placement::Rename(path) => {
                let reason = format!(
                    "remote sent more than one entry but {} is not a directory",
                    path.display()
                );
                self.source.deny(&reason).await?;
                Err(Error::Transfer(reason))
            }
        }
    }

    async fn refuse(&mut self, path: &Path, error: io::Error) -> Error {
        let reason = format!("{}: {error}", path.display());
        if let Err(e) = self.source.deny(&reason).await {
            tracing::debug!(error = %e, "failed to send refusal to remote");
        }
        Error::Transfer(reason)
    }

    async fn receive_file(&mut self, name: &str, size: u64, mode: u32) -> Result<()> {
        let path = self.resolve(name).await?;
        tracing::debug!(path = %path.display(), size, "receiving file");

        let mut file = match File::create(&path).await {
            Ok(file) => file,
            Err(e) => return Err(self.refuse(&path, e).await),
        };
        self.source.accept().await?;

        let mut received = 0u64;
        while received < size {
            let want = usize::try_from(size - received)
                .unwrap_or(usize::MAX)
                .min(self.buf.len());
            let n = self.source.read(&mut self.buf[..want]).await?;
            if n == 0 {
                return Err(Error::Transfer(format!(
                    "{}: stream ended after {received} of {size} bytes",
                    path.display()
                )));
            }
            file.write_all(&self.buf[..n])
                .await
                .map_err(|e| Error::Transfer(format!("{}: {e}", path.display())))?;
            received += n as u64;
        }
        file.flush()
            .await
            .map_err(|e| Error::Transfer(format!("{}: {e}", path.display())))?;
        drop(file);

        set_mode(&path, mode & 0o777).await?;
        self.report.files += 1;
        self.report.bytes += size;
        Ok(())
    }

    async fn enter_directory(&mut self, name: &str, mode: u32) -> Result<()> {
        let path = self.resolve(name).await?;
        tracing::debug!(path = %path.display(), "receiving directory");

        let created = match fs::create_dir(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => false,
            Err(e) => return Err(self.refuse(&path, e).await),
        };
        self.source.accept().await?;

        self.report.directories += 1;
        self.stack.push(Frame {
            path,
            mode: created.then_some(mode & 0o777),
        });
        Ok(())
    }

    async fn leave_directory(&mut self) -> Result<()> {
        let frame = self
            .stack
            .pop()
            .ok_or_else(|| Error::Transfer("remote left a directory it never entered".into()))?;
        if let Some(mode) = frame.mode {
            set_mode(&frame.path, mode).await?;
        }
        Ok(())
    }

    async fn run(&mut self) -> Result<()> {
        loop {
            match self.source.next_event().await? {
                CopyEvent::NewFile { name, size, mode } => {
                    self.receive_file(&name, size, mode).await?;
                }
                CopyEvent::NewDirectory { name, mode } => {
                    self.enter_directory(&name, mode).await?;
                }
                CopyEvent::EndDirectory => self.leave_directory().await?,
                CopyEvent::Warning(text) => {
                    self.operator.warning(&text);
                    self.report.diagnostics.warn(Warning::remote(text));
                }
                CopyEvent::ProtocolError(message) => {
                    return Err(Error::Remote {
                        fatal: true,
                        message,
                    });
                }
                CopyEvent::EndOfStream => return self.finish(),
            }
        }
    }

    fn finish(&self) -> Result<()> {
        if let Some(frame) = self.stack.last() {
            return Err(Error::Transfer(format!(
                "stream ended inside {} ({} directories still open)",
                frame.path.display(),
                self.stack.len()
            )));
        }
        if self.top_level_entries == 0 {
            // A missing remote path arrives as a warning followed by end of stream.
            let detail = self
                .report
                .diagnostics
                .warnings()
                .last()
                .map(|w| w.message.clone())
                .unwrap_or_else(|| "remote sent nothing".to_string());
            return Err(Error::Transfer(detail));
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| Error::Transfer(format!("{}: setting mode {mode:o}: {e}", path.display())))
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Rebuild the remote tree announced by `source` at `target`.
///
/// When `target` is an existing directory the remote entry is created inside it;
/// otherwise the remote entry is created at `target` itself. Returns once the remote
/// ends the stream with every directory it entered also left.
pub async fn pull_tree<S>(
    source: &mut S,
    target: &Path,
    operator: &dyn Operator,
) -> Result<TransferReport>
where
    S: CopySource + ?Sized,
{
    let placement = if fs::metadata(target).await.is_ok_and(|m| m.is_dir()) {
        Placement::Inside(target.to_path_buf())
    } else {
        Placement::Rename(target.to_path_buf())
    };

    let mut puller = Puller {
        source,
        operator,
        placement,
        stack: Vec::new(),
        top_level_entries: 0,
        buf: vec![0u8; BLOCK_SIZE],
        report: TransferReport::default(),
    };
    puller.run().await?;
    Ok(puller.report)
}
