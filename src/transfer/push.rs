// ABOUTME: Push engine: walks a local tree depth-first and replays it into a CopySink.
// ABOUTME: Directories are discovered as they are visited, so memory stays bounded by depth.

use super::TransferReport;
use super::protocol::{CopySink, is_valid_entry_name};
use crate::diagnostics::Warning;
use crate::ssh::{Error, Result};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, ReadDir};
use tokio::io::AsyncReadExt;

/// File data is read and sent in blocks of this size.
pub const BLOCK_SIZE: usize = 1024 * 1024;

/// A local entry as seen during the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferNode {
    File {
        path: PathBuf,
        size: u64,
        mode: u32,
    },
    Directory {
        path: PathBuf,
        mode: u32,
        /// Device and inode, where the platform has them.
        identity: Option<(u64, u64)>,
    },
    /// Sockets, devices and the like; never sent.
    Other { path: PathBuf },
}

impl TransferNode {
    /// Inspect `path`, following symlinks.
    pub async fn inspect(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path).await?;
        let mode = permission_bits(&metadata);
        let path = path.to_path_buf();
        Ok(if metadata.is_file() {
            TransferNode::File {
                path,
                size: metadata.len(),
                mode,
            }
        } else if metadata.is_dir() {
            TransferNode::Directory {
                path,
                mode,
                identity: identity(&metadata),
            }
        } else {
            TransferNode::Other { path }
        })
    }
}

#[cfg(unix)]
fn permission_bits(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(unix)]
fn identity(metadata: &std::fs::Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn identity(_metadata: &std::fs::Metadata) -> Option<(u64, u64)> {
    None
}

#[cfg(not(unix))]
fn permission_bits(metadata: &std::fs::Metadata) -> u32 {
    match (metadata.is_dir(), metadata.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

/// A name the copy protocol can carry in a single header line.
fn is_sendable_name(name: &str) -> bool {
    is_valid_entry_name(name) && !name.contains('\n')
}

/// Split a per-item sink failure from one that ends the transfer.
///
/// The remote answers a rejected entry with a warning and keeps going; anything else
/// leaves the stream in an unknown state.
fn per_item(error: Error) -> Result<String> {
    match error {
        Error::Remote {
            fatal: false,
            message,
        } => Ok(message),
        other => Err(other),
    }
}

/// Fill `buf` from `file`, stopping early only at end of file.
async fn read_block(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Outcome of sending one file.
enum Sent {
    Complete(u64),
    /// The remote file exists but its contents are wrong.
    Damaged(u64, String),
    /// Nothing usable reached the remote.
    Failed(String),
}

async fn send_file<S>(
    sink: &mut S,
    path: &Path,
    name: &str,
    size: u64,
    mode: u32,
    buf: &mut [u8],
) -> Result<Sent>
where
    S: CopySink + ?Sized,
{
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) => return Ok(Sent::Failed(format!("{}: {e}", path.display()))),
    };

    if let Err(e) = sink.push_file(name, size, mode).await {
        return per_item(e).map(|message| Sent::Failed(format!("{}: {message}", path.display())));
    }

    // The remote expects exactly `size` bytes now; after a local read problem the rest
    // is zero-filled so the stream stays in step.
    let mut sent = 0u64;
    let mut damage: Option<String> = None;
    while sent < size {
        let want = usize::try_from(size - sent)
            .unwrap_or(usize::MAX)
            .min(buf.len());
        let block = &mut buf[..want];

        let filled = if damage.is_none() {
            match read_block(&mut file, block).await {
                Ok(n) if n < want => {
                    damage = Some(format!(
                        "{}: file shrank to {} of {size} bytes while sending",
                        path.display(),
                        sent + n as u64
                    ));
                    n
                }
                Ok(n) => n,
                Err(e) => {
                    damage = Some(format!("{}: read failed at byte {sent}: {e}", path.display()));
                    0
                }
            }
        } else {
            0
        };
        block[filled..].fill(0);

        if let Err(e) = sink.write(block).await {
            return per_item(e)
                .map(|message| Sent::Failed(format!("{}: {message}", path.display())));
        }
        sent += want as u64;
    }

    Ok(match damage {
        Some(message) => Sent::Damaged(sent, message),
        None => Sent::Complete(sent),
    })
}

/// Record a sent file in the report. `Failed` is returned to the caller.
fn record(report: &mut TransferReport, sent: Sent) -> Option<String> {
    match sent {
        Sent::Complete(bytes) => {
            report.files += 1;
            report.bytes += bytes;
            None
        }
        Sent::Damaged(bytes, message) => {
            report.files += 1;
            report.bytes += bytes;
            report.diagnostics.warn(Warning::damaged_file(message));
            None
        }
        Sent::Failed(message) => Some(message),
    }
}

/// Push the tree rooted at `local` into `sink`, naming the top entry `remote_name`.
///
/// A failure to create a directory aborts the push. A file that cannot be read or that
/// the remote refuses is recorded in the report and the walk moves on to the next
/// sibling; only a failure of the root entry itself is an error.
pub async fn push_tree<S>(sink: &mut S, local: &Path, remote_name: &str) -> Result<TransferReport>
where
    S: CopySink + ?Sized,
{
    let root = TransferNode::inspect(local)
        .await
        .map_err(|e| Error::Transfer(format!("{}: {e}", local.display())))?;

    let mut report = TransferReport::default();
    let mut buf = vec![0u8; BLOCK_SIZE];

    if !is_sendable_name(remote_name) {
        return Err(Error::Transfer(format!(
            "cannot send entry named {remote_name:?}"
        )));
    }

    let (root_path, root_mode, root_identity) = match root {
        TransferNode::File { path, size, mode } => {
            tracing::debug!(path = %path.display(), size, "pushing file");
            let sent = send_file(sink, &path, remote_name, size, mode, &mut buf).await?;
            return match record(&mut report, sent) {
                None => Ok(report),
                Some(message) => Err(Error::Transfer(message)),
            };
        }
        TransferNode::Directory {
            path,
            mode,
            identity,
        } => (path, mode, identity),
        TransferNode::Other { path } => {
            return Err(Error::Transfer(format!(
                "{}: not a regular file or directory",
                path.display()
            )));
        }
    };

    let entries = fs::read_dir(&root_path)
        .await
        .map_err(|e| Error::Transfer(format!("{}: {e}", root_path.display())))?;
    sink.push_directory(remote_name, root_mode)
        .await
        .map_err(|e| directory_failed(&root_path, e))?;
    report.directories += 1;

    // Open directories with their identities; a directory that is its own ancestor is a
    // symlink loop.
    let mut stack: Vec<(ReadDir, Option<(u64, u64)>)> = vec![(entries, root_identity)];
    while let Some((current, _)) = stack.last_mut() {
        let entry = match current.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                stack.pop();
                sink.leave_directory().await?;
                continue;
            }
            Err(e) => {
                // The rest of this listing is unreadable; close the directory.
                report
                    .diagnostics
                    .warn(Warning::item_failed(format!("listing directory: {e}")));
                stack.pop();
                sink.leave_directory().await?;
                continue;
            }
        };

        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            report.diagnostics.warn(Warning::item_skipped(format!(
                "{}: name is not valid UTF-8",
                path.display()
            )));
            continue;
        };
        if !is_sendable_name(&name) {
            report.diagnostics.warn(Warning::item_skipped(format!(
                "{}: name cannot be sent over the copy protocol",
                path.display()
            )));
            continue;
        }

        let node = match TransferNode::inspect(&path).await {
            Ok(node) => node,
            Err(e) => {
                report
                    .diagnostics
                    .warn(Warning::item_failed(format!("{}: {e}", path.display())));
                continue;
            }
        };

        match node {
            TransferNode::File { path, size, mode } => {
                tracing::debug!(path = %path.display(), size, "pushing file");
                let sent = send_file(sink, &path, &name, size, mode, &mut buf).await?;
                if let Some(message) = record(&mut report, sent) {
                    report.diagnostics.warn(Warning::item_failed(message));
                }
            }
            TransferNode::Directory {
                path,
                mode,
                identity,
            } => {
                if identity.is_some() && stack.iter().any(|(_, open)| *open == identity) {
                    report.diagnostics.warn(Warning::item_skipped(format!(
                        "{}: symbolic link loop",
                        path.display()
                    )));
                    continue;
                }
                let entries = match fs::read_dir(&path).await {
                    Ok(entries) => entries,
                    Err(e) => {
                        report
                            .diagnostics
                            .warn(Warning::item_failed(format!("{}: {e}", path.display())));
                        continue;
                    }
                };
                tracing::debug!(path = %path.display(), "pushing directory");
                sink.push_directory(&name, mode)
                    .await
                    .map_err(|e| directory_failed(&path, e))?;
                report.directories += 1;
                stack.push((entries, identity));
            }
            TransferNode::Other { path } => {
                report.diagnostics.warn(Warning::item_skipped(format!(
                    "{}: not a regular file or directory",
                    path.display()
                )));
            }
        }
    }

    Ok(report)
}

fn directory_failed(path: &Path, error: Error) -> Error {
    match error {
        Error::Remote { message, .. } => Error::Transfer(format!(
            "remote could not create directory for {}: {message}",
            path.display()
        )),
        other => other,
    }
}
