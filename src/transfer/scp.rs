// ABOUTME: SCP wire protocol over any async byte stream (an SSH exec channel in practice).
// ABOUTME: ScpSink talks to a remote `scp -t`; ScpSource talks to a remote `scp -f`.

use super::protocol::{CopyEvent, CopySink, CopySource};
use crate::ssh::{Error, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Protocol status bytes.
const SCP_OK: u8 = 0;
const SCP_WARNING: u8 = 1;
const SCP_ERROR: u8 = 2;

/// Protocol lines longer than this are rejected.
const MAX_LINE_LENGTH: u64 = 64 * 1024;

/// Quote a path for the remote shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Remote command receiving a tree into `target_dir`.
pub fn sink_command(target_dir: &str) -> String {
    format!("scp -r -d -t {}", shell_quote(target_dir))
}

/// Remote command sending the tree rooted at `path`.
pub fn source_command(path: &str) -> String {
    format!("scp -r -f {}", shell_quote(path))
}

/// Parse the body of a `C` or `D` header (without the leading letter):
/// `<mode> <size> <name>`.
pub fn parse_header(body: &str) -> Result<(u32, u64, String)> {
    let parts: Vec<&str> = body.splitn(3, ' ').collect();
    if parts.len() != 3 {
        return Err(Error::Transfer(format!("invalid header: {body}")));
    }
    let mode = u32::from_str_radix(parts[0], 8)
        .map_err(|_| Error::Transfer(format!("invalid mode: {}", parts[0])))?;
    let size = parts[1]
        .parse::<u64>()
        .map_err(|_| Error::Transfer(format!("invalid size: {}", parts[1])))?;
    Ok((mode & 0o7777, size, parts[2].to_string()))
}

/// Parse a `C` or `D` header line; entry names must be valid UTF-8.
fn decode_header(line: Vec<u8>) -> Result<(u32, u64, String)> {
    let line = String::from_utf8(line).map_err(|e| {
        Error::Transfer(format!(
            "entry name is not valid UTF-8: {:?}",
            String::from_utf8_lossy(e.as_bytes())
        ))
    })?;
    parse_header(&line)
}

/// Text of a status or warning line; invalid UTF-8 is replaced.
async fn read_line<S>(stream: &mut BufReader<S>) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let line = read_raw_line(stream).await?;
    Ok(String::from_utf8_lossy(&line).into_owned())
}

async fn read_raw_line<S>(stream: &mut BufReader<S>) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    (&mut *stream)
        .take(MAX_LINE_LENGTH)
        .read_until(b'\n', &mut line)
        .await?;
    if line.last() != Some(&b'\n') {
        return Err(Error::Transfer(
            "protocol line truncated or too long".to_string(),
        ));
    }
    line.pop();
    Ok(line)
}

async fn read_status<S>(stream: &mut BufReader<S>) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let mut status = [0u8; 1];
    if stream.read(&mut status).await? == 0 {
        return Err(Error::Transfer(
            "remote closed the copy channel".to_string(),
        ));
    }
    match status[0] {
        SCP_OK => Ok(()),
        SCP_WARNING | SCP_ERROR => {
            let message = read_line(stream).await?;
            Err(Error::Remote {
                fatal: status[0] == SCP_ERROR,
                message,
            })
        }
        other => {
            let rest = read_line(stream).await.unwrap_or_default();
            Err(Error::Transfer(format!(
                "unexpected response {:?}",
                format!("{}{}", other as char, rest)
            )))
        }
    }
}

/// Client side of an upload to a remote `scp -t`.
pub struct ScpSink<S> {
    stream: BufReader<S>,
    remaining: u64,
    closed: bool,
}

impl<S> ScpSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            remaining: 0,
            closed: false,
        }
    }

    /// Wait for the remote to signal it is ready.
    pub async fn handshake(&mut self) -> Result<()> {
        read_status(&mut self.stream).await
    }

    async fn request(&mut self, line: String) -> Result<()> {
        if self.remaining > 0 {
            return Err(Error::Transfer(format!(
                "{} bytes of the previous file are still owed",
                self.remaining
            )));
        }
        tracing::debug!(request = %line.trim_end(), "scp request");
        self.stream.get_mut().write_all(line.as_bytes()).await?;
        self.stream.get_mut().flush().await?;
        read_status(&mut self.stream).await
    }

    fn check_name(name: &str) -> Result<()> {
        if name.is_empty() || name.contains('\n') || name.contains('/') {
            return Err(Error::Transfer(format!("cannot send entry named {name:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl<S> CopySink for ScpSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn push_directory(&mut self, name: &str, mode: u32) -> Result<()> {
        Self::check_name(name)?;
        self.request(format!("D{:04o} 0 {}\n", mode & 0o7777, name))
            .await
    }

    async fn push_file(&mut self, name: &str, size: u64, mode: u32) -> Result<()> {
        Self::check_name(name)?;
        self.request(format!("C{:04o} {} {}\n", mode & 0o7777, size, name))
            .await?;
        self.remaining = size;
        if size == 0 {
            self.stream.get_mut().write_all(&[SCP_OK]).await?;
            self.stream.get_mut().flush().await?;
            read_status(&mut self.stream).await?;
        }
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.len() as u64 > self.remaining {
            return Err(Error::Transfer(format!(
                "write of {} bytes exceeds the {} announced bytes left",
                data.len(),
                self.remaining
            )));
        }
        self.stream.get_mut().write_all(data).await?;
        self.remaining -= data.len() as u64;
        if self.remaining == 0 {
            self.stream.get_mut().write_all(&[SCP_OK]).await?;
            self.stream.get_mut().flush().await?;
            read_status(&mut self.stream).await?;
        }
        Ok(())
    }

    async fn leave_directory(&mut self) -> Result<()> {
        self.request("E\n".to_string()).await
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream.get_mut().shutdown().await?;
        Ok(())
    }
}

/// Client side of a download from a remote `scp -f`.
pub struct ScpSource<S> {
    stream: BufReader<S>,
    /// Size of the file announced by the last `C` header, until accepted.
    announced: Option<u64>,
    remaining: u64,
    started: bool,
    closed: bool,
}

impl<S> ScpSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            announced: None,
            remaining: 0,
            started: false,
            closed: false,
        }
    }

    async fn send_status(&mut self, status: u8) -> Result<()> {
        self.stream.get_mut().write_all(&[status]).await?;
        self.stream.get_mut().flush().await?;
        Ok(())
    }

    /// Consume the status byte that trails file data and acknowledge the file.
    async fn finish_file(&mut self) -> Result<()> {
        read_status(&mut self.stream).await?;
        self.send_status(SCP_OK).await
    }
}

#[async_trait]
impl<S> CopySource for ScpSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn next_event(&mut self) -> Result<CopyEvent> {
        if !self.started {
            self.started = true;
            self.send_status(SCP_OK).await?;
        }
        if self.remaining > 0 {
            return Err(Error::Transfer(format!(
                "{} bytes of the current file were not read",
                self.remaining
            )));
        }
        self.announced = None;

        loop {
            let mut kind = [0u8; 1];
            if self.stream.read(&mut kind).await? == 0 {
                return Ok(CopyEvent::EndOfStream);
            }

            match kind[0] {
                b'C' => {
                    let line = read_raw_line(&mut self.stream).await?;
                    let (mode, size, name) = match decode_header(line) {
                        Ok(header) => header,
                        Err(e) => return Ok(CopyEvent::ProtocolError(e.to_string())),
                    };
                    self.announced = Some(size);
                    return Ok(CopyEvent::NewFile { name, size, mode });
                }
                b'D' => {
                    let line = read_raw_line(&mut self.stream).await?;
                    let (mode, _, name) = match decode_header(line) {
                        Ok(header) => header,
                        Err(e) => return Ok(CopyEvent::ProtocolError(e.to_string())),
                    };
                    return Ok(CopyEvent::NewDirectory { name, mode });
                }
                b'E' => {
                    read_raw_line(&mut self.stream).await?;
                    self.send_status(SCP_OK).await?;
                    return Ok(CopyEvent::EndDirectory);
                }
                b'T' => {
                    // Times are not preserved; acknowledge and move on.
                    read_raw_line(&mut self.stream).await?;
                    self.send_status(SCP_OK).await?;
                }
                SCP_WARNING => {
                    let message = read_line(&mut self.stream).await?;
                    return Ok(CopyEvent::Warning(message));
                }
                SCP_ERROR => {
                    let message = read_line(&mut self.stream).await?;
                    return Ok(CopyEvent::ProtocolError(message));
                }
                other => {
                    let rest = read_line(&mut self.stream).await.unwrap_or_default();
                    return Ok(CopyEvent::ProtocolError(format!(
                        "unexpected message: {}{}",
                        other as char, rest
                    )));
                }
            }
        }
    }

    async fn accept(&mut self) -> Result<()> {
        self.send_status(SCP_OK).await?;
        if let Some(size) = self.announced.take() {
            self.remaining = size;
            if size == 0 {
                self.finish_file().await?;
            }
        }
        Ok(())
    }

    async fn deny(&mut self, reason: &str) -> Result<()> {
        self.announced = None;
        let message = format!("{}\n", reason.replace('\n', " "));
        self.stream.get_mut().write_all(&[SCP_ERROR]).await?;
        self.stream.get_mut().write_all(message.as_bytes()).await?;
        self.stream.get_mut().flush().await?;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.stream.read(&mut buf[..want]).await?;
        if n == 0 {
            return Ok(0);
        }
        self.remaining -= n as u64;
        if self.remaining == 0 {
            self.finish_file().await?;
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream.get_mut().shutdown().await?;
        Ok(())
    }
}
