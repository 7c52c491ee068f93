use std::io::{self, ErrorKind};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::http::response::{Body, Response};

const HTTP_VERSION: &str = "HTTP/1.1";

/// Read size used when streaming a file body.
const FILE_CHUNK: usize = 64 * 1024;

/// Renders the status line and headers, plus the body when it is in memory.
fn serialize_head(resp: &Response) -> Vec<u8> {
    let inline = resp.body.as_bytes().unwrap_or_default();
    let mut buf = Vec::with_capacity(128 + inline.len());

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    // Headers
    for (k, v) in &resp.headers {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    buf.extend_from_slice(inline);

    buf
}

/// A response on its way to the peer.
///
/// The head (and an in-memory body) is rendered up front and a cursor
/// tracks how much of it was written. A file body follows in chunks read
/// straight from disk, so a download never sits in memory as a whole.
#[derive(Debug)]
pub struct ResponseWriter {
    buffer: Vec<u8>,
    written: usize,
    file: Option<(File, u64)>,
}

impl ResponseWriter {
    pub fn new(response: Response) -> Self {
        let buffer = serialize_head(&response);
        let file = match response.body {
            Body::File { file, len } => Some((file, len)),
            Body::Full(_) => None,
        };

        Self {
            buffer,
            written: 0,
            file,
        }
    }

    /// Rendered bytes not yet written.
    pub fn pending(&self) -> &[u8] {
        &self.buffer[self.written..]
    }

    /// Marks `n` more rendered bytes as written.
    pub fn advance(&mut self, n: usize) {
        self.written = (self.written + n).min(self.buffer.len());
    }

    pub fn is_done(&self) -> bool {
        self.written == self.buffer.len() && self.file.is_none()
    }

    /// Writes the rest of the response.
    ///
    /// Every single write must make progress within `idle`; a stalled peer
    /// yields an error of kind [`ErrorKind::TimedOut`]. A slow reader that
    /// keeps draining is never cut off.
    pub async fn write_to_stream<W>(&mut self, stream: &mut W, idle: Duration) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        while !self.pending().is_empty() {
            let n = write_within(stream, self.pending(), idle).await?;
            self.advance(n);
        }

        if let Some((mut file, len)) = self.file.take() {
            send_file(stream, &mut file, len, idle).await?;
        }

        match timeout(idle, stream.flush()).await {
            Ok(result) => result,
            Err(_) => Err(stalled()),
        }
    }
}

async fn send_file<W>(
    stream: &mut W,
    file: &mut File,
    len: u64,
    idle: Duration,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut chunk = vec![0u8; FILE_CHUNK.min(len as usize)];
    let mut remaining = len;

    while remaining > 0 {
        let want = remaining.min(chunk.len() as u64) as usize;
        let n = file.read(&mut chunk[..want]).await?;
        if n == 0 {
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "file shrank while it was being sent",
            ));
        }

        let mut sent = 0;
        while sent < n {
            sent += write_within(stream, &chunk[sent..n], idle).await?;
        }
        remaining -= n as u64;
    }

    Ok(())
}

async fn write_within<W>(stream: &mut W, buf: &[u8], idle: Duration) -> io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    match timeout(idle, stream.write(buf)).await {
        Ok(Ok(0)) => Err(io::Error::new(
            ErrorKind::WriteZero,
            "connection closed while writing",
        )),
        Ok(result) => result,
        Err(_) => Err(stalled()),
    }
}

fn stalled() -> io::Error {
    io::Error::new(ErrorKind::TimedOut, "no write progress within the idle timeout")
}
