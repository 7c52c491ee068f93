//! Append-only request log.
//!
//! Connections hand finished lines to a single writer task over a channel,
//! so lines from concurrent connections never interleave. A failed write is
//! reported through `tracing` and otherwise ignored.

use std::net::SocketAddr;
use std::path::Path;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One completed request/response cycle.
#[derive(Debug, Clone)]
pub struct AccessEntry<'a> {
    pub peer: SocketAddr,
    pub method: &'a str,
    pub path: &'a str,
    pub status: u16,
    pub bytes: u64,
}

impl AccessEntry<'_> {
    /// `<rfc3339 time> <peer> "<method> <path>" <status> <bytes>`
    pub fn to_line(&self) -> String {
        format!(
            "{} {} \"{} {}\" {} {}\n",
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            self.peer,
            self.method,
            self.path.escape_debug(),
            self.status,
            self.bytes
        )
    }
}

#[derive(Debug, Clone)]
pub struct AccessLog {
    tx: Option<mpsc::UnboundedSender<String>>,
}

impl AccessLog {
    /// Opens `path` for appending and starts the writer task.
    ///
    /// The task ends once every `AccessLog` handle has been dropped and the
    /// queued lines are written.
    pub async fn open(path: &Path) -> std::io::Result<(Self, JoinHandle<()>)> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let task = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                let written = async {
                    file.write_all(line.as_bytes()).await?;
                    file.flush().await
                };
                if let Err(e) = written.await {
                    tracing::warn!(error = %e, "access log write failed");
                }
            }
        });

        Ok((Self { tx: Some(tx) }, task))
    }

    /// A log that drops every entry.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn record(&self, entry: &AccessEntry<'_>) {
        if let Some(tx) = &self.tx {
            // The writer only goes away during shutdown.
            let _ = tx.send(entry.to_line());
        }
    }
}
