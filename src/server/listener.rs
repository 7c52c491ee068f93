use anyhow::Context;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::info;

use crate::config::Config;
use crate::context::ServerContext;
use crate::http::connection::Connection;
use crate::server::access_log::AccessLog;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The accept loop and the set of live connections.
pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    slots: Arc<Semaphore>,
    log_task: Option<JoinHandle<()>>,
}

impl Server {
    /// Opens the access log and binds the listening socket.
    ///
    /// `config` should already have been through [`Config::prepare`].
    pub async fn bind(config: Config) -> anyhow::Result<Self> {
        let (access_log, log_task) = AccessLog::open(&config.log_file)
            .await
            .with_context(|| format!("cannot open log file {}", config.log_file.display()))?;

        let addr = config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("cannot bind {addr}"))?;

        let slots = Arc::new(Semaphore::new(config.max_clients));
        let ctx = Arc::new(ServerContext::new(config, access_log));

        Ok(Self {
            listener,
            ctx,
            slots,
            log_task: Some(log_task),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts and serves connections until `shutdown` completes.
    ///
    /// At most `max_clients` connections are open at once; while all slots
    /// are taken no `accept` is issued and new clients wait in the kernel
    /// backlog. On shutdown the listener is closed, every open connection
    /// is dropped and the access log is drained.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        info!(
            addr = %self.local_addr()?,
            root = %self.ctx.config.root_dir.display(),
            storage = %self.ctx.config.storage_dir.display(),
            max_clients = self.ctx.config.max_clients,
            "Listening"
        );

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(open = connections.len(), "Shutdown signal received");
                    break;
                }

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!(error = %e, "connection task panicked");
                        }
                    }
                }

                admitted = admit(&self.listener, &self.slots) => {
                    let (socket, peer, permit) = match admitted {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            // Usually fd exhaustion; give open connections time to finish.
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };

                    tracing::debug!(%peer, "Accepted connection");

                    let ctx = Arc::clone(&self.ctx);
                    connections.spawn(async move {
                        let _permit = permit;
                        let mut conn = Connection::new(socket, peer, ctx);
                        if let Err(e) = conn.run().await {
                            tracing::warn!(%peer, error = %e, "Connection error");
                        }
                    });
                }
            }
        }

        drop(self.listener);
        connections.shutdown().await;

        // The writer task stops once the last AccessLog handle is gone.
        drop(self.ctx);
        if let Some(task) = self.log_task.take() {
            let _ = task.await;
        }

        Ok(())
    }
}

/// Waits for a free slot, then accepts one socket.
async fn admit(
    listener: &TcpListener,
    slots: &Arc<Semaphore>,
) -> anyhow::Result<(TcpStream, SocketAddr, OwnedSemaphorePermit)> {
    let permit = Arc::clone(slots).acquire_owned().await?;
    let (socket, peer) = listener.accept().await?;
    Ok((socket, peer, permit))
}
