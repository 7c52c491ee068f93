use bytes::BytesMut;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, timeout, timeout_at};

use crate::context::ServerContext;
use crate::error::HttpError;
use crate::http::parser::{ParseError, RequestParser};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::state::{ConnectionState, Event, transition};
use crate::server::access_log::AccessEntry;

const READ_CHUNK: usize = 4096;

/// Longest wait for the peer to finish sending after a closing response.
const LINGER: Duration = Duration::from_secs(2);

/// Drives one client connection through the request/response cycle.
///
/// The socket type is generic so tests can run a connection over an
/// in-memory duplex pipe.
pub struct Connection<S> {
    stream: S,
    peer: SocketAddr,
    ctx: Arc<ServerContext>,
    input: BytesMut,
    parser: RequestParser,
    state: ConnectionState,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: SocketAddr, ctx: Arc<ServerContext>) -> Self {
        Self {
            stream,
            peer,
            ctx,
            input: BytesMut::with_capacity(READ_CHUNK),
            parser: RequestParser::new(),
            state: ConnectionState::Idle,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Runs until the connection closes.
    ///
    /// Returns an error only for socket failures; protocol problems are
    /// answered with an error response instead.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let idle = self.ctx.config.keep_alive_timeout;
        let mut failure = None;
        let mut graceful = false;

        loop {
            let mut state = std::mem::replace(&mut self.state, ConnectionState::Closed);

            let outcome = match &mut state {
                ConnectionState::Closed => break,

                ConnectionState::Dispatching(req) => Ok(self.dispatch(req, idle).await),

                ConnectionState::Rejected(err) => Ok(self.reject(err.clone())),

                ConnectionState::WritingResponse { writer, .. } => {
                    match writer.write_to_stream(&mut self.stream, idle).await {
                        Ok(()) => Ok(Event::Flushed),
                        Err(e) if e.kind() == ErrorKind::TimedOut => {
                            tracing::warn!(peer = %self.peer, "response write stalled, closing");
                            Ok(Event::TimedOut)
                        }
                        Err(e) => Err(e.into()),
                    }
                }

                reading => {
                    let waiting = reading.name();
                    self.read(idle, waiting).await
                }
            };

            let event = outcome.unwrap_or_else(|e| {
                failure = Some(e);
                Event::Failed
            });

            graceful = matches!(
                (&state, &event),
                (ConnectionState::WritingResponse { keep_alive: false, .. }, Event::Flushed)
            );

            self.state = transition(state, event, &mut self.input, &mut self.parser);
        }

        if graceful {
            self.linger(idle).await;
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn read(&mut self, idle: Duration, waiting: &'static str) -> anyhow::Result<Event> {
        self.input.reserve(READ_CHUNK);

        match timeout(idle, self.stream.read_buf(&mut self.input)).await {
            Ok(Ok(0)) => {
                if waiting != "idle" {
                    tracing::debug!(peer = %self.peer, state = waiting, "peer closed mid-request");
                }
                Ok(Event::PeerClosed)
            }
            Ok(Ok(_)) => Ok(Event::Received),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                tracing::debug!(peer = %self.peer, state = waiting, "idle timeout, closing");
                Ok(Event::TimedOut)
            }
        }
    }

    /// Closes after a final response without resetting the connection.
    ///
    /// The write half is shut down first so the peer sees the response and
    /// then EOF. Anything the peer still sends, such as the rest of a refused
    /// upload, is read and dropped until it closes or `LINGER` runs out;
    /// unread input at close time turns the FIN into a reset.
    async fn linger(&mut self, idle: Duration) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!(peer = %self.peer, error = %e, "shutdown failed");
            return;
        }

        let deadline = Instant::now() + idle.min(LINGER);
        loop {
            self.input.clear();
            self.input.reserve(READ_CHUNK);

            match timeout_at(deadline, self.stream.read_buf(&mut self.input)).await {
                Ok(Ok(n)) if n > 0 => continue,
                _ => break,
            }
        }
    }

    async fn dispatch(&self, req: &Request, idle: Duration) -> Event {
        let keep_alive = req.keep_alive();
        let response = self.ctx.router.handle(req).await;

        self.log(req.method.as_str(), &req.path, &response);

        let mut response = response.with_header("Date", http_date());
        if keep_alive {
            response = response.with_header("Keep-Alive", format!("timeout={}", idle.as_secs()));
        }

        Event::Dispatched {
            response,
            keep_alive,
        }
    }

    fn reject(&self, err: ParseError) -> Event {
        tracing::debug!(peer = %self.peer, error = %err, "rejecting request");

        let response = HttpError::from(err).into_response();
        self.log("-", "-", &response);

        Event::Dispatched {
            response: response.with_header("Date", http_date()),
            keep_alive: false,
        }
    }

    fn log(&self, method: &str, path: &str, response: &Response) {
        let status = response.status.as_u16();

        tracing::info!(peer = %self.peer, method, path, status, "request completed");

        self.ctx.access_log.record(&AccessEntry {
            peer: self.peer,
            method,
            path,
            status,
            bytes: response.body.len(),
        });
    }
}

/// IMF-fixdate, as used by the `Date` header.
fn http_date() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::server::access_log::AccessLog;

    fn peer() -> SocketAddr {
        "127.0.0.1:9".parse().unwrap()
    }

    fn context(dir: &tempfile::TempDir, idle_secs: u64) -> Arc<ServerContext> {
        let root = dir.path().canonicalize().unwrap();
        let storage = root.join("uploads");
        std::fs::create_dir_all(&storage).unwrap();
        std::fs::write(root.join("index.html"), "<h1>home</h1>").unwrap();

        let config = Config {
            port: 0,
            ip: "127.0.0.1".parse().unwrap(),
            root_dir: root.clone(),
            storage_dir: storage,
            max_clients: 4,
            log_file: root.join("access.log"),
            keep_alive_timeout: Duration::from_secs(idle_secs),
        };

        Arc::new(ServerContext::new(config, AccessLog::disabled()))
    }

    async fn read_all(client: &mut tokio::io::DuplexStream) -> String {
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        String::from_utf8_lossy(&out).into_owned()
    }

    #[tokio::test]
    async fn serves_two_requests_on_one_connection() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let mut conn = Connection::new(server, peer(), context(&dir, 5));

        client
            .write_all(b"GET / HTTP/1.1\r\n\r\nGET /missing HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        conn.run().await.unwrap();
        drop(conn);

        let text = read_all(&mut client).await;
        let first = text.find("HTTP/1.1 200 OK").unwrap();
        let second = text.find("HTTP/1.1 404 Not Found").unwrap();
        assert!(first < second);
        assert!(text.contains("<h1>home</h1>"));
        assert!(text.contains("Connection: close"));
    }

    #[tokio::test]
    async fn malformed_request_gets_400_then_close() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let mut conn = Connection::new(server, peer(), context(&dir, 5));

        client.write_all(b"NONSENSE\r\n\r\n").await.unwrap();
        client.shutdown().await.unwrap();

        conn.run().await.unwrap();
        assert!(matches!(conn.state(), ConnectionState::Closed));
        drop(conn);

        let text = read_all(&mut client).await;
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let (_client, server) = tokio::io::duplex(1024);
        let mut conn = Connection::new(server, peer(), context(&dir, 2));

        // With the clock paused, the runtime jumps straight to the deadline.
        conn.run().await.unwrap();
        assert!(matches!(conn.state(), ConnectionState::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reader_gets_the_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, 2);
        let contents: Vec<u8> = (0..=255u8).cycle().take(20 * 1024).collect();
        std::fs::write(ctx.config.root_dir.join("big.bin"), &contents).unwrap();

        // The pipe holds far less than the file, and the client drains it
        // slowly enough that the whole transfer outlasts the idle timeout.
        let (mut client, server) = tokio::io::duplex(1024);
        let mut conn = Connection::new(server, peer(), ctx);
        let served = tokio::spawn(async move { conn.run().await });

        client
            .write_all(b"GET /big.bin HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let mut received = Vec::new();
        let mut chunk = [0u8; 512];
        loop {
            let n = client.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&chunk[..n]);
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        served.await.unwrap().unwrap();

        let body = received.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        assert_eq!(received.len() - body, contents.len());
        assert_eq!(&received[body..], &contents[..]);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_reader_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir, 2);
        std::fs::write(ctx.config.root_dir.join("big.bin"), vec![0u8; 20 * 1024]).unwrap();

        let (mut client, server) = tokio::io::duplex(1024);
        let mut conn = Connection::new(server, peer(), ctx);

        client.write_all(b"GET /big.bin HTTP/1.1\r\n\r\n").await.unwrap();

        // The client never reads, so the first full pipe stalls the write.
        conn.run().await.unwrap();
        assert!(matches!(conn.state(), ConnectionState::Closed));
    }
}
