//! Per-connection read/handle/write cycle.
//!
//! A [`ConnectionHandler`] owns one accepted socket and drives the strict
//! read → handle → write → read cycle described in the module docs. The
//! caller-supplied [`MessageHandler`] runs synchronously on whichever
//! worker thread picked up the read, so slow handlers block that worker
//! for their full duration.
//!
//! The handler task keeps the connection alive on its own: once spawned it
//! owns the socket, independent of the server's registry. Deregistering a
//! connection never destroys one with work still in flight.

use bytes::Bytes;
use std::any::Any;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Fixed size of the per-connection read buffer. One read of up to this
/// many bytes is one logical request.
pub const READ_BUFFER_SIZE: usize = 1024;

/// Caller-supplied function mapping a request byte chunk to a response.
///
/// Invoked synchronously for every read that returns data. A panic inside
/// the handler closes that connection (no response is sent) and nothing
/// else.
pub type MessageHandler = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Total number of connections rejected at the capacity cap
    pub connections_rejected: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total requests handled
    pub requests_handled: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn request_handled(&self) {
        self.requests_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// The explicit connection state machine. `Closed` is terminal.
enum ConnectionState {
    Idle,
    Reading,
    Handling(Bytes),
    Writing(Bytes),
    Closed,
}

/// Handles a single client connection.
///
/// Owns the socket, the fixed read buffer, and the handler reference for
/// one connected client.
pub struct ConnectionHandler {
    /// The TCP stream for this connection
    stream: BufWriter<TcpStream>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Fixed-size buffer for incoming requests
    read_buf: Box<[u8]>,

    /// The message handler (shared across connections)
    handler: MessageHandler,

    /// Server shutdown signal; flips to true when the server stops
    shutdown: watch::Receiver<bool>,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The TCP stream for this connection
    /// * `addr` - The client's socket address
    /// * `handler` - The message handler invoked for every request
    /// * `stats` - Shared connection statistics
    /// * `shutdown` - Receiver of the server's shutdown signal
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        handler: MessageHandler,
        stats: Arc<ConnectionStats>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            read_buf: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
            handler,
            shutdown,
            stats,
        }
    }

    /// Runs the connection to completion.
    ///
    /// Drives the state machine until the connection closes, whether by
    /// peer EOF, I/O error, handler fault, or server shutdown.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.drive().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::ServerShutdown) => {
                debug!(client = %self.addr, "Connection closed by server shutdown")
            }
            Err(ConnectionError::HandlerFault(msg)) => {
                warn!(client = %self.addr, fault = %msg, "Handler fault, closing connection")
            }
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        // A second close of an already dead socket must not fault.
        let _ = self.stream.shutdown().await;

        self.stats.connection_closed();
        result
    }

    /// Steps the state machine until it reaches `Closed`.
    async fn drive(&mut self) -> Result<(), ConnectionError> {
        let mut state = ConnectionState::Idle;

        loop {
            state = match state {
                ConnectionState::Idle => ConnectionState::Reading,

                ConnectionState::Reading => match self.read_request().await? {
                    Some(request) => ConnectionState::Handling(request),
                    None => ConnectionState::Closed,
                },

                ConnectionState::Handling(request) => {
                    let response = self.invoke_handler(request)?;
                    ConnectionState::Writing(response)
                }

                ConnectionState::Writing(response) => {
                    self.write_response(&response).await?;
                    ConnectionState::Reading
                }

                ConnectionState::Closed => return Ok(()),
            };
        }
    }

    /// Issues one read into the fixed buffer.
    ///
    /// Returns `Ok(None)` on a clean EOF. The received bytes are the
    /// request, verbatim, with no framing applied.
    async fn read_request(&mut self) -> Result<Option<Bytes>, ConnectionError> {
        let stream = self.stream.get_mut();
        let read_buf = &mut self.read_buf[..];
        let shutdown = &mut self.shutdown;

        let n = tokio::select! {
            res = stream.read(read_buf) => res?,
            _ = shutdown.changed() => return Err(ConnectionError::ServerShutdown),
        };

        if n == 0 {
            return Ok(None);
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read request");

        Ok(Some(Bytes::copy_from_slice(&self.read_buf[..n])))
    }

    /// Invokes the message handler synchronously on the current worker.
    ///
    /// A panic inside the handler is caught and treated like an I/O
    /// error: terminal for this connection, invisible to everyone else.
    fn invoke_handler(&self, request: Bytes) -> Result<Bytes, ConnectionError> {
        let handler = Arc::clone(&self.handler);

        match panic::catch_unwind(AssertUnwindSafe(move || handler(&request))) {
            Ok(response) => {
                self.stats.request_handled();
                Ok(Bytes::from(response))
            }
            Err(payload) => Err(ConnectionError::HandlerFault(panic_message(payload))),
        }
    }

    /// Writes the full response and flushes it.
    ///
    /// The next read is issued only after this completes, so requests and
    /// responses strictly alternate per connection.
    async fn write_response(&mut self, response: &[u8]) -> Result<(), ConnectionError> {
        let stream = &mut self.stream;
        let shutdown = &mut self.shutdown;

        tokio::select! {
            res = async {
                stream.write_all(response).await?;
                stream.flush().await
            } => res?,
            _ = shutdown.changed() => return Err(ConnectionError::ServerShutdown),
        }

        self.stats.bytes_written(response.len());
        trace!(client = %self.addr, bytes = response.len(), "Wrote response");

        Ok(())
    }
}

/// Extracts a printable message from a handler panic payload.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Errors that can occur while handling a connection.
///
/// None of these ever reach the server's API surface; they are absorbed at
/// the connection boundary.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The message handler panicked while processing a request
    #[error("handler fault: {0}")]
    HandlerFault(String),

    /// The server signalled shutdown while this connection was in flight
    #[error("server shutting down")]
    ServerShutdown,
}

/// Handles a client connection to completion.
///
/// Convenience function that creates a [`ConnectionHandler`] and runs it,
/// absorbing any terminal error at the connection boundary.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handler: MessageHandler,
    stats: Arc<ConnectionStats>,
    shutdown: watch::Receiver<bool>,
) {
    let conn = ConnectionHandler::new(stream, addr, handler, stats, shutdown);
    if let Err(e) = conn.run().await {
        match e {
            ConnectionError::ServerShutdown => {}
            ConnectionError::Io(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Binds an ephemeral listener and serves every accepted connection
    /// with the given handler. The returned sender is the shutdown signal.
    async fn spawn_test_server(
        handler: MessageHandler,
    ) -> (SocketAddr, Arc<ConnectionStats>, watch::Sender<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(ConnectionStats::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let stats_clone = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let handler = Arc::clone(&handler);
                let stats = Arc::clone(&stats_clone);
                let shutdown = shutdown_rx.clone();
                tokio::spawn(handle_connection(
                    stream,
                    client_addr,
                    handler,
                    stats,
                    shutdown,
                ));
            }
        });

        (addr, stats, shutdown_tx)
    }

    fn echo() -> MessageHandler {
        Arc::new(|request: &[u8]| request.to_vec())
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let (addr, _, _shutdown) = spawn_test_server(echo()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hello there").await.unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello there");
    }

    #[tokio::test]
    async fn responses_strictly_follow_requests() {
        let handler: MessageHandler = Arc::new(|request: &[u8]| {
            let mut response = b"ack:".to_vec();
            response.extend_from_slice(request);
            response
        });
        let (addr, _, _shutdown) = spawn_test_server(handler).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 64];

        // The second request is only sent after the first response has
        // arrived, so the exchanges must come back in order.
        client.write_all(b"one").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ack:one");

        client.write_all(b"two").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ack:two");
    }

    #[tokio::test]
    async fn handler_panic_closes_connection_without_reply() {
        let handler: MessageHandler = Arc::new(|_request: &[u8]| panic!("fixture fault"));
        let (addr, _, _shutdown) = spawn_test_server(handler).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"anything").await.unwrap();

        // The connection must close with zero response bytes.
        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn shutdown_signal_closes_idle_connection() {
        let (addr, _, shutdown_tx) = spawn_test_server(echo()).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        // Signal shutdown while the connection waits on its next read.
        shutdown_tx.send(true).unwrap();

        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn eof_updates_stats() {
        let (addr, stats, _shutdown) = spawn_test_server(echo()).await;

        {
            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(b"count me").await.unwrap();
            let mut buf = [0u8; 64];
            let _ = client.read(&mut buf).await.unwrap();
        } // client dropped, server sees EOF

        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
        assert_eq!(stats.requests_handled.load(Ordering::Relaxed), 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) >= 8);
        assert!(stats.bytes_written.load(Ordering::Relaxed) >= 8);
    }
}
