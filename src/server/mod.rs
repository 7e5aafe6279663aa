//! Server Core Module
//!
//! Owns the listening socket, the bounded connection registry, the worker
//! pool, and the start/stop lifecycle.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         TcpServer                            │
//! │                                                              │
//! │  new()   ──> bind listener (fail-fast)                       │
//! │  start() ──> build worker runtime, arm accept loop           │
//! │  stop()  ──> signal shutdown, join workers, clear registry   │
//! │                                                              │
//! │        ┌───────────────┐    admit?    ┌──────────────────┐   │
//! │        │  Accept loop  │─────────────>│ ConnectionHandler│   │
//! │        │               │              │   (one task per  │   │
//! │        │  at capacity: │              │    connection)   │   │
//! │        │  drop socket  │              └──────────────────┘   │
//! │        └───────────────┘                                     │
//! │                │                                             │
//! │                ▼                                             │
//! │       ┌──────────────────────┐                               │
//! │       │ ConnectionRegistry   │  bounded, mutex-protected     │
//! │       └──────────────────────┘                               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Worker pool
//!
//! The dispatcher is a multi-threaded Tokio runtime owned by the server
//! for exactly the period it is running. Any worker thread may execute any
//! connection's next step; the per-connection read/write alternation
//! guarantees no two steps of the same connection ever run concurrently.
//! Holding the runtime in the server is what keeps the dispatcher alive
//! even when no connection has pending work.
//!
//! ## Lifecycle contract
//!
//! `start` and `stop` are idempotent in the states where they are no-ops.
//! Both take `&mut self`, so the borrow checker serializes lifecycle
//! transitions. `stop` must not be called from inside an async context
//! (it joins the worker threads and would deadlock its own pool).
//! `stop` does not return until every in-flight callback has finished;
//! no callback executes after it returns.

pub mod registry;

use crate::connection::{handle_connection, ConnectionStats, MessageHandler};
use registry::ConnectionRegistry;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Default cap on concurrently served connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 8;

/// Construction-time failure: the listen port could not be bound.
///
/// Fatal to the instance; construct anew with a different port.
#[derive(Debug, thiserror::Error)]
#[error("failed to bind TCP listener on port {port}: {source}")]
pub struct BindError {
    /// The port that could not be bound
    pub port: u16,
    /// The underlying socket error
    #[source]
    pub source: io::Error,
}

/// Failure of one `start` invocation.
///
/// Any partially started state has been rolled back; the server is
/// stopped and a later `start` may be attempted again.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    /// The worker runtime could not be built
    #[error("failed to build worker runtime: {0}")]
    Runtime(#[source] io::Error),

    /// The accept loop could not be armed
    #[error("failed to arm accept loop: {0}")]
    Listener(#[source] io::Error),
}

/// A concurrent TCP request/response server.
///
/// Accepts inbound connections up to a configured cap and, for each byte
/// chunk a connection delivers, invokes the caller-supplied
/// [`MessageHandler`] and writes its reply back before reading again.
///
/// # Example
///
/// ```no_run
/// use boltserve::TcpServer;
/// use std::sync::Arc;
///
/// let mut server = TcpServer::new(9876, Arc::new(|req: &[u8]| req.to_vec())).unwrap();
/// server.start(0).unwrap(); // 0 = hardware parallelism
/// assert!(server.is_running());
/// server.stop();
/// ```
pub struct TcpServer {
    /// Resolved listen address (concrete port even when constructed with 0)
    local_addr: SocketAddr,

    /// Handler invoked for every request on every connection
    handler: MessageHandler,

    /// Running flag, readable without blocking
    running: AtomicBool,

    /// Bounded registry of active connections
    registry: Arc<ConnectionRegistry>,

    /// Connection statistics (shared with all connection tasks)
    stats: Arc<ConnectionStats>,

    /// Worker runtime, present exactly while running
    runtime: Option<Runtime>,

    /// Shutdown signal to the accept loop and every connection
    shutdown_tx: Option<watch::Sender<bool>>,

    /// Listener bound at construction, consumed by the first `start`
    standby_listener: Option<std::net::TcpListener>,
}

impl TcpServer {
    /// Creates a server listening on `port` with the default connection
    /// cap of [`DEFAULT_MAX_CONNECTIONS`].
    ///
    /// Binds immediately (fail-fast). Port 0 selects an ephemeral port;
    /// see [`local_addr`](Self::local_addr) for the resolved one.
    pub fn new(port: u16, handler: MessageHandler) -> Result<Self, BindError> {
        Self::with_capacity(port, handler, DEFAULT_MAX_CONNECTIONS)
    }

    /// Creates a server with an explicit connection cap.
    pub fn with_capacity(
        port: u16,
        handler: MessageHandler,
        max_connections: usize,
    ) -> Result<Self, BindError> {
        let listener = bind_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
            .map_err(|source| BindError { port, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| BindError { port, source })?;

        info!(addr = %local_addr, max_connections, "TCP server initialized");

        Ok(Self {
            local_addr,
            handler,
            running: AtomicBool::new(false),
            registry: Arc::new(ConnectionRegistry::new(max_connections)),
            stats: Arc::new(ConnectionStats::new()),
            runtime: None,
            shutdown_tx: None,
            standby_listener: Some(listener),
        })
    }

    /// Starts accepting connections.
    ///
    /// `thread_count` worker threads are spawned; 0 means hardware
    /// parallelism, minimum 1. A no-op (logged) when already running.
    ///
    /// On failure every partially started piece is torn down again and
    /// the server remains stopped.
    pub fn start(&mut self, thread_count: usize) -> Result<(), StartError> {
        if self.is_running() {
            warn!("TCP server already running");
            return Ok(());
        }

        let workers = if thread_count == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            thread_count
        };

        // Re-bind when restarting; the first start consumes the listener
        // bound at construction.
        let std_listener = match self.standby_listener.take() {
            Some(listener) => listener,
            None => bind_listener(self.local_addr).map_err(StartError::Listener)?,
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("boltserve-worker")
            .enable_all()
            .build()
            .map_err(StartError::Runtime)?;

        // Registering the listener needs the runtime's reactor. An error
        // here drops the runtime again, which is the rollback.
        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(std_listener).map_err(StartError::Listener)?
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        runtime.spawn(accept_loop(
            listener,
            Arc::clone(&self.handler),
            Arc::clone(&self.registry),
            Arc::clone(&self.stats),
            shutdown_rx,
        ));

        self.runtime = Some(runtime);
        self.shutdown_tx = Some(shutdown_tx);
        self.running.store(true, Ordering::SeqCst);

        info!(workers, addr = %self.local_addr, "TCP server started");
        Ok(())
    }

    /// Stops the server and blocks until it is fully quiesced.
    ///
    /// Signals shutdown to the accept loop and every connection,
    /// force-closes active connections, joins every worker thread, and
    /// clears the registry. A no-op when not running; safe to call more
    /// than once and from teardown.
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }

        info!("Stopping TCP server...");

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }

        // Dropping the runtime joins every worker thread after in-flight
        // polls finish; no callback executes past this point. Connection
        // tasks either saw the shutdown signal or are dropped here, which
        // closes their sockets.
        if let Some(runtime) = self.runtime.take() {
            drop(runtime);
        }

        self.registry.clear();
        self.running.store(false, Ordering::SeqCst);

        info!("TCP server stopped");
    }

    /// Returns whether the server is currently running, without blocking.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The resolved listen address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Maximum number of concurrently served connections.
    pub fn max_connections(&self) -> usize {
        self.registry.capacity()
    }

    /// Shared connection statistics.
    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Repeatedly accepts inbound connections until shutdown is signalled.
///
/// Admission is one atomic check-and-insert against the registry. At
/// capacity the new socket is dropped immediately: the peer sees the
/// connection close with zero bytes exchanged. Per-connection accept
/// errors are logged and the loop keeps arming the next accept.
async fn accept_loop(
    listener: TcpListener,
    handler: MessageHandler,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<ConnectionStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => match registry.try_admit() {
                Some(id) => {
                    debug!(%id, client = %addr, "Accepted connection");

                    let handler = Arc::clone(&handler);
                    let registry = Arc::clone(&registry);
                    let stats = Arc::clone(&stats);
                    let shutdown = shutdown.clone();

                    tokio::spawn(async move {
                        handle_connection(stream, addr, handler, stats, shutdown).await;
                        registry.remove(id);
                    });
                }
                None => {
                    stats.connection_rejected();
                    warn!(client = %addr, "Connection limit reached, rejecting");
                    // Dropping the socket closes it with nothing sent.
                    drop(stream);
                }
            },
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }

    debug!("Accept loop exited");
}

/// Builds the listening socket.
///
/// SO_REUSEADDR lets a stopped server re-bind its port immediately even
/// while old connections linger in TIME_WAIT.
fn bind_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
