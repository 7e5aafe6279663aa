//! # BoltServe - A Concurrent TCP Request/Response Server
//!
//! BoltServe is a multi-threaded TCP server library: it listens on a port,
//! accepts inbound connections up to a configured cap, and for each byte
//! chunk a connection delivers it invokes a caller-supplied handler whose
//! reply is written back before the next chunk is read.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           BoltServe                              │
//! │                                                                  │
//! │  ┌─────────────┐     ┌──────────────┐     ┌───────────────────┐  │
//! │  │  TcpServer  │────>│  Connection  │────>│  MessageHandler   │  │
//! │  │ (accept     │     │  Handler     │     │  (caller-supplied │  │
//! │  │  loop)      │     │  (per-conn   │     │   bytes -> bytes) │  │
//! │  └──────┬──────┘     │   task)      │     └───────────────────┘  │
//! │         │            └──────────────┘                            │
//! │         ▼                                                        │
//! │  ┌──────────────────────┐    ┌────────────────────────────────┐  │
//! │  │ ConnectionRegistry   │    │  Worker pool (Tokio runtime,   │  │
//! │  │ (bounded, mutexed)   │    │  N threads, owned by server)   │  │
//! │  └──────────────────────┘    └────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use boltserve::{responder::ResponseTable, TcpServer};
//!
//! let handler = ResponseTable::new("unknown command")
//!     .with("ping", "pong")
//!     .with("hello", "world")
//!     .into_handler();
//!
//! let mut server = TcpServer::new(9876, handler).unwrap();
//! server.start(0).unwrap(); // 0 = hardware parallelism
//!
//! // ... serve until told otherwise ...
//!
//! server.stop(); // blocks until fully quiesced
//! ```
//!
//! ## Module Overview
//!
//! - [`server`]: accept loop, worker pool, bounded registry, lifecycle
//! - [`connection`]: per-connection read/handle/write state machine
//! - [`responder`]: ready-made handlers (echo, response table)
//!
//! ## Design Highlights
//!
//! ### Strict alternation
//!
//! Each connection cycles read → handle → write; the next read is issued
//! only after the previous response has been fully written. At most one
//! I/O operation is in flight per connection at any instant, so no two
//! steps of the same connection ever run concurrently, even though any
//! worker thread may execute them.
//!
//! ### Failure isolation
//!
//! Construction fails if the port cannot be bound, and `start` fails if
//! the accept loop cannot be armed. Nothing else is observably fallible:
//! I/O errors and handler panics terminate the one affected connection,
//! and a connection arriving above the cap is simply closed with zero
//! bytes exchanged.
//!
//! ### Synchronous handlers
//!
//! The handler runs to completion on whichever worker thread received the
//! read, blocking it for the handler's full duration. Keep handlers fast
//! relative to the worker pool size.

pub mod connection;
pub mod responder;
pub mod server;

// Re-export commonly used types for convenience
pub use connection::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionStats, MessageHandler,
    READ_BUFFER_SIZE,
};
pub use responder::{echo_handler, ResponseTable};
pub use server::{BindError, StartError, TcpServer, DEFAULT_MAX_CONNECTIONS};

/// Version of BoltServe
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
