//! Connection Handler Module
//!
//! This module manages individual client connections. Each accepted
//! connection is driven by its own async task, so any worker thread in the
//! server's pool may execute any connection's next step.
//!
//! ## Connection state machine
//!
//! ```text
//!            Start()
//!              │
//!              ▼
//!   ┌────── Idle ──────┐
//!   │                  │
//!   │                  ▼
//!   │   ┌─────────> Reading ──── EOF / read error / shutdown ───┐
//!   │   │              │                                        │
//!   │   │              │ bytes received                         │
//!   │   │              ▼                                        ▼
//!   │   │           Handling ──── handler fault ─────────>   Closed
//!   │   │              │                                        ▲
//!   │   │              │ response computed                      │
//!   │   │              ▼                                        │
//!   │   └────────── Writing ──── write error / shutdown ────────┘
//!   │        write complete
//!   └──────────────────────────────────────────────────────────────
//! ```
//!
//! `Closed` is terminal. Requests and responses strictly alternate: the
//! next read is issued only after the previous response has been fully
//! written and flushed.
//!
//! ## Wire contract
//!
//! There is no framing. Whatever one read returns (up to
//! [`READ_BUFFER_SIZE`] bytes) is handed to the message handler verbatim as
//! one request, and the handler's full return value is written back as the
//! response. Requests split across reads are not reassembled, and multiple
//! requests pipelined into one read are treated as a single request. This
//! is a known limitation of the wire contract, not an oversight; callers
//! needing framing must layer it inside the handler protocol.
//!
//! ## Failure isolation
//!
//! Every I/O error, peer reset, and handler panic is terminal for that one
//! connection only. It is logged and absorbed here; the server and all
//! other connections are unaffected.

pub mod handler;

// Re-export commonly used types
pub use handler::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionStats, MessageHandler,
    READ_BUFFER_SIZE,
};
