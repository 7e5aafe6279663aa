//! Responder Module
//!
//! Ready-made [`MessageHandler`]s for building servers on top of the
//! connection engine: a byte-for-byte echo and a trim-and-lookup response
//! table mapping request strings to canned replies.
//!
//! ## Example
//!
//! ```
//! use boltserve::responder::ResponseTable;
//!
//! let handler = ResponseTable::new("unknown command")
//!     .with("ping", "pong")
//!     .with("hello", "world")
//!     .into_handler();
//!
//! assert_eq!(handler(b"ping"), b"pong");
//! assert_eq!(handler(b" hello \r\n"), b"world");
//! assert_eq!(handler(b"bogus"), b"unknown command");
//! ```

use crate::connection::MessageHandler;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Echoes every request back unchanged.
pub fn echo_handler() -> MessageHandler {
    Arc::new(|request: &[u8]| request.to_vec())
}

/// A pattern-matching responder.
///
/// Requests are decoded as UTF-8 (lossily), trimmed of surrounding
/// whitespace, and looked up in the table; misses get the default reply.
#[derive(Debug, Clone)]
pub struct ResponseTable {
    patterns: HashMap<String, String>,
    default_reply: String,
}

impl ResponseTable {
    /// Creates an empty table with the given reply for unknown requests.
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            patterns: HashMap::new(),
            default_reply: default_reply.into(),
        }
    }

    /// Registers a request pattern and its reply. The pattern is trimmed
    /// the same way incoming requests are.
    pub fn with(mut self, request: impl AsRef<str>, reply: impl Into<String>) -> Self {
        self.patterns
            .insert(request.as_ref().trim().to_string(), reply.into());
        self
    }

    /// Computes the reply for one request.
    pub fn reply(&self, request: &[u8]) -> Vec<u8> {
        let text = String::from_utf8_lossy(request);
        let trimmed = text.trim();
        debug!(request = %trimmed, "Looking up response pattern");

        match self.patterns.get(trimmed) {
            Some(reply) => reply.clone().into_bytes(),
            None => self.default_reply.clone().into_bytes(),
        }
    }

    /// Wraps the table into a [`MessageHandler`].
    pub fn into_handler(self) -> MessageHandler {
        Arc::new(move |request: &[u8]| self.reply(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> ResponseTable {
        ResponseTable::new("unknown command")
            .with("ping", "pong")
            .with("hello", "world")
    }

    #[test]
    fn known_patterns_get_their_reply() {
        let table = fixture();
        assert_eq!(table.reply(b"ping"), b"pong");
        assert_eq!(table.reply(b"hello"), b"world");
    }

    #[test]
    fn unknown_patterns_get_the_default_reply() {
        let table = fixture();
        assert_eq!(table.reply(b"what"), b"unknown command");
        assert_eq!(table.reply(b""), b"unknown command");
    }

    #[test]
    fn requests_are_trimmed_before_lookup() {
        let table = fixture();
        assert_eq!(table.reply(b"  ping  "), b"pong");
        assert_eq!(table.reply(b"hello\r\n"), b"world");
    }

    #[test]
    fn non_utf8_requests_fall_through_to_default() {
        let table = fixture();
        assert_eq!(table.reply(&[0xff, 0xfe, 0x00]), b"unknown command");
    }

    #[test]
    fn echo_returns_input_verbatim() {
        let handler = echo_handler();
        let payload = [0u8, 255, 42, 7];
        assert_eq!(handler(&payload), payload);
    }
}
