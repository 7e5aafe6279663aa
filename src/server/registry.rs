//! Connection Registry Module
//!
//! Tracks the set of currently active connections and enforces the
//! concurrency cap. Admission is a single check-and-insert critical
//! section, so two accepts racing for the last free slot can never
//! both win it.
//!
//! Membership in the registry is bookkeeping only: a connection whose
//! task is still running stays alive after `remove`, because the task
//! (not the registry) owns the socket.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Identity of one accepted connection, unique for the lifetime of the
/// registry that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Bounded set of active connections.
///
/// The capacity check and the insert happen under one mutex guard, which
/// is what makes `len() <= capacity` hold at all times.
#[derive(Debug)]
pub struct ConnectionRegistry {
    capacity: usize,
    next_id: AtomicU64,
    active: Mutex<HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    /// Creates a registry that admits at most `capacity` connections.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_id: AtomicU64::new(0),
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Atomically checks capacity and registers a new connection.
    ///
    /// Returns the id of the admitted connection, or `None` when the
    /// registry is full. Rejection is a policy decision, not an error.
    pub fn try_admit(&self) -> Option<ConnectionId> {
        let mut active = self.active.lock().unwrap();
        if active.len() >= self.capacity {
            return None;
        }
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        active.insert(id);
        Some(id)
    }

    /// Deregisters a connection, freeing its slot for a new admission.
    pub fn remove(&self, id: ConnectionId) {
        self.active.lock().unwrap().remove(&id);
    }

    /// Number of currently registered connections.
    pub fn len(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    /// True when no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of simultaneously registered connections.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops every registration. Used during server shutdown after all
    /// connection tasks have been joined.
    pub fn clear(&self) {
        self.active.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn admits_up_to_capacity() {
        let registry = ConnectionRegistry::new(2);

        let a = registry.try_admit();
        let b = registry.try_admit();
        assert!(a.is_some());
        assert!(b.is_some());
        assert_ne!(a, b);

        // Third admission must be refused
        assert!(registry.try_admit().is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn removal_frees_a_slot() {
        let registry = ConnectionRegistry::new(1);

        let id = registry.try_admit().unwrap();
        assert!(registry.try_admit().is_none());

        registry.remove(id);
        assert!(registry.try_admit().is_some());
    }

    #[test]
    fn ids_are_never_reused() {
        let registry = ConnectionRegistry::new(1);

        let first = registry.try_admit().unwrap();
        registry.remove(first);
        let second = registry.try_admit().unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn clear_empties_the_registry() {
        let registry = ConnectionRegistry::new(4);
        for _ in 0..4 {
            registry.try_admit().unwrap();
        }

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.try_admit().is_some());
    }

    #[test]
    fn concurrent_admissions_respect_capacity() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let mut handles = Vec::new();

        // 32 threads race for 8 slots
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || registry.try_admit()));
        }

        let admitted = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count();

        assert_eq!(admitted, 8);
        assert_eq!(registry.len(), 8);
    }
}
