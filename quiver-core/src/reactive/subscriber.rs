//! Computation identity.
//!
//! Every effect, computed value and watcher gets a [`ComputationId`] when it
//! is created. Subscriber sets and the job queue are keyed by it, which is
//! what makes repeated subscriptions and repeated scheduling idempotent.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComputationId(u64);

impl ComputationId {
    /// Generate a new unique computation ID.
    ///
    /// Uses an atomic counter, so IDs are unique across engines and threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The numeric value of this ID.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl Default for ComputationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ComputationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computation_ids_are_unique() {
        let id1 = ComputationId::new();
        let id2 = ComputationId::new();
        let id3 = ComputationId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn computation_ids_increase() {
        let first = ComputationId::new();
        let second = ComputationId::new();
        assert!(second > first);
        assert_eq!(format!("{}", ComputationId(7)), "#7");
    }
}
