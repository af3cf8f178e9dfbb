//! Ordered event log shared across test doubles.

use std::sync::Arc;

use parking_lot::Mutex;

/// A cloneable, ordered log of named events.
///
/// Doubles push an entry when a call completes; tests assert on the relative
/// order (e.g. both secure-service deletions land before the store row goes
/// away).
#[derive(Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn push(&self, event: impl Into<String>) {
        self.entries.lock().push(event.into());
    }

    /// Snapshot of all events in arrival order.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Position of the first event equal to `needle`, if any.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == needle)
    }
}
