//! Short-lived `number → ACI` records for recently deleted accounts.
//!
//! A tombstone lets a re-registration within its window reclaim the identity
//! the number previously carried. Entries are written by the delete path and
//! consumed (read-and-removed) by the create path, always under the
//! deleted-accounts gate's per-number lease.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use courier_types::Aci;
use dashmap::DashMap;
use snafu::Snafu;

/// Errors surfaced by [`TombstoneStore`] operations.
#[derive(Debug, Snafu)]
pub enum TombstoneError {
    /// The tombstone transport failed.
    #[snafu(display("tombstone store failure: {message}"))]
    Backend {
        /// Transport error description.
        message: String,
    },
}

/// Result type for tombstone operations.
pub type Result<T, E = TombstoneError> = std::result::Result<T, E>;

/// Persistence for deleted-account tombstones.
#[async_trait]
pub trait TombstoneStore: Send + Sync {
    /// Records `number → aci`, expiring after `ttl`. Overwrites any previous
    /// tombstone for the number.
    async fn put(&self, number: &str, aci: Aci, ttl: Duration) -> Result<()>;

    /// Reads and removes the tombstone for `number`.
    async fn take(&self, number: &str) -> Result<Option<Aci>>;

    /// Reads the tombstone for `number` without removing it.
    async fn peek(&self, number: &str) -> Result<Option<Aci>>;
}

/// In-memory [`TombstoneStore`] engine with expiry honored on read.
#[derive(Debug, Default)]
pub struct InMemoryTombstoneStore {
    entries: DashMap<String, (Aci, Instant)>,
}

impl InMemoryTombstoneStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self, number: &str) -> Option<Aci> {
        let entry = self.entries.get(number)?;
        let (aci, expires_at) = *entry;
        (expires_at > Instant::now()).then_some(aci)
    }
}

#[async_trait]
impl TombstoneStore for InMemoryTombstoneStore {
    async fn put(&self, number: &str, aci: Aci, ttl: Duration) -> Result<()> {
        self.entries
            .insert(number.to_owned(), (aci, Instant::now() + ttl));
        Ok(())
    }

    async fn take(&self, number: &str) -> Result<Option<Aci>> {
        let live = self.live(number);
        self.entries.remove(number);
        Ok(live)
    }

    async fn peek(&self, number: &str) -> Result<Option<Aci>> {
        let live = self.live(number);
        if live.is_none() {
            self.entries
                .remove_if(number, |_, (_, expires_at)| *expires_at <= Instant::now());
        }
        Ok(live)
    }
}
