//! The deleted-accounts gate.
//!
//! Serializes the lifecycle transitions that touch a phone number (create,
//! delete, number change) behind per-number leases, and owns the
//! tombstones that let a re-registration reclaim its previous identity.
//! Leases are always acquired before any durable effect, so an abandoned
//! acquisition leaves nothing to undo.

use std::future::Future;
use std::sync::Arc;

use courier_store::TombstoneStore;
use courier_types::{Aci, GateConfig};
use dashmap::DashMap;
use snafu::ResultExt;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{LeaseUnavailableSnafu, Result, TombstoneSnafu};

/// Per-phone-number critical sections plus tombstone bookkeeping.
pub struct DeletedAccountsGate {
    tombstones: Arc<dyn TombstoneStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    config: GateConfig,
}

impl DeletedAccountsGate {
    /// Creates a gate over the given tombstone store.
    pub fn new(tombstones: Arc<dyn TombstoneStore>, config: GateConfig) -> Self {
        Self {
            tombstones,
            locks: DashMap::new(),
            config,
        }
    }

    async fn acquire(&self, number: &str) -> Result<tokio::sync::OwnedMutexGuard<()>> {
        let cell = self
            .locks
            .entry(number.to_owned())
            .or_default()
            .clone();

        timeout(self.config.acquire_timeout, cell.lock_owned())
            .await
            .map_err(|_| LeaseUnavailableSnafu { number }.build())
    }

    /// Runs `f` under the number's lease, handing it the consumed tombstone
    /// for the number, if one is live. Used by registration.
    pub async fn lock_and_take<T, F, Fut>(&self, number: &str, f: F) -> Result<T>
    where
        F: FnOnce(Option<Aci>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _lease = self.acquire(number).await?;
        let recently_deleted = self.tombstones.take(number).await.context(TombstoneSnafu)?;
        if let Some(aci) = recently_deleted {
            debug!(%number, %aci, "re-registration within the tombstone window");
        }
        f(recently_deleted).await
    }

    /// Runs `f` under the number's lease and records its returned ACI as the
    /// number's tombstone. Used by deletion.
    pub async fn lock_and_put<F, Fut>(&self, number: &str, f: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Aci>>,
    {
        let _lease = self.acquire(number).await?;
        let aci = f().await?;
        self.tombstones
            .put(number, aci, self.config.tombstone_ttl)
            .await
            .context(TombstoneSnafu)
    }

    /// Runs `f` under leases on both numbers, handing it the live tombstones
    /// for the old and new number. `f` returns its result together with the
    /// ACI displaced from the new number, if any, which is recorded as the
    /// new number's tombstone: the displaced identity stays reclaimable at
    /// the number it was displaced from. Used by number changes.
    ///
    /// The two leases are taken in lexicographic order so concurrent inverse
    /// renumberings cannot deadlock.
    pub async fn lock_and_update<T, F, Fut>(
        &self,
        old_number: &str,
        new_number: &str,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(Option<Aci>, Option<Aci>) -> Fut,
        Fut: Future<Output = Result<(T, Option<Aci>)>>,
    {
        let (first, second) = if old_number <= new_number {
            (old_number, new_number)
        } else {
            (new_number, old_number)
        };

        let _first_lease = self.acquire(first).await?;
        let _second_lease = if first == second {
            None
        } else {
            Some(self.acquire(second).await?)
        };

        let old_tombstone = self
            .tombstones
            .peek(old_number)
            .await
            .context(TombstoneSnafu)?;
        let new_tombstone = self
            .tombstones
            .peek(new_number)
            .await
            .context(TombstoneSnafu)?;

        let (value, displaced) = f(old_tombstone, new_tombstone).await?;

        if let Some(aci) = displaced {
            self.tombstones
                .put(new_number, aci, self.config.tombstone_ttl)
                .await
                .context(TombstoneSnafu)?;
        }

        Ok(value)
    }
}
