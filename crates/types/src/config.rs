//! Policy configuration for the account system.

use std::time::Duration;

/// Configuration for the write-through account cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Time-to-live applied to every cache entry.
    ///
    /// An account in daily use is rewritten to the cache at least once a day
    /// by its last-seen update; two days is enough slack to flush zombie
    /// entries that are read often but whose owner has gone quiet.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(2 * 24 * 60 * 60),
        }
    }
}

impl CacheConfig {
    /// A short-TTL config for tests.
    pub fn short() -> Self {
        Self {
            ttl: Duration::from_millis(50),
        }
    }
}

/// Configuration for the deleted-accounts gate.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Longest a caller waits for a per-number lease before the operation is
    /// abandoned.
    pub acquire_timeout: Duration,
    /// How long a deleted account's number keeps pointing at its old ACI.
    ///
    /// Must cover a typical re-registration; hours is comfortable, and no
    /// observable contract depends on the exact value.
    pub tombstone_ttl: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(30),
            tombstone_ttl: Duration::from_secs(12 * 60 * 60),
        }
    }
}

impl GateConfig {
    /// A config with tight timings for tests.
    pub fn tight() -> Self {
        Self {
            acquire_timeout: Duration::from_millis(100),
            tombstone_ttl: Duration::from_millis(50),
        }
    }
}
