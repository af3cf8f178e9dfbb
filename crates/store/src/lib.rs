//! Persistence seams for the Courier account system.
//!
//! Three contracts live here, each paired with an in-memory engine used by
//! tests and embedded deployments:
//!
//! - [`AccountsStore`]: the durable account table with versioned writes and
//!   secondary lookups by number, phone-number identifier, and username
//! - [`CacheBackend`]: a TTL key-value transport backing the write-through
//!   account cache
//! - [`TombstoneStore`]: the short-lived `number → ACI` records that let a
//!   re-registration reclaim its previous identity
//!
//! Adapters for remote infrastructure implement the same traits; nothing
//! above this crate knows which engine is wired in.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod accounts;
mod cache;
mod tombstones;

pub use accounts::{AccountsStore, CrawlChunk, InMemoryAccountsStore, StoreError};
pub use cache::{CacheBackend, CacheError, InMemoryCacheBackend};
pub use tombstones::{InMemoryTombstoneStore, TombstoneError, TombstoneStore};
