//! Account lifecycle coordination for the Courier messaging service.
//!
//! [`AccountsManager`] is the single authority through which account records
//! are created, mutated, looked up, renumbered, and deleted. It keeps one
//! consistent view of an account across the durable store and a distributed
//! write-through cache with multiple secondary lookup keys, serializes
//! concurrent mutations through optimistic concurrency with bounded retries,
//! and coordinates the cross-identifier lifecycle transitions
//! (re-registration, phone-number change, deletion) that fan out to the rest
//! of the service.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     AccountsManager                      │
//! │                                                          │
//! │  DeletedAccountsGate ──── per-number leases + tombstones │
//! │        │                                                 │
//! │        ▼                                                 │
//! │  update_with_retries ──── AccountsStore (versioned)      │
//! │        │                                                 │
//! │        ▼                                                 │
//! │  AccountCache ─────────── CacheBackend (TTL KV)          │
//! │        │                                                 │
//! │        ▼                                                 │
//! │  directory queue · keys · messages · profiles ·          │
//! │  secure storage/backup · presence · pending accounts     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The collaborator seams are async traits in [`collaborators`]; anything
//! with real infrastructure behind it (the store, the cache transport, the
//! tombstone store) lives in `courier-store`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
pub mod collaborators;
mod deleted_accounts;
mod error;
mod manager;
mod metrics;
mod retry;
pub mod usernames;

pub use cache::AccountCache;
pub use deleted_accounts::DeletedAccountsGate;
pub use error::{Error, Result};
pub use manager::{AccountsManager, DeletionReason};
