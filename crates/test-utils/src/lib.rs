//! Shared test utilities for Courier crates.
//!
//! Provides recording doubles for every collaborator contract of the account
//! coordinator, plus a [`TestHarness`] that wires a coordinator to in-memory
//! engines and those doubles:
//!
//! - [`CallLog`] - shared, ordered log of cross-collaborator events
//! - Recording doubles - capture calls for assertion, with optional injected
//!   latency and failures on the secure-service clients
//! - [`InstrumentedStore`] - delegating store that logs row deletion, for
//!   ordering assertions against the secure-service deletions
//! - [`TestHarness`] - a fully wired [`courier_accounts::AccountsManager`]

#![deny(unsafe_code)]
// Test utilities are expected to panic on failure - that's their purpose
#![allow(clippy::expect_used)]

mod doubles;
mod harness;
mod log;
mod store;

pub use doubles::{
    FailingCacheBackend, FixedClock, RecordingDirectoryQueue, RecordingKeyStore,
    RecordingMessagesManager, RecordingPendingAccounts, RecordingPresenceManager,
    RecordingProfilesManager, RecordingSecureBackup, RecordingSecureStorage,
    StaticReservedUsernames, DirectoryEvent,
};
pub use harness::{HarnessOptions, TestHarness};
pub use log::CallLog;
pub use store::{InstrumentedStore, STORE_DELETE_EVENT};
