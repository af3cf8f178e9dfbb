//! Contracts for the subsystems the coordinator drives.
//!
//! The coordinator has no wire protocol of its own; its external surface is
//! this set of narrow collaborator contracts. Each is an async trait wired in
//! as an `Arc<dyn …>` so deployments and tests choose their own transports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_types::{Account, Aci, DeviceId, Pni};
use dashmap::DashMap;
use snafu::Snafu;
use uuid::Uuid;

/// Failure reported by a downstream collaborator.
#[derive(Debug, Snafu)]
#[snafu(display("{service}: {message}"))]
pub struct CollaboratorError {
    /// Which collaborator failed.
    pub service: &'static str,
    /// Failure description.
    pub message: String,
}

impl CollaboratorError {
    /// Creates an error tagged with the failing collaborator.
    pub fn new(service: &'static str, message: impl Into<String>) -> Self {
        Self {
            service,
            message: message.into(),
        }
    }
}

/// Result type for collaborator calls.
pub type Result<T, E = CollaboratorError> = std::result::Result<T, E>;

/// The phone-number-identifier directory.
#[async_trait]
pub trait PniDirectory: Send + Sync {
    /// Returns the phone-number identifier for `number`.
    ///
    /// Total: allocates an identifier on first request and returns the same
    /// one forever after.
    async fn pni_for(&self, number: &str) -> Result<Pni>;
}

/// In-memory [`PniDirectory`] engine.
#[derive(Debug, Default)]
pub struct InMemoryPniDirectory {
    entries: DashMap<String, Pni>,
}

impl InMemoryPniDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PniDirectory for InMemoryPniDirectory {
    async fn pni_for(&self, number: &str) -> Result<Pni> {
        Ok(*self
            .entries
            .entry(number.to_owned())
            .or_insert_with(Pni::random))
    }
}

/// The downstream worker propagating discoverability state to the
/// contact-discovery service.
///
/// Queue submissions absorb transport failures internally (entries are
/// idempotent and redelivered), so the contract is infallible from the
/// coordinator's point of view.
#[async_trait]
pub trait DirectoryQueue: Send + Sync {
    /// Tells the directory to drop the account.
    async fn delete_account(&self, account: &Account);

    /// Tells the directory to re-evaluate the account's visibility.
    async fn refresh_account(&self, account: &Account);

    /// Tells the directory the account moved from `old` to `new`.
    async fn change_phone_number(&self, account: &Account, old: &str, new: &str);
}

/// Remote secure-value storage.
#[async_trait]
pub trait SecureStorageClient: Send + Sync {
    /// Deletes all stored data for the account.
    async fn delete_stored_data(&self, aci: Aci) -> Result<()>;
}

/// Remote encrypted-backup storage.
#[async_trait]
pub trait SecureBackupClient: Send + Sync {
    /// Deletes all backups for the account.
    async fn delete_backups(&self, aci: Aci) -> Result<()>;
}

/// The message store.
#[async_trait]
pub trait MessagesManager: Send + Sync {
    /// Drops all queued messages for the identifier (ACI or PNI).
    async fn clear(&self, identifier: Uuid) -> Result<()>;
}

/// The prekey store.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Drops all prekeys for the identifier (ACI or PNI).
    async fn delete(&self, identifier: Uuid) -> Result<()>;
}

/// The profile store.
#[async_trait]
pub trait ProfilesManager: Send + Sync {
    /// Drops all profile versions for the account.
    async fn delete_all(&self, aci: Aci) -> Result<()>;
}

/// Pending verification codes for numbers mid-registration.
#[async_trait]
pub trait PendingAccountsStore: Send + Sync {
    /// Drops any pending verification code for the number.
    async fn remove(&self, number: &str) -> Result<()>;
}

/// The reserved-username index.
#[async_trait]
pub trait ReservedUsernames: Send + Sync {
    /// Whether `canonical` is reserved for an account other than `aci`.
    async fn is_reserved(&self, canonical: &str, aci: Aci) -> Result<bool>;
}

/// Connected-device presence.
#[async_trait]
pub trait PresenceManager: Send + Sync {
    /// Disconnects the device's presence, if any. Best effort.
    async fn disconnect_presence(&self, aci: Aci, device: DeviceId) -> Result<()>;
}

/// Wall-clock supplier, injectable for tests.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
