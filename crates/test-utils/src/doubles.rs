//! Recording doubles for the coordinator's collaborator contracts.
//!
//! Each double captures its calls for later assertion. The secure-service
//! doubles can additionally inject latency and failures, which the deletion
//! ordering tests rely on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use courier_accounts::collaborators::{
    Clock, CollaboratorError, DirectoryQueue, KeyStore, MessagesManager, PendingAccountsStore,
    PresenceManager, ProfilesManager, ReservedUsernames, Result, SecureBackupClient,
    SecureStorageClient,
};
use courier_store::{CacheBackend, CacheError};
use courier_types::{Account, Aci, DeviceId};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::log::CallLog;

/// One observed directory-queue submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryEvent {
    /// `delete_account` for the ACI.
    Delete(Aci),
    /// `refresh_account` for the ACI.
    Refresh(Aci),
    /// `change_phone_number` for the ACI.
    ChangeNumber {
        /// The account that moved.
        aci: Aci,
        /// The number it left.
        old: String,
        /// The number it took.
        new: String,
    },
}

/// Directory queue double recording every submission in order.
#[derive(Default)]
pub struct RecordingDirectoryQueue {
    events: Mutex<Vec<DirectoryEvent>>,
}

impl RecordingDirectoryQueue {
    /// Creates an empty queue double.
    pub fn new() -> Self {
        Self::default()
    }

    /// All submissions in arrival order.
    pub fn events(&self) -> Vec<DirectoryEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl DirectoryQueue for RecordingDirectoryQueue {
    async fn delete_account(&self, account: &Account) {
        self.events.lock().push(DirectoryEvent::Delete(account.aci()));
    }

    async fn refresh_account(&self, account: &Account) {
        self.events.lock().push(DirectoryEvent::Refresh(account.aci()));
    }

    async fn change_phone_number(&self, account: &Account, old: &str, new: &str) {
        self.events.lock().push(DirectoryEvent::ChangeNumber {
            aci: account.aci(),
            old: old.to_owned(),
            new: new.to_owned(),
        });
    }
}

/// Prekey store double recording deletions.
#[derive(Default)]
pub struct RecordingKeyStore {
    deleted: Mutex<Vec<Uuid>>,
}

impl RecordingKeyStore {
    /// Creates an empty key-store double.
    pub fn new() -> Self {
        Self::default()
    }

    /// All deleted identifiers in arrival order.
    pub fn deleted(&self) -> Vec<Uuid> {
        self.deleted.lock().clone()
    }

    /// How many times the identifier was deleted.
    pub fn deletions_for(&self, identifier: Uuid) -> usize {
        self.deleted.lock().iter().filter(|u| **u == identifier).count()
    }
}

#[async_trait]
impl KeyStore for RecordingKeyStore {
    async fn delete(&self, identifier: Uuid) -> Result<()> {
        self.deleted.lock().push(identifier);
        Ok(())
    }
}

/// Message store double recording cleared identifiers.
#[derive(Default)]
pub struct RecordingMessagesManager {
    cleared: Mutex<Vec<Uuid>>,
}

impl RecordingMessagesManager {
    /// Creates an empty messages double.
    pub fn new() -> Self {
        Self::default()
    }

    /// All cleared identifiers in arrival order.
    pub fn cleared(&self) -> Vec<Uuid> {
        self.cleared.lock().clone()
    }

    /// How many times the identifier was cleared.
    pub fn clears_for(&self, identifier: Uuid) -> usize {
        self.cleared.lock().iter().filter(|u| **u == identifier).count()
    }
}

#[async_trait]
impl MessagesManager for RecordingMessagesManager {
    async fn clear(&self, identifier: Uuid) -> Result<()> {
        self.cleared.lock().push(identifier);
        Ok(())
    }
}

/// Profile store double recording deletions.
#[derive(Default)]
pub struct RecordingProfilesManager {
    deleted: Mutex<Vec<Aci>>,
}

impl RecordingProfilesManager {
    /// Creates an empty profiles double.
    pub fn new() -> Self {
        Self::default()
    }

    /// All deleted ACIs in arrival order.
    pub fn deleted(&self) -> Vec<Aci> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl ProfilesManager for RecordingProfilesManager {
    async fn delete_all(&self, aci: Aci) -> Result<()> {
        self.deleted.lock().push(aci);
        Ok(())
    }
}

/// Pending-verification store double recording removals.
#[derive(Default)]
pub struct RecordingPendingAccounts {
    removed: Mutex<Vec<String>>,
}

impl RecordingPendingAccounts {
    /// Creates an empty pending-accounts double.
    pub fn new() -> Self {
        Self::default()
    }

    /// All removed numbers in arrival order.
    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().clone()
    }
}

#[async_trait]
impl PendingAccountsStore for RecordingPendingAccounts {
    async fn remove(&self, number: &str) -> Result<()> {
        self.removed.lock().push(number.to_owned());
        Ok(())
    }
}

/// Presence double recording disconnections.
#[derive(Default)]
pub struct RecordingPresenceManager {
    disconnected: Mutex<Vec<(Aci, DeviceId)>>,
}

impl RecordingPresenceManager {
    /// Creates an empty presence double.
    pub fn new() -> Self {
        Self::default()
    }

    /// All disconnections in arrival order.
    pub fn disconnected(&self) -> Vec<(Aci, DeviceId)> {
        self.disconnected.lock().clone()
    }
}

#[async_trait]
impl PresenceManager for RecordingPresenceManager {
    async fn disconnect_presence(&self, aci: Aci, device: DeviceId) -> Result<()> {
        self.disconnected.lock().push((aci, device));
        Ok(())
    }
}

/// Reserved-username index backed by a plain map.
#[derive(Default)]
pub struct StaticReservedUsernames {
    entries: Mutex<HashMap<String, Aci>>,
}

impl StaticReservedUsernames {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `canonical` for `aci`.
    pub fn reserve(&self, canonical: &str, aci: Aci) {
        self.entries.lock().insert(canonical.to_owned(), aci);
    }
}

#[async_trait]
impl ReservedUsernames for StaticReservedUsernames {
    async fn is_reserved(&self, canonical: &str, aci: Aci) -> Result<bool> {
        Ok(self
            .entries
            .lock()
            .get(canonical)
            .is_some_and(|owner| *owner != aci))
    }
}

/// Secure-storage double with injectable latency and failure.
pub struct RecordingSecureStorage {
    delay: Duration,
    fail: AtomicBool,
    calls: Mutex<Vec<Aci>>,
    log: CallLog,
}

impl RecordingSecureStorage {
    /// Creates a double completing immediately.
    pub fn new(log: CallLog) -> Self {
        Self::with_delay(log, Duration::ZERO)
    }

    /// Creates a double whose deletions take `delay` to complete.
    pub fn with_delay(log: CallLog, delay: Duration) -> Self {
        Self {
            delay,
            fail: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            log,
        }
    }

    /// Makes subsequent deletions fail.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// All completed deletions in arrival order.
    pub fn calls(&self) -> Vec<Aci> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SecureStorageClient for RecordingSecureStorage {
    async fn delete_stored_data(&self, aci: Aci) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::new("secure-storage", "injected failure"));
        }
        self.calls.lock().push(aci);
        self.log.push("secure_storage.delete");
        Ok(())
    }
}

/// Secure-backup double with injectable latency and failure.
pub struct RecordingSecureBackup {
    delay: Duration,
    fail: AtomicBool,
    calls: Mutex<Vec<Aci>>,
    log: CallLog,
}

impl RecordingSecureBackup {
    /// Creates a double completing immediately.
    pub fn new(log: CallLog) -> Self {
        Self::with_delay(log, Duration::ZERO)
    }

    /// Creates a double whose deletions take `delay` to complete.
    pub fn with_delay(log: CallLog, delay: Duration) -> Self {
        Self {
            delay,
            fail: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            log,
        }
    }

    /// Makes subsequent deletions fail.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// All completed deletions in arrival order.
    pub fn calls(&self) -> Vec<Aci> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SecureBackupClient for RecordingSecureBackup {
    async fn delete_backups(&self, aci: Aci) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::new("secure-backup", "injected failure"));
        }
        self.calls.lock().push(aci);
        self.log.push("secure_backup.delete");
        Ok(())
    }
}

/// Cache transport where every operation fails, for degraded-cache tests.
#[derive(Debug, Default)]
pub struct FailingCacheBackend;

impl FailingCacheBackend {
    /// Creates the failing transport.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CacheBackend for FailingCacheBackend {
    async fn set_many(
        &self,
        _entries: Vec<(String, String)>,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        Err(CacheError::Backend {
            message: "injected failure".into(),
        })
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Backend {
            message: "injected failure".into(),
        })
    }

    async fn del_many(&self, _keys: Vec<String>) -> Result<(), CacheError> {
        Err(CacheError::Backend {
            message: "injected failure".into(),
        })
    }
}

/// Deterministic clock for tests.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Creates a clock pinned to a fixed, arbitrary test epoch.
    pub fn new() -> Self {
        Self {
            now: Mutex::new(
                Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
                    .single()
                    .expect("valid test epoch"),
            ),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Default for FixedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
