//! A fully wired coordinator for integration tests.

use std::sync::Arc;
use std::time::Duration;

use courier_accounts::collaborators::{
    Clock, DirectoryQueue, InMemoryPniDirectory, KeyStore, MessagesManager, PendingAccountsStore,
    PniDirectory, PresenceManager, ProfilesManager, ReservedUsernames, SecureBackupClient,
    SecureStorageClient,
};
use courier_accounts::{AccountCache, AccountsManager, DeletedAccountsGate};
use courier_store::{
    AccountsStore, CacheBackend, InMemoryAccountsStore, InMemoryCacheBackend,
    InMemoryTombstoneStore, TombstoneStore,
};
use courier_types::{CacheConfig, GateConfig};

use crate::doubles::{
    FailingCacheBackend, FixedClock, RecordingDirectoryQueue, RecordingKeyStore,
    RecordingMessagesManager, RecordingPendingAccounts, RecordingPresenceManager,
    RecordingProfilesManager, RecordingSecureBackup, RecordingSecureStorage,
    StaticReservedUsernames,
};
use crate::log::CallLog;
use crate::store::InstrumentedStore;

/// Knobs for [`TestHarness::with_options`].
#[derive(Debug, Clone)]
pub struct HarnessOptions {
    /// Cache policy.
    pub cache: CacheConfig,
    /// Gate policy.
    pub gate: GateConfig,
    /// Latency injected into the secure-storage double.
    pub secure_storage_delay: Duration,
    /// Latency injected into the secure-backup double.
    pub secure_backup_delay: Duration,
    /// Wire the manager to a cache transport where every call fails.
    pub failing_cache: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            gate: GateConfig::default(),
            secure_storage_delay: Duration::ZERO,
            secure_backup_delay: Duration::ZERO,
            failing_cache: false,
        }
    }
}

/// An [`AccountsManager`] wired to in-memory engines and recording doubles,
/// with every collaborator exposed for assertions.
pub struct TestHarness {
    /// The coordinator under test.
    pub manager: AccountsManager,
    /// The durable store behind the manager's (instrumented) store handle.
    pub store: Arc<InMemoryAccountsStore>,
    /// The cache transport, unless `failing_cache` replaced it.
    pub cache_backend: Arc<InMemoryCacheBackend>,
    /// The tombstone store behind the gate.
    pub tombstones: Arc<InMemoryTombstoneStore>,
    /// The phone-number-identifier directory.
    pub pni_directory: Arc<InMemoryPniDirectory>,
    /// The directory-queue double.
    pub directory_queue: Arc<RecordingDirectoryQueue>,
    /// The prekey-store double.
    pub keys: Arc<RecordingKeyStore>,
    /// The message-store double.
    pub messages: Arc<RecordingMessagesManager>,
    /// The profile-store double.
    pub profiles: Arc<RecordingProfilesManager>,
    /// The reserved-username index double.
    pub reserved_usernames: Arc<StaticReservedUsernames>,
    /// The pending-verification store double.
    pub pending_accounts: Arc<RecordingPendingAccounts>,
    /// The secure-storage double.
    pub secure_storage: Arc<RecordingSecureStorage>,
    /// The secure-backup double.
    pub secure_backup: Arc<RecordingSecureBackup>,
    /// The presence double.
    pub presence: Arc<RecordingPresenceManager>,
    /// The injectable clock.
    pub clock: Arc<FixedClock>,
    /// Ordered cross-collaborator event log.
    pub log: CallLog,
}

impl TestHarness {
    /// A harness with default policy, instant secure deletions, and a
    /// working cache.
    pub fn new() -> Self {
        Self::with_options(HarnessOptions::default())
    }

    /// A harness with the given knobs.
    pub fn with_options(options: HarnessOptions) -> Self {
        let log = CallLog::new();

        let store = Arc::new(InMemoryAccountsStore::new());
        let cache_backend = Arc::new(InMemoryCacheBackend::new());
        let tombstones = Arc::new(InMemoryTombstoneStore::new());
        let pni_directory = Arc::new(InMemoryPniDirectory::new());
        let directory_queue = Arc::new(RecordingDirectoryQueue::new());
        let keys = Arc::new(RecordingKeyStore::new());
        let messages = Arc::new(RecordingMessagesManager::new());
        let profiles = Arc::new(RecordingProfilesManager::new());
        let reserved_usernames = Arc::new(StaticReservedUsernames::new());
        let pending_accounts = Arc::new(RecordingPendingAccounts::new());
        let secure_storage = Arc::new(RecordingSecureStorage::with_delay(
            log.clone(),
            options.secure_storage_delay,
        ));
        let secure_backup = Arc::new(RecordingSecureBackup::with_delay(
            log.clone(),
            options.secure_backup_delay,
        ));
        let presence = Arc::new(RecordingPresenceManager::new());
        let clock = Arc::new(FixedClock::new());

        let cache_transport: Arc<dyn CacheBackend> = if options.failing_cache {
            Arc::new(FailingCacheBackend::new())
        } else {
            Arc::clone(&cache_backend) as Arc<dyn CacheBackend>
        };

        let manager = AccountsManager::builder()
            .store(Arc::new(InstrumentedStore::new(Arc::clone(&store), log.clone()))
                as Arc<dyn AccountsStore>)
            .pni_directory(Arc::clone(&pni_directory) as Arc<dyn PniDirectory>)
            .cache(AccountCache::new(cache_transport, &options.cache))
            .gate(DeletedAccountsGate::new(
                Arc::clone(&tombstones) as Arc<dyn TombstoneStore>,
                options.gate.clone(),
            ))
            .directory_queue(Arc::clone(&directory_queue) as Arc<dyn DirectoryQueue>)
            .keys(Arc::clone(&keys) as Arc<dyn KeyStore>)
            .messages(Arc::clone(&messages) as Arc<dyn MessagesManager>)
            .profiles(Arc::clone(&profiles) as Arc<dyn ProfilesManager>)
            .reserved_usernames(Arc::clone(&reserved_usernames) as Arc<dyn ReservedUsernames>)
            .pending_accounts(Arc::clone(&pending_accounts) as Arc<dyn PendingAccountsStore>)
            .secure_storage(Arc::clone(&secure_storage) as Arc<dyn SecureStorageClient>)
            .secure_backup(Arc::clone(&secure_backup) as Arc<dyn SecureBackupClient>)
            .presence(Arc::clone(&presence) as Arc<dyn PresenceManager>)
            .clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .build();

        Self {
            manager,
            store,
            cache_backend,
            tombstones,
            pni_directory,
            directory_queue,
            keys,
            messages,
            profiles,
            reserved_usernames,
            pending_accounts,
            secure_storage,
            secure_backup,
            presence,
            clock,
            log,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
