//! The account lifecycle coordinator.

use std::sync::Arc;
use std::time::Instant;

use bon::Builder;
use courier_store::{AccountsStore, CrawlChunk};
use courier_types::{
    country_code, Account, AccountAttributes, AccountBadge, Aci, AuthenticationCredentials,
    Device, DeviceId, Pni, RegistrationLock,
};
use snafu::ResultExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::cache::AccountCache;
use crate::collaborators::{
    Clock, CollaboratorError, DirectoryQueue, KeyStore, MessagesManager, PendingAccountsStore,
    PniDirectory, PresenceManager, ProfilesManager, ReservedUsernames, SecureBackupClient,
    SecureStorageClient,
};
use crate::deleted_accounts::DeletedAccountsGate;
use crate::error::{
    CollaboratorSnafu, Error, InternalSnafu, Result, StoreSnafu, UsernameNotAvailableSnafu,
};
use crate::metrics;
use crate::retry::{update_with_retries, PersistOp};
use crate::usernames;

/// Why an account was deleted; becomes the deletion counter's reason tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionReason {
    /// Removed by an operator.
    AdminDeleted,
    /// Expired after prolonged inactivity.
    Expired,
    /// The owner asked for deletion.
    UserRequest,
}

impl DeletionReason {
    /// The metrics tag value.
    pub fn tag(self) -> &'static str {
        match self {
            DeletionReason::AdminDeleted => "admin",
            DeletionReason::Expired => "expired",
            DeletionReason::UserRequest => "user_request",
        }
    }
}

/// The single authority for account lifecycle operations.
///
/// Shared across request handlers; all state is immutable or owned by
/// thread-safe collaborators. Every method may block on I/O. Successful
/// mutations return a fresh copy of the account and mark the argument stale;
/// the argument must not be reused afterwards.
#[derive(Builder)]
pub struct AccountsManager {
    store: Arc<dyn AccountsStore>,
    pni_directory: Arc<dyn PniDirectory>,
    cache: AccountCache,
    gate: DeletedAccountsGate,
    directory_queue: Arc<dyn DirectoryQueue>,
    keys: Arc<dyn KeyStore>,
    messages: Arc<dyn MessagesManager>,
    profiles: Arc<dyn ProfilesManager>,
    reserved_usernames: Arc<dyn ReservedUsernames>,
    pending_accounts: Arc<dyn PendingAccountsStore>,
    secure_storage: Arc<dyn SecureStorageClient>,
    secure_backup: Arc<dyn SecureBackupClient>,
    presence: Arc<dyn PresenceManager>,
    clock: Arc<dyn Clock>,
}

impl AccountsManager {
    /// Registers an account for `number`.
    ///
    /// Runs under the number's lease. Three mutually-exclusive outcomes:
    ///
    /// - a genuinely new account gets a random ACI;
    /// - re-registering over a live account adopts that account's ACI (the
    ///   store rewrites it) and clears the displaced identity's messages,
    ///   prekeys, and profiles;
    /// - re-registering a recently-deleted number reclaims the tombstoned
    ///   ACI, whose residue was already cleared at deletion time.
    #[instrument(skip_all, fields(number = %number))]
    pub async fn create(
        &self,
        number: &str,
        password: &str,
        user_agent: Option<&str>,
        attributes: &AccountAttributes,
        badges: Vec<AccountBadge>,
    ) -> Result<Account> {
        let start = Instant::now();

        let account = self
            .gate
            .lock_and_take(number, |recently_deleted| async move {
                let now = self.clock.now();
                let reclaimed_tombstone = recently_deleted.is_some();

                let mut device = Device::new(
                    DeviceId::PRIMARY,
                    AuthenticationCredentials::new(password),
                    now,
                );
                device.fetches_messages = attributes.fetches_messages;
                device.registration_id = attributes.registration_id;
                device.name = attributes.name.clone();
                device.capabilities = attributes.capabilities;
                device.user_agent = user_agent.map(str::to_owned);

                let pni = self
                    .pni_directory
                    .pni_for(number)
                    .await
                    .context(CollaboratorSnafu)?;
                let aci = recently_deleted.unwrap_or_else(Aci::random);

                let mut account = Account::new(aci, number, pni);
                account.add_device(device);
                account.registration_lock = attributes
                    .registration_lock
                    .as_deref()
                    .map(RegistrationLock::new);
                account.unidentified_access_key = attributes.unidentified_access_key.clone();
                account.unrestricted_unidentified_access =
                    attributes.unrestricted_unidentified_access;
                account.discoverable_by_phone_number = attributes.discoverable_by_phone_number;
                account.set_badges(now, badges);

                // Pre-image of any live holder of the number: if the store
                // turns this into a takeover, the displaced record's cache
                // entries (its old username in particular) have to go, and
                // the old keys cannot be derived after the row is replaced.
                let displaced = self.store.get_by_e164(number).await.context(StoreSnafu)?;

                let original_aci = account.aci();
                let fresh = self.store.create(&mut account).await.context(StoreSnafu)?;

                // The store rewrites the ACI on a number conflict.
                let actual_aci = account.aci();

                if original_aci != actual_aci {
                    if let Some(displaced) = &displaced {
                        self.cache.delete(displaced).await;
                    }
                }
                self.cache.set(&account).await?;
                self.pending_accounts
                    .remove(number)
                    .await
                    .context(CollaboratorSnafu)?;

                if original_aci != actual_aci {
                    // Taking over a live account: clear out whatever was
                    // stored for the displaced registration.
                    self.messages
                        .clear(actual_aci.as_uuid())
                        .await
                        .context(CollaboratorSnafu)?;
                    self.keys
                        .delete(actual_aci.as_uuid())
                        .await
                        .context(CollaboratorSnafu)?;
                    self.profiles
                        .delete_all(actual_aci)
                        .await
                        .context(CollaboratorSnafu)?;
                }

                // A takeover of a live account is a re-registration; a
                // tombstone reclaim is "recently-deleted" even though the
                // row insert itself was fresh (the old row went away when
                // the account was deleted).
                let kind = if !fresh && original_aci != actual_aci {
                    "re-registration"
                } else if reclaimed_tombstone {
                    "recently-deleted"
                } else {
                    "new"
                };
                metrics::record_create(kind);
                debug!(aci = %actual_aci, kind, "account created");

                if !account.discoverable_by_phone_number {
                    // Explicitly opted out of discoverability.
                    self.directory_queue.delete_account(&account).await;
                }

                Ok(account)
            })
            .await?;

        metrics::observe_create(start.elapsed());
        Ok(account)
    }

    /// Moves the account to `new_number`, displacing any live holder.
    ///
    /// Runs under leases on both numbers. The displaced identity (live
    /// holder or existing tombstone) stays recorded as the new number's
    /// tombstone.
    #[instrument(skip_all, fields(aci = %account.aci()))]
    pub async fn change_number(&self, account: &Account, new_number: &str) -> Result<Account> {
        if account.number() == new_number {
            return Ok(account.clone());
        }

        let old_number = account.number();

        self.gate
            .lock_and_update(old_number, new_number, |_, deleted_new| async move {
                self.cache.delete(account).await;

                let displaced = match self.get_by_e164(new_number).await? {
                    Some(existing) => {
                        self.delete_account_data(&existing).await?;
                        self.directory_queue.delete_account(&existing).await;
                        Some(existing.aci())
                    }
                    None => deleted_new,
                };

                let pni = self
                    .pni_directory
                    .pni_for(new_number)
                    .await
                    .context(CollaboratorSnafu)?;

                let updated = update_with_retries(
                    self.store.as_ref(),
                    account,
                    PersistOp::ChangeNumber {
                        number: new_number.to_owned(),
                        pni,
                    },
                    |_| true,
                )
                .await
                .map_err(|e| e.reject_username_conflict("change_number"))?;

                self.directory_queue
                    .change_phone_number(&updated, old_number, new_number)
                    .await;

                Ok((updated, displaced))
            })
            .await
    }

    /// Assigns a username, canonicalized, if it is neither reserved for nor
    /// held by another account.
    #[instrument(skip_all, fields(aci = %account.aci()))]
    pub async fn set_username(&self, account: &Account, username: &str) -> Result<Account> {
        let canonical = usernames::canonical(username);

        if account.username() == Some(canonical.as_str()) {
            return Ok(account.clone());
        }

        if self
            .reserved_usernames
            .is_reserved(&canonical, account.aci())
            .await
            .context(CollaboratorSnafu)?
        {
            return UsernameNotAvailableSnafu.fail();
        }

        self.cache.delete(account).await;

        update_with_retries(
            self.store.as_ref(),
            account,
            PersistOp::SetUsername {
                username: canonical,
            },
            |_| true,
        )
        .await
    }

    /// Clears the account's username.
    #[instrument(skip_all, fields(aci = %account.aci()))]
    pub async fn clear_username(&self, account: &Account) -> Result<Account> {
        self.cache.delete(account).await;

        update_with_retries(self.store.as_ref(), account, PersistOp::ClearUsername, |_| true)
            .await
            .map_err(|e| e.reject_username_conflict("clear_username"))
    }

    /// Applies a general-purpose mutation to the account.
    ///
    /// The number, PNI, and username cannot change through this path; those
    /// have dedicated operations. The directory queue is told to refresh the
    /// account iff its directory visibility flipped.
    pub async fn update<F>(&self, account: &Account, mut updater: F) -> Result<Account>
    where
        F: FnMut(&mut Account),
    {
        // Updaters passed to the public method are assumed to actually
        // modify the account.
        self.update_filtered(account, |a| {
            updater(a);
            true
        })
        .await
    }

    /// Applies a mutation to one device of the account.
    pub async fn update_device<F>(
        &self,
        account: &Account,
        device_id: DeviceId,
        mut device_updater: F,
    ) -> Result<Account>
    where
        F: FnMut(&mut Device),
    {
        self.update_filtered(account, |a| {
            if let Some(device) = a.device_mut(device_id) {
                device_updater(device);
            }
            true
        })
        .await
    }

    /// Advances a device's last-seen day, skipping the write when the stored
    /// value is already current. Last-seen updates are the most contended
    /// writes in the system, so the skip matters.
    pub async fn update_device_last_seen(
        &self,
        account: &Account,
        device_id: DeviceId,
        last_seen: chrono::DateTime<chrono::Utc>,
    ) -> Result<Account> {
        self.update_filtered(account, |a| match a.device_mut(device_id) {
            Some(device) if device.last_seen < last_seen => {
                device.last_seen = last_seen;
                true
            }
            _ => false,
        })
        .await
    }

    async fn update_filtered<F>(&self, account: &Account, updater: F) -> Result<Account>
    where
        F: FnMut(&mut Account) -> bool,
    {
        let start = Instant::now();

        let was_visible = account.should_be_visible_in_directory();
        let original_number = account.number().to_owned();
        let original_pni = account.pni();
        let original_username = account.username().map(str::to_owned);

        self.cache.delete(account).await;

        let updated = update_with_retries(self.store.as_ref(), account, PersistOp::Update, updater)
            .await
            .map_err(|e| e.reject_username_conflict("a general-purpose update"))?;

        // Diagnostic only: the operation still returns normally, but these
        // fields must never change outside their dedicated operations.
        if updated.number() != original_number {
            error!(
                aci = %updated.aci(),
                "number changed through the general update path; numbers change only via change_number"
            );
        }
        if updated.pni() != original_pni {
            error!(
                aci = %updated.aci(),
                "PNI changed through the general update path; PNIs change only via change_number"
            );
        }
        if updated.username().map(str::to_owned) != original_username {
            error!(
                aci = %updated.aci(),
                "username changed through the general update path; usernames change only via set_username"
            );
        }

        self.cache.set(&updated).await?;
        metrics::observe_update(start.elapsed());

        if was_visible != updated.should_be_visible_in_directory() {
            self.directory_queue.refresh_account(&updated).await;
        }

        Ok(updated)
    }

    /// Looks up an account by E.164 number.
    pub async fn get_by_e164(&self, number: &str) -> Result<Option<Account>> {
        let start = Instant::now();
        let account = match self.cache.get_by_e164(number).await {
            Some(account) => Some(account),
            None => {
                let found = self.store.get_by_e164(number).await.context(StoreSnafu)?;
                self.populate_cache(found.as_ref()).await?;
                found
            }
        };
        metrics::observe_lookup("e164", start.elapsed());
        Ok(account)
    }

    /// Looks up an account by phone-number identifier.
    pub async fn get_by_pni(&self, pni: Pni) -> Result<Option<Account>> {
        let start = Instant::now();
        let account = match self.cache.get_by_pni(pni).await {
            Some(account) => Some(account),
            None => {
                let found = self.store.get_by_pni(pni).await.context(StoreSnafu)?;
                self.populate_cache(found.as_ref()).await?;
                found
            }
        };
        metrics::observe_lookup("pni", start.elapsed());
        Ok(account)
    }

    /// Looks up an account by username.
    pub async fn get_by_username(&self, username: &str) -> Result<Option<Account>> {
        let start = Instant::now();
        let canonical = usernames::canonical(username);
        let account = match self.cache.get_by_username(&canonical).await {
            Some(account) => Some(account),
            None => {
                let found = self
                    .store
                    .get_by_username(&canonical)
                    .await
                    .context(StoreSnafu)?;
                self.populate_cache(found.as_ref()).await?;
                found
            }
        };
        metrics::observe_lookup("username", start.elapsed());
        Ok(account)
    }

    /// Looks up an account by its ACI.
    pub async fn get_by_aci(&self, aci: Aci) -> Result<Option<Account>> {
        let start = Instant::now();
        let account = match self.cache.get_by_aci(aci).await {
            Some(account) => Some(account),
            None => {
                let found = self.store.get_by_aci(aci).await.context(StoreSnafu)?;
                self.populate_cache(found.as_ref()).await?;
                found
            }
        };
        metrics::observe_lookup("aci", start.elapsed());
        Ok(account)
    }

    async fn populate_cache(&self, account: Option<&Account>) -> Result<()> {
        if let Some(account) = account {
            self.cache.set(account).await?;
        }
        Ok(())
    }

    /// First page of a full-table crawl, for background crawlers.
    pub async fn get_all_from_start(&self, length: usize) -> Result<CrawlChunk> {
        self.store.get_all_from_start(length).await.context(StoreSnafu)
    }

    /// Continuation of a crawl from the cursor of a previous chunk.
    pub async fn get_all_from(&self, cursor: Aci, length: usize) -> Result<CrawlChunk> {
        self.store.get_all_from(cursor, length).await.context(StoreSnafu)
    }

    /// Deletes the account everywhere, tombstoning its number so a
    /// re-registration inside the window reclaims the same ACI.
    ///
    /// Not cancellable once the lease is held; runs to completion so the
    /// ACI-stability invariant survives crashes and retries.
    #[instrument(skip_all, fields(aci = %account.aci()))]
    pub async fn delete(&self, account: &Account, reason: DeletionReason) -> Result<()> {
        let start = Instant::now();

        let result = self
            .gate
            .lock_and_put(account.number(), || async move {
                self.delete_account_data(account).await?;
                self.directory_queue.delete_account(account).await;
                Ok(account.aci())
            })
            .await;

        if let Err(e) = result {
            warn!(error = %e, "failed to delete account");
            return Err(e);
        }

        metrics::record_delete(country_code(account.number()), reason.tag());
        metrics::observe_delete(start.elapsed());
        Ok(())
    }

    /// The deletion fan-out shared by explicit deletes and number-change
    /// displacement.
    async fn delete_account_data(&self, account: &Account) -> Result<()> {
        let aci = account.aci();
        let pni = account.pni();

        // Kick off the remote secure-service deletions; they stay in flight
        // while local residue is cleared, and both must land before the
        // durable row goes away so a crashed delete can be retried.
        let storage = {
            let client = Arc::clone(&self.secure_storage);
            tokio::spawn(async move { client.delete_stored_data(aci).await })
        };
        let backups = {
            let client = Arc::clone(&self.secure_backup);
            tokio::spawn(async move { client.delete_backups(aci).await })
        };

        if let Err(e) = self.profiles.delete_all(aci).await {
            warn!(%aci, error = %e, "failed to delete profiles");
        }
        for identifier in [aci.as_uuid(), pni.as_uuid()] {
            if let Err(e) = self.keys.delete(identifier).await {
                warn!(%aci, error = %e, "failed to delete prekeys");
            }
            if let Err(e) = self.messages.clear(identifier).await {
                warn!(%aci, error = %e, "failed to clear messages");
            }
        }

        join_secure_deletion(storage).await?;
        join_secure_deletion(backups).await?;

        self.store.delete(aci).await.context(StoreSnafu)?;
        self.cache.delete(account).await;

        // The row is already gone; a failed disconnect only delays the
        // client noticing.
        for device in account.devices() {
            if let Err(e) = self.presence.disconnect_presence(aci, device.id).await {
                debug!(%aci, device = %device.id, error = %e, "presence disconnect failed");
            }
        }

        Ok(())
    }
}

async fn join_secure_deletion(
    handle: JoinHandle<Result<(), CollaboratorError>>,
) -> Result<()> {
    match handle.await {
        Ok(result) => result.map_err(|source| Error::Collaborator { source }),
        Err(e) => InternalSnafu {
            message: format!("secure-deletion task failed: {e}"),
        }
        .fail(),
    }
}
