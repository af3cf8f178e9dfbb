//! The durable account table contract and its in-memory engine.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use courier_types::{Account, Aci, Pni};
use parking_lot::RwLock;
use snafu::Snafu;
use uuid::Uuid;

/// Errors surfaced by [`AccountsStore`] operations.
#[derive(Debug, Snafu)]
pub enum StoreError {
    /// A versioned write observed a newer stored revision. Retryable.
    #[snafu(display("contested write for account {aci}"))]
    Contested {
        /// The account whose write lost the race.
        aci: Aci,
    },

    /// Another live account already holds the requested username.
    #[snafu(display("username is not available"))]
    UsernameNotAvailable,

    /// The underlying table transport failed.
    #[snafu(display("account store I/O failure: {message}"))]
    Io {
        /// Transport error description.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

/// Result type for store operations.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// One page of a full-table crawl, ordered by ACI.
#[derive(Debug)]
pub struct CrawlChunk {
    /// The accounts in this page.
    pub accounts: Vec<Account>,
    /// Cursor for the next page; `None` when the scan is exhausted.
    pub last_evaluated: Option<Aci>,
}

/// The durable account table.
///
/// All writes are conditional on the record's revision: a write that loses a
/// race returns [`StoreError::Contested`] and the caller refetches and
/// retries. Successful writes bump the revision both durably and in the
/// argument.
#[async_trait]
pub trait AccountsStore: Send + Sync {
    /// Inserts a new account.
    ///
    /// If a live record already holds `account.number()`, that identity
    /// survives: the stored record is replaced in place with the new
    /// registration data, the argument's ACI is rewritten to the existing
    /// record's, and `false` is returned. Returns `true` for a genuinely
    /// fresh insert.
    async fn create(&self, account: &mut Account) -> Result<bool>;

    /// Writes the account back, conditional on its revision.
    async fn update(&self, account: &mut Account) -> Result<()>;

    /// Atomically swaps the number and phone-number identifier, updating all
    /// secondary indexes; same contested semantics as [`update`].
    ///
    /// [`update`]: AccountsStore::update
    async fn change_number(
        &self,
        account: &mut Account,
        new_number: &str,
        new_pni: Pni,
    ) -> Result<()>;

    /// Atomically assigns a canonical username.
    ///
    /// Fails with [`StoreError::UsernameNotAvailable`] when another live
    /// account holds it; otherwise succeeds or raises
    /// [`StoreError::Contested`].
    async fn set_username(&self, account: &mut Account, username: &str) -> Result<()>;

    /// Atomically clears the username.
    async fn clear_username(&self, account: &mut Account) -> Result<()>;

    /// Point lookup by E.164 number.
    async fn get_by_e164(&self, number: &str) -> Result<Option<Account>>;

    /// Point lookup by phone-number identifier.
    async fn get_by_pni(&self, pni: Pni) -> Result<Option<Account>>;

    /// Point lookup by canonical username.
    async fn get_by_username(&self, username: &str) -> Result<Option<Account>>;

    /// Point lookup by account identifier.
    async fn get_by_aci(&self, aci: Aci) -> Result<Option<Account>>;

    /// First page of a full-table crawl.
    async fn get_all_from_start(&self, length: usize) -> Result<CrawlChunk>;

    /// Continuation of a crawl from a cursor.
    async fn get_all_from(&self, cursor: Aci, length: usize) -> Result<CrawlChunk>;

    /// Removes the record and all its secondary index entries.
    async fn delete(&self, aci: Aci) -> Result<()>;
}

#[derive(Default)]
struct Inner {
    /// Primary records, ordered by raw ACI for crawling.
    accounts: BTreeMap<Uuid, Account>,
    by_number: HashMap<String, Aci>,
    by_pni: HashMap<Pni, Aci>,
    by_username: HashMap<String, Aci>,
}

impl Inner {
    fn index(&mut self, account: &Account) {
        let aci = account.aci();
        self.by_number.insert(account.number().to_owned(), aci);
        self.by_pni.insert(account.pni(), aci);
        if let Some(username) = account.username() {
            self.by_username.insert(username.to_owned(), aci);
        }
    }

    fn unindex(&mut self, account: &Account) {
        self.by_number.remove(account.number());
        self.by_pni.remove(&account.pni());
        if let Some(username) = account.username() {
            self.by_username.remove(username);
        }
    }

    fn store(&mut self, account: &Account) {
        self.index(account);
        self.accounts.insert(account.aci().as_uuid(), account.clone());
    }

    /// Runs a versioned write: checks the stored revision against the
    /// argument, applies `mutate` to the argument, bumps the revision, and
    /// reindexes. Preconditions (uniqueness checks) must hold before calling.
    fn versioned_write(
        &mut self,
        account: &mut Account,
        mutate: impl FnOnce(&mut Account),
    ) -> Result<()> {
        let aci = account.aci();
        let stored_version = match self.accounts.get(&aci.as_uuid()) {
            Some(stored) => stored.version(),
            None => return ContestedSnafu { aci }.fail(),
        };
        if stored_version != account.version() {
            return ContestedSnafu { aci }.fail();
        }

        if let Some(stored) = self.accounts.remove(&aci.as_uuid()) {
            self.unindex(&stored);
        }

        mutate(account);
        account.set_version(stored_version + 1);
        self.store(account);
        Ok(())
    }
}

/// In-memory [`AccountsStore`] engine.
///
/// Backs tests and embedded deployments; adapters for remote tables
/// implement the same trait.
#[derive(Default)]
pub struct InMemoryAccountsStore {
    inner: RwLock<Inner>,
}

impl InMemoryAccountsStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live accounts; handy in tests.
    pub fn len(&self) -> usize {
        self.inner.read().accounts.len()
    }

    /// True when no accounts are stored.
    pub fn is_empty(&self) -> bool {
        self.inner.read().accounts.is_empty()
    }
}

#[async_trait]
impl AccountsStore for InMemoryAccountsStore {
    async fn create(&self, account: &mut Account) -> Result<bool> {
        let mut inner = self.inner.write();

        if let Some(&existing_aci) = inner.by_number.get(account.number()) {
            // Number conflict: the stored identity survives. The new
            // registration data replaces the record under the existing ACI
            // and the caller's argument is rewritten to match.
            let existing_version = inner
                .accounts
                .get(&existing_aci.as_uuid())
                .map(Account::version)
                .unwrap_or_default();

            if let Some(stored) = inner.accounts.remove(&existing_aci.as_uuid()) {
                inner.unindex(&stored);
            }

            account.set_aci(existing_aci);
            account.set_version(existing_version + 1);
            inner.store(account);
            return Ok(false);
        }

        account.set_version(0);
        inner.store(account);
        Ok(true)
    }

    async fn update(&self, account: &mut Account) -> Result<()> {
        let mut inner = self.inner.write();
        inner.versioned_write(account, |_| {})
    }

    async fn change_number(
        &self,
        account: &mut Account,
        new_number: &str,
        new_pni: Pni,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let aci = account.aci();

        if let Some(&holder) = inner.by_number.get(new_number) {
            if holder != aci {
                // The coordinator displaces any live holder before swapping;
                // reaching this point is an ordering bug upstream.
                return IoSnafu {
                    message: format!("number already held by {holder}"),
                }
                .fail();
            }
        }

        inner.versioned_write(account, |a| a.set_number(new_number, new_pni))
    }

    async fn set_username(&self, account: &mut Account, username: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let aci = account.aci();

        if let Some(&holder) = inner.by_username.get(username) {
            if holder != aci {
                return UsernameNotAvailableSnafu.fail();
            }
        }

        inner.versioned_write(account, |a| a.set_username(username))
    }

    async fn clear_username(&self, account: &mut Account) -> Result<()> {
        let mut inner = self.inner.write();
        inner.versioned_write(account, |a| a.clear_username())
    }

    async fn get_by_e164(&self, number: &str) -> Result<Option<Account>> {
        let inner = self.inner.read();
        Ok(inner
            .by_number
            .get(number)
            .and_then(|aci| inner.accounts.get(&aci.as_uuid()))
            .cloned())
    }

    async fn get_by_pni(&self, pni: Pni) -> Result<Option<Account>> {
        let inner = self.inner.read();
        Ok(inner
            .by_pni
            .get(&pni)
            .and_then(|aci| inner.accounts.get(&aci.as_uuid()))
            .cloned())
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<Account>> {
        let inner = self.inner.read();
        Ok(inner
            .by_username
            .get(username)
            .and_then(|aci| inner.accounts.get(&aci.as_uuid()))
            .cloned())
    }

    async fn get_by_aci(&self, aci: Aci) -> Result<Option<Account>> {
        let inner = self.inner.read();
        Ok(inner.accounts.get(&aci.as_uuid()).cloned())
    }

    async fn get_all_from_start(&self, length: usize) -> Result<CrawlChunk> {
        let inner = self.inner.read();
        Ok(crawl(&inner.accounts, Bound::Unbounded, length))
    }

    async fn get_all_from(&self, cursor: Aci, length: usize) -> Result<CrawlChunk> {
        let inner = self.inner.read();
        Ok(crawl(&inner.accounts, Bound::Excluded(cursor.as_uuid()), length))
    }

    async fn delete(&self, aci: Aci) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(stored) = inner.accounts.remove(&aci.as_uuid()) {
            inner.unindex(&stored);
        }
        Ok(())
    }
}

fn crawl(accounts: &BTreeMap<Uuid, Account>, from: Bound<Uuid>, length: usize) -> CrawlChunk {
    let mut page: Vec<Account> = accounts
        .range((from, Bound::Unbounded))
        .take(length + 1)
        .map(|(_, account)| account.clone())
        .collect();

    let last_evaluated = if page.len() > length {
        page.truncate(length);
        page.last().map(Account::aci)
    } else {
        None
    };

    CrawlChunk {
        accounts: page,
        last_evaluated,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use courier_types::{AuthenticationCredentials, Device, DeviceId};

    use super::*;

    fn account(number: &str) -> Account {
        let mut account = Account::new(Aci::random(), number, Pni::random());
        account.add_device(Device::new(
            DeviceId::PRIMARY,
            AuthenticationCredentials::new("pw"),
            chrono::Utc::now(),
        ));
        account
    }

    #[tokio::test]
    async fn test_create_fresh() {
        let store = InMemoryAccountsStore::new();
        let mut a = account("+15550100");

        assert!(store.create(&mut a).await.unwrap());
        assert_eq!(a.version(), 0);

        let found = store.get_by_e164("+15550100").await.unwrap().unwrap();
        assert_eq!(found.aci(), a.aci());

        let by_pni = store.get_by_pni(a.pni()).await.unwrap().unwrap();
        assert_eq!(by_pni.aci(), a.aci());
    }

    #[tokio::test]
    async fn test_create_number_conflict_rewrites_aci() {
        let store = InMemoryAccountsStore::new();
        let mut first = account("+15550100");
        store.create(&mut first).await.unwrap();

        let mut second = account("+15550100");
        let original_aci = second.aci();

        let fresh = store.create(&mut second).await.unwrap();
        assert!(!fresh);
        assert_ne!(second.aci(), original_aci);
        assert_eq!(second.aci(), first.aci());
        assert_eq!(second.version(), first.version() + 1);

        // Only one live record for the number, carrying the new data.
        assert_eq!(store.len(), 1);
        let stored = store.get_by_e164("+15550100").await.unwrap().unwrap();
        assert_eq!(stored.pni(), second.pni());
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let store = InMemoryAccountsStore::new();
        let mut a = account("+15550100");
        store.create(&mut a).await.unwrap();

        a.discoverable_by_phone_number = false;
        store.update(&mut a).await.unwrap();
        assert_eq!(a.version(), 1);

        let stored = store.get_by_aci(a.aci()).await.unwrap().unwrap();
        assert!(!stored.discoverable_by_phone_number);
        assert_eq!(stored.version(), 1);
    }

    #[tokio::test]
    async fn test_stale_version_is_contested() {
        let store = InMemoryAccountsStore::new();
        let mut a = account("+15550100");
        store.create(&mut a).await.unwrap();

        let mut stale = a.clone();
        store.update(&mut a).await.unwrap();

        let err = store.update(&mut stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Contested { .. }));

        // The losing write left the stored record untouched.
        let stored = store.get_by_aci(a.aci()).await.unwrap().unwrap();
        assert_eq!(stored.version(), a.version());
    }

    #[tokio::test]
    async fn test_update_of_missing_account_is_contested() {
        let store = InMemoryAccountsStore::new();
        let mut a = account("+15550100");

        let err = store.update(&mut a).await.unwrap_err();
        assert!(matches!(err, StoreError::Contested { .. }));
    }

    #[tokio::test]
    async fn test_change_number_swaps_indexes() {
        let store = InMemoryAccountsStore::new();
        let mut a = account("+15550100");
        store.create(&mut a).await.unwrap();
        let old_pni = a.pni();

        let new_pni = Pni::random();
        store.change_number(&mut a, "+15550200", new_pni).await.unwrap();

        assert_eq!(a.number(), "+15550200");
        assert_eq!(a.pni(), new_pni);
        assert!(store.get_by_e164("+15550100").await.unwrap().is_none());
        assert!(store.get_by_pni(old_pni).await.unwrap().is_none());
        assert_eq!(
            store.get_by_e164("+15550200").await.unwrap().unwrap().aci(),
            a.aci()
        );
    }

    #[tokio::test]
    async fn test_set_username_uniqueness() {
        let store = InMemoryAccountsStore::new();
        let mut a = account("+15550100");
        let mut b = account("+15550200");
        store.create(&mut a).await.unwrap();
        store.create(&mut b).await.unwrap();

        store.set_username(&mut a, "kirk").await.unwrap();
        assert_eq!(
            store.get_by_username("kirk").await.unwrap().unwrap().aci(),
            a.aci()
        );

        let err = store.set_username(&mut b, "kirk").await.unwrap_err();
        assert!(matches!(err, StoreError::UsernameNotAvailable));

        // Reassigning the same name to its holder is fine.
        store.set_username(&mut a, "kirk").await.unwrap();
    }

    #[tokio::test]
    async fn test_replacing_username_drops_old_index_entry() {
        let store = InMemoryAccountsStore::new();
        let mut a = account("+15550100");
        store.create(&mut a).await.unwrap();

        store.set_username(&mut a, "kirk").await.unwrap();
        store.set_username(&mut a, "spock").await.unwrap();

        assert!(store.get_by_username("kirk").await.unwrap().is_none());
        assert_eq!(
            store.get_by_username("spock").await.unwrap().unwrap().aci(),
            a.aci()
        );
    }

    #[tokio::test]
    async fn test_clear_username() {
        let store = InMemoryAccountsStore::new();
        let mut a = account("+15550100");
        store.create(&mut a).await.unwrap();
        store.set_username(&mut a, "kirk").await.unwrap();

        store.clear_username(&mut a).await.unwrap();
        assert!(a.username().is_none());
        assert!(store.get_by_username("kirk").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_all_index_entries() {
        let store = InMemoryAccountsStore::new();
        let mut a = account("+15550100");
        store.create(&mut a).await.unwrap();
        store.set_username(&mut a, "kirk").await.unwrap();

        store.delete(a.aci()).await.unwrap();

        assert!(store.get_by_aci(a.aci()).await.unwrap().is_none());
        assert!(store.get_by_e164("+15550100").await.unwrap().is_none());
        assert!(store.get_by_pni(a.pni()).await.unwrap().is_none());
        assert!(store.get_by_username("kirk").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_crawl_pages_in_aci_order() {
        let store = InMemoryAccountsStore::new();
        for i in 0..5 {
            let mut a = account(&format!("+1555010{i}"));
            store.create(&mut a).await.unwrap();
        }

        let first = store.get_all_from_start(2).await.unwrap();
        assert_eq!(first.accounts.len(), 2);
        let cursor = first.last_evaluated.unwrap();
        assert_eq!(first.accounts[1].aci(), cursor);

        let second = store.get_all_from(cursor, 10).await.unwrap();
        assert_eq!(second.accounts.len(), 3);
        assert!(second.last_evaluated.is_none());

        // No overlap and globally ordered.
        let mut all: Vec<Uuid> = first
            .accounts
            .iter()
            .chain(second.accounts.iter())
            .map(|a| a.aci().as_uuid())
            .collect();
        let sorted = {
            let mut s = all.clone();
            s.sort();
            s
        };
        assert_eq!(all.len(), 5);
        all.dedup();
        assert_eq!(all.len(), 5);
        assert_eq!(all, sorted);
    }
}
