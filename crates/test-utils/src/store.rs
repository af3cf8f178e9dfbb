//! Delegating account store that logs row deletion.

use std::sync::Arc;

use async_trait::async_trait;
use courier_store::{AccountsStore, CrawlChunk, InMemoryAccountsStore, StoreError};
use courier_types::{Account, Aci, Pni};

use crate::log::CallLog;

/// Entry pushed to the [`CallLog`] when a row is deleted.
pub const STORE_DELETE_EVENT: &str = "accounts_store.delete";

/// Wraps an [`InMemoryAccountsStore`], logging row deletions into the shared
/// [`CallLog`] so tests can assert them relative to other collaborator calls.
pub struct InstrumentedStore {
    inner: Arc<InMemoryAccountsStore>,
    log: CallLog,
}

impl InstrumentedStore {
    /// Creates a wrapper around `inner`.
    pub fn new(inner: Arc<InMemoryAccountsStore>, log: CallLog) -> Self {
        Self { inner, log }
    }
}

#[async_trait]
impl AccountsStore for InstrumentedStore {
    async fn create(&self, account: &mut Account) -> Result<bool, StoreError> {
        self.inner.create(account).await
    }

    async fn update(&self, account: &mut Account) -> Result<(), StoreError> {
        self.inner.update(account).await
    }

    async fn change_number(
        &self,
        account: &mut Account,
        new_number: &str,
        new_pni: Pni,
    ) -> Result<(), StoreError> {
        self.inner.change_number(account, new_number, new_pni).await
    }

    async fn set_username(&self, account: &mut Account, username: &str) -> Result<(), StoreError> {
        self.inner.set_username(account, username).await
    }

    async fn clear_username(&self, account: &mut Account) -> Result<(), StoreError> {
        self.inner.clear_username(account).await
    }

    async fn get_by_e164(&self, number: &str) -> Result<Option<Account>, StoreError> {
        self.inner.get_by_e164(number).await
    }

    async fn get_by_pni(&self, pni: Pni) -> Result<Option<Account>, StoreError> {
        self.inner.get_by_pni(pni).await
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        self.inner.get_by_username(username).await
    }

    async fn get_by_aci(&self, aci: Aci) -> Result<Option<Account>, StoreError> {
        self.inner.get_by_aci(aci).await
    }

    async fn get_all_from_start(&self, length: usize) -> Result<CrawlChunk, StoreError> {
        self.inner.get_all_from_start(length).await
    }

    async fn get_all_from(&self, cursor: Aci, length: usize) -> Result<CrawlChunk, StoreError> {
        self.inner.get_all_from(cursor, length).await
    }

    async fn delete(&self, aci: Aci) -> Result<(), StoreError> {
        let result = self.inner.delete(aci).await;
        if result.is_ok() {
            self.log.push(STORE_DELETE_EVENT);
        }
        result
    }
}
