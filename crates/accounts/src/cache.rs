//! Write-through cache of account records.
//!
//! Each account occupies up to four keys: the JSON-encoded record under its
//! ACI, and one `ACI`-valued mapping per secondary key (number, PNI,
//! username). The key scheme is a compatibility surface shared with other
//! readers of the cache:
//!
//! ```text
//! Account3::<aci-uuid>   → UTF-8 JSON of the account record
//! AccountMap::<number>   → aci-uuid string
//! AccountMap::<pni-uuid> → aci-uuid string
//! AccountMap::<username> → aci-uuid string
//! ```
//!
//! The cache is best-effort everywhere: transport failures and undecodable
//! entries degrade to a miss and are logged, never surfaced. Authoritative
//! answers always come from the durable store.

use std::sync::Arc;
use std::time::Duration;

use courier_store::CacheBackend;
use courier_types::{Account, Aci, CacheConfig, Pni};
use snafu::ResultExt;
use tracing::warn;
use uuid::Uuid;

use crate::error::{CacheEncodeSnafu, Result};

const ACCOUNT_KEY_PREFIX: &str = "Account3::";
const MAP_KEY_PREFIX: &str = "AccountMap::";

fn account_key(aci: Aci) -> String {
    format!("{ACCOUNT_KEY_PREFIX}{}", aci.as_uuid())
}

fn map_key(secondary: &str) -> String {
    format!("{MAP_KEY_PREFIX}{secondary}")
}

/// Write-through cache adapter over a TTL key-value transport.
#[derive(Clone)]
pub struct AccountCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl AccountCache {
    /// Creates a cache over the given transport.
    pub fn new(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            ttl: config.ttl,
        }
    }

    /// Writes the account's four entries.
    ///
    /// Transport failures are logged and swallowed; an encoding failure is a
    /// programming bug and surfaces.
    pub async fn set(&self, account: &Account) -> Result<()> {
        let aci = account.aci();
        let body = serde_json::to_string(account).context(CacheEncodeSnafu { aci })?;
        let aci_value = aci.as_uuid().to_string();

        let mut entries = vec![
            (map_key(&account.pni().as_uuid().to_string()), aci_value.clone()),
            (map_key(account.number()), aci_value.clone()),
            (account_key(aci), body),
        ];
        if let Some(username) = account.username() {
            entries.push((map_key(username), aci_value));
        }

        if let Err(e) = self.backend.set_many(entries, self.ttl).await {
            warn!(aci = %aci, error = %e, "failed to write account to cache");
        }
        Ok(())
    }

    /// Deletes the account's entries.
    ///
    /// Must be called with the pre-image of any secondary key about to
    /// change; the new value cannot derive the old key.
    pub async fn delete(&self, account: &Account) {
        let mut keys = vec![
            map_key(account.number()),
            map_key(&account.pni().as_uuid().to_string()),
            account_key(account.aci()),
        ];
        if let Some(username) = account.username() {
            keys.push(map_key(username));
        }

        if let Err(e) = self.backend.del_many(keys).await {
            warn!(aci = %account.aci(), error = %e, "failed to delete account from cache");
        }
    }

    /// Reads an account by its ACI. Any failure is a miss.
    pub async fn get_by_aci(&self, aci: Aci) -> Option<Account> {
        let body = match self.backend.get(&account_key(aci)).await {
            Ok(body) => body?,
            Err(e) => {
                warn!(aci = %aci, error = %e, "cache read failed");
                return None;
            }
        };

        let mut account: Account = match serde_json::from_str(&body) {
            Ok(account) => account,
            Err(e) => {
                warn!(aci = %aci, error = %e, "undecodable account in cache");
                return None;
            }
        };

        // The ACI is not part of the body; it comes from the key.
        account.set_aci(aci);

        if account.pni().is_nil() {
            warn!(aci = %aci, "account loaded from cache is missing a PNI");
        }

        Some(account)
    }

    /// Reads an account through a secondary-key mapping.
    async fn get_by_secondary(&self, secondary: &str) -> Option<Account> {
        let mapped = match self.backend.get(&map_key(secondary)).await {
            Ok(mapped) => mapped?,
            Err(e) => {
                warn!(error = %e, "cache read failed");
                return None;
            }
        };

        let aci = match mapped.parse::<Uuid>() {
            Ok(uuid) => Aci::new(uuid),
            Err(e) => {
                warn!(error = %e, "undecodable ACI mapping in cache");
                return None;
            }
        };

        self.get_by_aci(aci).await
    }

    /// Reads an account by E.164 number.
    pub async fn get_by_e164(&self, number: &str) -> Option<Account> {
        self.get_by_secondary(number).await
    }

    /// Reads an account by phone-number identifier.
    pub async fn get_by_pni(&self, pni: Pni) -> Option<Account> {
        self.get_by_secondary(&pni.as_uuid().to_string()).await
    }

    /// Reads an account by canonical username.
    pub async fn get_by_username(&self, username: &str) -> Option<Account> {
        self.get_by_secondary(username).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use courier_store::InMemoryCacheBackend;
    use courier_types::{AuthenticationCredentials, Device, DeviceId};

    use super::*;

    fn cache() -> (Arc<InMemoryCacheBackend>, AccountCache) {
        let backend = Arc::new(InMemoryCacheBackend::new());
        let cache = AccountCache::new(backend.clone(), &CacheConfig::default());
        (backend, cache)
    }

    fn account() -> Account {
        let mut account = Account::new(Aci::random(), "+15550100", Pni::random());
        account.add_device(Device::new(
            DeviceId::PRIMARY,
            AuthenticationCredentials::new("pw"),
            chrono::Utc::now(),
        ));
        account
    }

    #[tokio::test]
    async fn test_set_then_get_by_every_key() {
        let (_, cache) = cache();
        let mut a = account();
        a.set_username("kirk");
        cache.set(&a).await.unwrap();

        for found in [
            cache.get_by_aci(a.aci()).await,
            cache.get_by_e164("+15550100").await,
            cache.get_by_pni(a.pni()).await,
            cache.get_by_username("kirk").await,
        ] {
            let found = found.unwrap();
            assert_eq!(found.aci(), a.aci());
            assert_eq!(found.number(), a.number());
        }
    }

    #[tokio::test]
    async fn test_miss_on_absent_account() {
        let (_, cache) = cache();
        assert!(cache.get_by_aci(Aci::random()).await.is_none());
        assert!(cache.get_by_e164("+15550100").await.is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_every_key() {
        let (backend, cache) = cache();
        let mut a = account();
        a.set_username("kirk");
        cache.set(&a).await.unwrap();
        assert_eq!(backend.len(), 4);

        cache.delete(&a).await;
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_body_is_a_miss() {
        let (backend, cache) = cache();
        let aci = Aci::random();
        backend
            .set_many(
                vec![(format!("Account3::{}", aci.as_uuid()), "not json".into())],
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert!(cache.get_by_aci(aci).await.is_none());
    }

    #[tokio::test]
    async fn test_undecodable_mapping_is_a_miss() {
        let (backend, cache) = cache();
        backend
            .set_many(
                vec![("AccountMap::+15550100".into(), "not-a-uuid".into())],
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert!(cache.get_by_e164("+15550100").await.is_none());
    }

    #[tokio::test]
    async fn test_aci_is_reattached_from_the_key() {
        let (_, cache) = cache();
        let a = account();
        cache.set(&a).await.unwrap();

        // The body itself carries no ACI.
        let found = cache.get_by_aci(a.aci()).await.unwrap();
        assert_eq!(found.aci(), a.aci());
        assert!(!found.aci().is_nil());
    }
}
