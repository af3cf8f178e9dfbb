//! TTL key-value transport backing the write-through account cache.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use snafu::Snafu;

/// Errors surfaced by [`CacheBackend`] operations.
///
/// Callers treat any backend failure as a cache miss; nothing above this
/// trait fails an operation because the cache was unreachable.
#[derive(Debug, Snafu)]
pub enum CacheError {
    /// The cache transport failed.
    #[snafu(display("cache transport failure: {message}"))]
    Backend {
        /// Transport error description.
        message: String,
    },
}

/// Result type for cache transport operations.
pub type Result<T, E = CacheError> = std::result::Result<T, E>;

/// A key-value store with per-entry TTL and multi-key writes.
///
/// One account's entries (the JSON body plus its secondary-key mappings) are
/// written and deleted together; `set_many`/`del_many` exist so transports
/// with atomic multi-key commands can use them.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Writes all entries with the given TTL.
    async fn set_many(&self, entries: Vec<(String, String)>, ttl: Duration) -> Result<()>;

    /// Reads a single key; `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Deletes all given keys.
    async fn del_many(&self, keys: Vec<String>) -> Result<()>;
}

#[derive(Debug)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// In-memory [`CacheBackend`] engine with expiry honored on read.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: DashMap<String, CacheEntry>,
}

impl InMemoryCacheBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held, expired or not; handy in tests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn set_many(&self, entries: Vec<(String, String)>, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now() + ttl;
        for (key, value) in entries {
            self.entries.insert(key, CacheEntry { value, expires_at });
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Drop the guard before removing an expired entry.
        self.entries.remove_if(key, |_, entry| entry.expires_at <= Instant::now());
        Ok(None)
    }

    async fn del_many(&self, keys: Vec<String>) -> Result<()> {
        for key in keys {
            self.entries.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let backend = InMemoryCacheBackend::new();
        backend
            .set_many(
                vec![
                    ("a".into(), "1".into()),
                    ("b".into(), "2".into()),
                ],
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert_eq!(backend.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(backend.get("b").await.unwrap().as_deref(), Some("2"));
        assert_eq!(backend.get("c").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let backend = InMemoryCacheBackend::new();
        backend
            .set_many(vec![("a".into(), "1".into())], Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backend.get("a").await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_del_many() {
        let backend = InMemoryCacheBackend::new();
        backend
            .set_many(
                vec![
                    ("a".into(), "1".into()),
                    ("b".into(), "2".into()),
                    ("c".into(), "3".into()),
                ],
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        backend.del_many(vec!["a".into(), "c".into()]).await.unwrap();

        assert_eq!(backend.get("a").await.unwrap(), None);
        assert_eq!(backend.get("b").await.unwrap().as_deref(), Some("2"));
        assert_eq!(backend.get("c").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_refreshes_value() {
        let backend = InMemoryCacheBackend::new();
        backend
            .set_many(vec![("a".into(), "1".into())], Duration::from_secs(60))
            .await
            .unwrap();
        backend
            .set_many(vec![("a".into(), "2".into())], Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(backend.get("a").await.unwrap().as_deref(), Some("2"));
    }
}
