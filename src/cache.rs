use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

/// Cache seam used by the facade for search and stream results. Keys carry a
/// `module|op|input` shape so entries can be cleared per module.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_cache(&self, key: &str, now: i64) -> Result<Option<String>>;
    async fn put_cache(&self, key: &str, payload: &str, expires_at: i64) -> Result<()>;
}

/// In-memory TTL cache. Writes are last-write-wins; expired entries are
/// dropped lazily on read.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

struct CacheEntry {
    payload: String,
    expires_at: i64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove entries whose key starts with `prefix` (all entries when
    /// `None`). Returns the number of rows removed.
    pub fn clear_prefix(&self, prefix: Option<&str>) -> u64 {
        let mut entries = self.entries.lock().unwrap();
        match prefix {
            None => {
                let n = entries.len() as u64;
                entries.clear();
                n
            }
            Some(p) => {
                let before = entries.len();
                entries.retain(|k, _| !k.starts_with(p));
                (before - entries.len()) as u64
            }
        }
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self, now: i64) -> u64 {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at >= now);
        (before - entries.len()) as u64
    }
}

#[async_trait]
impl Storage for MemoryCache {
    async fn get_cache(&self, key: &str, now: i64) -> Result<Option<String>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(e) if e.expires_at >= now => Ok(Some(e.payload.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put_cache(&self, key: &str, payload: &str, expires_at: i64) -> Result<()> {
        self.entries.lock().unwrap().insert(
            key.to_string(),
            CacheEntry { payload: payload.to_string(), expires_at },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_respects_ttl() {
        let cache = MemoryCache::new();
        cache.put_cache("m|search|x", "[1]", 100).await.unwrap();
        assert_eq!(
            cache.get_cache("m|search|x", 99).await.unwrap().as_deref(),
            Some("[1]")
        );
        assert_eq!(cache.get_cache("m|search|x", 101).await.unwrap(), None);
        // The expired row was dropped on read.
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn put_is_last_write_wins() {
        let cache = MemoryCache::new();
        cache.put_cache("k", "a", 100).await.unwrap();
        cache.put_cache("k", "b", 200).await.unwrap();
        assert_eq!(cache.get_cache("k", 150).await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn clear_prefix_scopes_to_module() {
        let cache = MemoryCache::new();
        cache.put_cache("modA|search|x", "1", 100).await.unwrap();
        cache.put_cache("modA|stream|y", "2", 100).await.unwrap();
        cache.put_cache("modB|search|x", "3", 100).await.unwrap();
        assert_eq!(cache.clear_prefix(Some("modA|")), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.clear_prefix(None), 1);
    }
}
