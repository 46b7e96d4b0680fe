//! Value storage collaborator
//!
//! The node does not own a storage engine. FIND_VALUE and STORE requests are
//! forwarded to a [`ValueStore`] supplied at construction time.

use crate::dht::key::Key;
use crate::dht::message::Value;
use crate::error::{DhtError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Default lifetime of a stored value
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default bound on the number of live entries
pub const DEFAULT_MAX_ENTRIES: usize = 65_536;

/// Storage segment of the DHT
#[async_trait]
pub trait ValueStore: Send + Sync {
    /// Location stored under `key`, if any
    async fn lookup_value(&self, key: &Key) -> Result<Option<Value>>;

    /// Associate `value` with `key`
    async fn store_value(&self, key: Key, value: Value) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

/// In-memory store with per-entry expiry.
///
/// Expired entries are dropped whenever a new value is stored. Once
/// `max_entries` live entries are held, values under new keys are refused.
#[derive(Debug)]
pub struct MemoryStore {
    map: RwLock<HashMap<Key, Entry>>,
    ttl: Duration,
    max_entries: usize,
}

impl MemoryStore {
    /// Create a store with the default TTL
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Create a store whose entries expire after `ttl`
    pub fn with_ttl(ttl: Duration) -> Self {
        Self::with_limits(ttl, DEFAULT_MAX_ENTRIES)
    }

    /// Create a store with explicit expiry and capacity
    pub fn with_limits(ttl: Duration, max_entries: usize) -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.map.read().await.values().filter(|e| e.expires_at > now).count()
    }

    /// Drop expired entries
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        self.map.write().await.retain(|_, entry| entry.expires_at > now);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ValueStore for MemoryStore {
    async fn lookup_value(&self, key: &Key) -> Result<Option<Value>> {
        let map = self.map.read().await;
        Ok(match map.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            _ => None,
        })
    }

    async fn store_value(&self, key: Key, value: Value) -> Result<()> {
        let now = Instant::now();
        let mut map = self.map.write().await;
        map.retain(|_, entry| entry.expires_at > now);
        if !map.contains_key(&key) && map.len() >= self.max_entries {
            return Err(DhtError::storage_error(format!(
                "Store is full ({} entries), refusing {}",
                self.max_entries, key
            )));
        }
        let entry = Entry {
            value,
            expires_at: now + self.ttl,
        };
        map.insert(key, entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_then_lookup() {
        let store = MemoryStore::new();
        let key = Key::hash_of("file.txt");
        assert_eq!(store.lookup_value(&key).await.unwrap(), None);

        store.store_value(key, b"http://host/file.txt".to_vec()).await.unwrap();
        assert_eq!(
            store.lookup_value(&key).await.unwrap(),
            Some(b"http://host/file.txt".to_vec())
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_value_expires_and_is_purged() {
        let store = MemoryStore::with_ttl(Duration::from_millis(10));
        let key = Key::random();
        store.store_value(key, b"hello".to_vec()).await.unwrap();
        assert!(store.lookup_value(&key).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.lookup_value(&key).await.unwrap(), None);
        assert_eq!(store.len().await, 0);

        store.purge_expired().await;
        assert!(store.map.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_store_drops_expired_entries() {
        let store = MemoryStore::with_ttl(Duration::from_millis(10));
        for i in 0..5u8 {
            store.store_value(Key::new([i; 20]), vec![i]).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        store.store_value(Key::MAX, b"fresh".to_vec()).await.unwrap();
        assert_eq!(store.map.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_full_store_refuses_new_keys() {
        let store = MemoryStore::with_limits(DEFAULT_TTL, 2);
        store.store_value(Key::new([1u8; 20]), vec![1]).await.unwrap();
        store.store_value(Key::new([2u8; 20]), vec![2]).await.unwrap();

        let err = store.store_value(Key::new([3u8; 20]), vec![3]).await.unwrap_err();
        assert!(matches!(err, DhtError::StorageError { .. }));

        // Overwriting a held key is still allowed
        store.store_value(Key::new([1u8; 20]), vec![9]).await.unwrap();
        assert_eq!(store.lookup_value(&Key::new([1u8; 20])).await.unwrap(), Some(vec![9]));
    }
}
