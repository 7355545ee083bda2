//! Replay cache for idempotent assessment saves.
//!
//! Keys are scoped per user (`user:key`). The database enforces the same
//! rule durably; this cache answers replays without touching SQLite.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// LRU-based replay cache with TTL
pub struct IdempotencyStore<V> {
    cache: Mutex<LruCache<String, Entry<V>>>,
    ttl: Duration,
}

fn scoped(user_id: &str, key: &str) -> String {
    format!("{}:{}", user_id, key)
}

impl<V: Clone> IdempotencyStore<V> {
    /// * `capacity` - Maximum number of keys to track (at least 1)
    /// * `ttl` - How long a replay returns the cached value
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Cached value for a key still inside its TTL window
    pub async fn get(&self, user_id: &str, key: &str) -> Option<V> {
        let mut cache = self.cache.lock().await;
        let scoped = scoped(user_id, key);
        let fresh = cache
            .get(&scoped)
            .filter(|entry| entry.inserted_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone());
        if fresh.is_none() {
            cache.pop(&scoped);
        }
        fresh
    }

    pub async fn insert(&self, user_id: &str, key: &str, value: V) {
        let mut cache = self.cache.lock().await;
        cache.put(
            scoped(user_id, key),
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop expired entries (called periodically)
    pub async fn prune_expired(&self) -> usize {
        let mut cache = self.cache.lock().await;
        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            cache.pop(key);
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_key_misses() {
        let store = IdempotencyStore::<u32>::new(100, Duration::from_secs(60));
        assert_eq!(store.get("u", "key1").await, None);
    }

    #[tokio::test]
    async fn test_idempotency_replay() {
        let store = IdempotencyStore::new(100, Duration::from_secs(60));
        store.insert("u", "key1", 7).await;
        assert_eq!(store.get("u", "key1").await, Some(7));
        assert_eq!(store.get("other", "key1").await, None);
    }

    #[tokio::test]
    async fn test_expired_record_is_not_replayed() {
        let store = IdempotencyStore::new(100, Duration::from_millis(50));
        store.insert("u", "key1", 1).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(store.get("u", "key1").await, None);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_least_recent_key_is_evicted() {
        let store = IdempotencyStore::new(2, Duration::from_secs(60));
        store.insert("u", "key1", 1).await;
        store.insert("u", "key2", 2).await;
        store.insert("u", "key3", 3).await; // Evicts key1

        assert_eq!(store.get("u", "key1").await, None);
        assert_eq!(store.get("u", "key2").await, Some(2));
        assert_eq!(store.get("u", "key3").await, Some(3));
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let store = IdempotencyStore::new(10, Duration::from_millis(20));
        store.insert("u", "a", 1).await;
        store.insert("u", "b", 2).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.prune_expired().await, 2);
    }
}
