//! TTL result cache for idempotent read responses.
//!
//! [`ResultCache`] is a capability trait with an in-process variant and a
//! disabled variant, selected by `search.cache_backend`.

pub mod key;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::types::{CacheBackend, SearchConfig};

pub use key::derive_key;

#[async_trait]
pub trait ResultCache<V>: Send + Sync + Debug
where
    V: Clone + Send + Sync + 'static,
{
    /// Value for `key`, unless absent or expired.
    async fn get(&self, key: &str) -> Option<V>;

    /// Store `value` for `ttl`, replacing any previous value.
    async fn set(&self, key: &str, value: V, ttl: Duration);

    /// Remove every expired entry. Returns how many were removed.
    async fn purge_expired(&self) -> usize;
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// In-process cache behind one coarse mutex.
///
/// Expiry is checked on read; an expired entry is removed when touched or
/// by [`purge_expired`](ResultCache::purge_expired).
#[derive(Debug)]
pub struct InMemoryResultCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V> InMemoryResultCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entries held, expired or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Default for InMemoryResultCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> ResultCache<V> for InMemoryResultCache<V>
where
    V: Clone + Send + Sync + Debug + 'static,
{
    async fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }
        entries.remove(key);
        None
    }

    async fn set(&self, key: &str, value: V, ttl: Duration) {
        let Some(expires_at) = Instant::now().checked_add(ttl) else {
            tracing::warn!(key, ttl = ?ttl, "cache_ttl_out_of_range");
            return;
        };
        self.lock()
            .insert(key.to_string(), CacheEntry { value, expires_at });
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }
}

/// Disabled cache: never stores, never hits.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopResultCache;

#[async_trait]
impl<V> ResultCache<V> for NoopResultCache
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, _key: &str) -> Option<V> {
        None
    }

    async fn set(&self, _key: &str, _value: V, _ttl: Duration) {}

    async fn purge_expired(&self) -> usize {
        0
    }
}

/// Build the cache selected by `search.cache_backend`.
pub fn build_cache<V>(config: &SearchConfig) -> Arc<dyn ResultCache<V>>
where
    V: Clone + Send + Sync + Debug + 'static,
{
    match config.cache_backend {
        CacheBackend::Memory => Arc::new(InMemoryResultCache::new()),
        CacheBackend::Disabled => Arc::new(NoopResultCache),
    }
}
