use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::{task::JoinHandle, time::Duration};
use tracing::debug;

use crate::utils::Clock;

pub struct CacheEntry<T> {
    pub value: T,
    pub expiry: DateTime<Utc>,
}

/// Process-local TTL cache fronting point lookups. Expired entries are
/// dropped lazily on access; a background sweep bounds memory for keys that
/// are never re-read. Not shared across instances.
pub struct TtlCache<T> {
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
    clock: Arc<dyn Clock>,
}

impl<T: Clone + Send + Sync + 'static> TtlCache<T> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        let now = self.clock.now();
        let mut entries = self.lock_entries();

        match entries.get(key) {
            Some(entry) if now < entry.expiry => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: &str, value: T, ttl_seconds: u64) {
        let expiry = self.clock.now() + ChronoDuration::seconds(ttl_seconds as i64);
        self.lock_entries()
            .insert(key.to_string(), CacheEntry { value, expiry });
    }

    /// Explicit invalidation; the force-refresh read path deletes and then
    /// falls through to the store.
    pub fn delete(&self, key: &str) -> bool {
        self.lock_entries().remove(key).is_some()
    }

    /// Removes every expired entry, returning how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expiry);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let removed = cache.sweep();
                if removed > 0 {
                    debug!(removed, "Cache sweep removed expired entries");
                }
            }
        })
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Cache key for a user's enrichment payload lookup.
pub fn enriched_user_key(uuid: &uuid::Uuid) -> String {
    format!("enriched_{}", uuid)
}
