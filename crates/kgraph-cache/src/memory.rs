use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{self, Instant};
use tracing::debug;

use kgraph_core::KgResult;

use crate::{CacheOp, DurableCache, WriteBatch};

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Entry in the in-memory cache
struct CacheEntry {
    value: String,
    /// Set when the entry was written with a TTL
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(expiry) if now >= expiry)
    }
}

type Entries = Arc<Mutex<BTreeMap<String, CacheEntry>>>;

/// In-process implementation of [`DurableCache`].
///
/// Expired entries are invisible to reads immediately and purged by a
/// background sweep that stops once the cache is dropped.
pub struct InMemoryDurableCache {
    entries: Entries,
}

impl InMemoryDurableCache {
    pub fn new() -> Self {
        let entries: Entries = Arc::new(Mutex::new(BTreeMap::new()));

        // The sweep needs a runtime; without one expiry stays lazy
        if let Ok(handle) = Handle::try_current() {
            handle.spawn(Self::sweep_task(Arc::downgrade(&entries)));
        }

        Self { entries }
    }

    async fn sweep_task(entries: Weak<Mutex<BTreeMap<String, CacheEntry>>>) {
        let mut interval = time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let Some(entries) = entries.upgrade() else {
                return;
            };

            let now = Instant::now();
            let mut guard = entries.lock();
            let before = guard.len();
            guard.retain(|_, entry| !entry.is_expired(now));
            let removed = before - guard.len();
            if removed > 0 {
                debug!("Durable cache sweep removed {} expired keys", removed);
            }
        }
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live key/value pairs under a prefix, in key order
    pub fn dump_prefix(&self, prefix: &str) -> BTreeMap<String, String> {
        let now = Instant::now();
        self.entries
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    /// Remaining lifetime of a key, if it has one
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .and_then(|entry| entry.expires_at)
            .map(|expiry| expiry.saturating_duration_since(now))
    }
}

impl Default for InMemoryDurableCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableCache for InMemoryDurableCache {
    async fn ping(&self) -> KgResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> KgResult<Option<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KgResult<()> {
        self.entries
            .lock()
            .insert(key.to_string(), CacheEntry::new(value.to_string(), ttl));
        Ok(())
    }

    async fn exists(&self, key: &str) -> KgResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> KgResult<Vec<String>> {
        Ok(self.dump_prefix(prefix).into_keys().collect())
    }

    async fn delete(&self, keys: &[String]) -> KgResult<usize> {
        let now = Instant::now();
        let mut guard = self.entries.lock();
        let removed = keys
            .iter()
            .filter_map(|key| guard.remove(key))
            .filter(|entry| !entry.is_expired(now))
            .count();
        Ok(removed)
    }

    async fn execute(&self, batch: WriteBatch) -> KgResult<()> {
        // One lock for the whole batch, so readers never see half of it
        let mut guard = self.entries.lock();
        for op in batch.into_ops() {
            match op {
                CacheOp::Set { key, value, ttl } => {
                    guard.insert(key, CacheEntry::new(value, ttl));
                }
                CacheOp::Delete { keys } => {
                    for key in keys {
                        guard.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }
}
