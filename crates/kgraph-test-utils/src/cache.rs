use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;

use kgraph_cache::{CacheOp, DurableCache, InMemoryDurableCache, WriteBatch};
use kgraph_core::keys::GRAPH_PREFIXES;
use kgraph_core::{KgError, KgResult};

#[derive(Debug, Default)]
struct Faults {
    ping_fails: bool,
    /// Executes left to fail
    failing_executes: usize,
    /// Ops of a failing execute applied before the failure
    partial_ops: usize,
    /// `set` fails for keys with this prefix
    failing_set_prefix: Option<String>,
    executes: usize,
}

/// In-memory cache with switchable failures
pub struct FaultyCache {
    inner: InMemoryDurableCache,
    faults: Mutex<Faults>,
}

impl FaultyCache {
    pub fn new() -> Self {
        Self {
            inner: InMemoryDurableCache::new(),
            faults: Mutex::new(Faults::default()),
        }
    }

    pub fn inner(&self) -> &InMemoryDurableCache {
        &self.inner
    }

    pub fn set_ping_fails(&self, fails: bool) {
        self.faults.lock().ping_fails = fails;
    }

    /// Fail the next `count` executes, applying the first `partial_ops`
    /// operations of each before failing
    pub fn fail_next_executes(&self, count: usize, partial_ops: usize) {
        let mut faults = self.faults.lock();
        faults.failing_executes = count;
        faults.partial_ops = partial_ops;
    }

    pub fn fail_sets_with_prefix(&self, prefix: Option<&str>) {
        self.faults.lock().failing_set_prefix = prefix.map(str::to_string);
    }

    /// Number of execute calls seen, failed or not
    pub fn execute_count(&self) -> usize {
        self.faults.lock().executes
    }

    /// Every live key/value in the four graph namespaces
    pub fn graph_namespaces(&self) -> BTreeMap<String, String> {
        GRAPH_PREFIXES
            .iter()
            .flat_map(|prefix| self.inner.dump_prefix(prefix))
            .collect()
    }
}

impl Default for FaultyCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableCache for FaultyCache {
    async fn ping(&self) -> KgResult<()> {
        if self.faults.lock().ping_fails {
            return Err(KgError::DependencyUnavailable("ping refused".to_string()));
        }
        self.inner.ping().await
    }

    async fn get(&self, key: &str) -> KgResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KgResult<()> {
        let refused = matches!(&self.faults.lock().failing_set_prefix, Some(prefix) if key.starts_with(prefix.as_str()));
        if refused {
            return Err(KgError::DependencyUnavailable(format!("set {} refused", key)));
        }
        self.inner.set(key, value, ttl).await
    }

    async fn exists(&self, key: &str) -> KgResult<bool> {
        self.inner.exists(key).await
    }

    async fn scan_prefix(&self, prefix: &str) -> KgResult<Vec<String>> {
        self.inner.scan_prefix(prefix).await
    }

    async fn delete(&self, keys: &[String]) -> KgResult<usize> {
        self.inner.delete(keys).await
    }

    async fn execute(&self, batch: WriteBatch) -> KgResult<()> {
        let partial = {
            let mut faults = self.faults.lock();
            faults.executes += 1;
            if faults.failing_executes > 0 {
                faults.failing_executes -= 1;
                Some(faults.partial_ops)
            } else {
                None
            }
        };

        match partial {
            None => self.inner.execute(batch).await,
            Some(applied) => {
                let mut prefix = WriteBatch::new();
                for op in batch.into_ops().into_iter().take(applied) {
                    match op {
                        CacheOp::Set { key, value, ttl: Some(ttl) } => {
                            prefix.set_with_ttl(key, value, ttl);
                        }
                        CacheOp::Set { key, value, ttl: None } => {
                            prefix.set(key, value);
                        }
                        CacheOp::Delete { keys } => {
                            prefix.delete(keys);
                        }
                    }
                }
                self.inner.execute(prefix).await?;
                Err(KgError::DependencyUnavailable("pipeline execution failed".to_string()))
            }
        }
    }
}
