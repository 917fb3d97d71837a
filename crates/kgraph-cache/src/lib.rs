//! Durable cache for the knowledge graph key namespaces.
//!
//! The batch committer talks to the cache through [`DurableCache`]. An
//! in-memory implementation is always available; the Redis implementation
//! is compiled in with the `redis` feature.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use kgraph_core::{KgError, KgResult};

mod batch;
mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use batch::{CacheOp, WriteBatch};
pub use memory::InMemoryDurableCache;

/// Key/value store shared by every coordinator instance in a deployment
#[async_trait]
pub trait DurableCache: Send + Sync {
    /// Check that the cache is reachable
    async fn ping(&self) -> KgResult<()>;

    /// Get the value stored under a key
    async fn get(&self, key: &str) -> KgResult<Option<String>>;

    /// Store a value, optionally expiring after `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KgResult<()>;

    /// Whether a live value exists under a key
    async fn exists(&self, key: &str) -> KgResult<bool>;

    /// List every live key starting with `prefix`
    async fn scan_prefix(&self, prefix: &str) -> KgResult<Vec<String>>;

    /// Delete keys, returning how many existed
    async fn delete(&self, keys: &[String]) -> KgResult<usize>;

    /// Apply a batch of writes in one round trip
    async fn execute(&self, batch: WriteBatch) -> KgResult<()>;
}

/// Factory function to create a DurableCache based on URL
pub async fn create_durable_cache(url: &str) -> KgResult<Arc<dyn DurableCache>> {
    if url.starts_with("memory://") {
        info!("Creating in-memory durable cache");
        Ok(Arc::new(InMemoryDurableCache::new()))
    } else if url.starts_with("redis://") || url.starts_with("rediss://") {
        #[cfg(feature = "redis")]
        {
            info!("Creating Redis durable cache");
            let cache = redis::RedisDurableCache::connect(url).await?;
            Ok(Arc::new(cache))
        }

        #[cfg(not(feature = "redis"))]
        {
            error!("Redis durable cache requested but 'redis' feature not enabled");
            Err(KgError::ConfigurationError(
                "Redis durable cache requested but 'redis' feature not enabled".to_string(),
            ))
        }
    } else {
        error!("Unsupported durable cache URL: {}", url);
        Err(KgError::ConfigurationError(format!(
            "Unsupported durable cache URL: {}",
            url
        )))
    }
}
