//! Redis implementation of [`DurableCache`].

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, AsyncIter, Client};
use std::time::Duration;
use tracing::{debug, info};

use kgraph_core::{KgError, KgResult};

use crate::{CacheOp, DurableCache, WriteBatch};

/// Redis-backed durable cache. Batches run as MULTI/EXEC pipelines.
#[derive(Clone)]
pub struct RedisDurableCache {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisDurableCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDurableCache")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisDurableCache {
    /// Connect to Redis at `redis_url`
    pub async fn connect(redis_url: &str) -> KgResult<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            KgError::ConfigurationError(format!("invalid Redis URL {}: {}", redis_url, e))
        })?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected durable cache to Redis");
        Ok(Self { conn })
    }

    fn seconds(ttl: Duration) -> usize {
        // Redis rejects a zero expiry
        ttl.as_secs().max(1) as usize
    }
}

#[async_trait]
impl DurableCache for RedisDurableCache {
    async fn ping(&self) -> KgResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> KgResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> KgResult<()> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, value, Self::seconds(ttl)).await?,
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> KgResult<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn scan_prefix(&self, prefix: &str) -> KgResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", prefix);
        let mut keys = Vec::new();
        {
            let mut iter: AsyncIter<String> = conn.scan_match(&pattern).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }
        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        debug!("Scanned {} keys matching {}", keys.len(), pattern);
        Ok(keys)
    }

    async fn delete(&self, keys: &[String]) -> KgResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        Ok(conn.del(keys).await?)
    }

    async fn execute(&self, batch: WriteBatch) -> KgResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in batch.into_ops() {
            match op {
                CacheOp::Set { key, value, ttl: Some(ttl) } => {
                    pipe.set_ex(key, value, Self::seconds(ttl)).ignore();
                }
                CacheOp::Set { key, value, ttl: None } => {
                    pipe.set(key, value).ignore();
                }
                CacheOp::Delete { keys } => {
                    pipe.del(keys).ignore();
                }
            }
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}
