#![cfg(feature = "redis")]

use std::time::Duration;

use kgraph_cache::redis::RedisDurableCache;
use kgraph_cache::{DurableCache, WriteBatch};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

#[tokio::test]
#[ignore] // Requires a running Redis server
async fn test_redis_batch_and_scan() {
    let cache = RedisDurableCache::connect(&redis_url()).await.unwrap();
    cache.ping().await.unwrap();

    let prefix = format!("kg:test:{}:", std::process::id());
    let mut batch = WriteBatch::new();
    batch
        .set(format!("{}a", prefix), "1")
        .set_with_ttl(format!("{}b", prefix), "2", Duration::from_secs(60));
    cache.execute(batch).await.unwrap();

    let keys = cache.scan_prefix(&prefix).await.unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(cache.get(&format!("{}a", prefix)).await.unwrap().as_deref(), Some("1"));

    assert_eq!(cache.delete(&keys).await.unwrap(), 2);
    assert!(!cache.exists(&format!("{}b", prefix)).await.unwrap());
}
