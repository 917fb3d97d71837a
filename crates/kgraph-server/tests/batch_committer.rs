use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use kgraph_cache::DurableCache;
use kgraph_core::keys::{self, PATTERN_PREFIX, RELATION_PREFIX};
use kgraph_core::KgError;
use kgraph_server::{BatchCommitter, CommitterState, FlushReport, PipelineConfig};
use kgraph_test_utils::{FaultyCache, RecordBuilder};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn pipeline(batch_size: usize, flush_interval: Duration) -> PipelineConfig {
    PipelineConfig {
        batch_size,
        flush_interval,
        ..PipelineConfig::default()
    }
}

fn committer(cache: &Arc<FaultyCache>) -> BatchCommitter {
    BatchCommitter::new(cache.clone(), PipelineConfig::default())
}

async fn seed(cache: &FaultyCache) {
    cache.set("kg:service:auth", r#"{"capabilities":["login"]}"#, None).await.unwrap();
    cache.set("kg:schema:auth", r#"{"fields":["user"]}"#, None).await.unwrap();
    cache.set("kg:relation:auth:17", r#"{"to":"billing"}"#, None).await.unwrap();
}

#[tokio::test]
async fn test_commit_writes_each_update_type() {
    let cache = Arc::new(FaultyCache::new());
    let committer = committer(&cache);

    let records = vec![
        RecordBuilder::service_registration().id("u1").service("auth").payload(json!({"capabilities": ["login"]})).build(),
        RecordBuilder::schema_update().id("u2").service("auth").payload(json!({"fields": ["user"]})).build(),
        RecordBuilder::pattern_detection().id("u3").service("auth").payload(json!({"kind": "retry"})).build(),
        RecordBuilder::pattern_detection().id("u4").service("auth").payload(json!({"kind": "burst"})).build(),
        RecordBuilder::relation_update().id("u5").service("auth").payload(json!({"to": "billing"})).build(),
    ];
    let report = committer.commit_batch(&records).await.unwrap();

    assert_eq!(report.received, 5);
    assert_eq!(report.applied, 5);
    assert_eq!(report.rejected, 0);
    assert!(!report.rolled_back);
    assert!(report.backup_key.as_deref().unwrap().starts_with(keys::BACKUP_PREFIX));

    let graph = cache.graph_namespaces();
    assert_eq!(graph.get("kg:service:auth").unwrap(), r#"{"capabilities":["login"]}"#);
    assert_eq!(graph.get("kg:schema:auth").unwrap(), r#"{"fields":["user"]}"#);

    // Append-style updates never overwrite each other
    let patterns = cache.inner().dump_prefix(&format!("{}auth:", PATTERN_PREFIX));
    assert_eq!(patterns.len(), 2);
    let relations = cache.inner().dump_prefix(&format!("{}auth:", RELATION_PREFIX));
    assert_eq!(relations.len(), 1);

    for id in ["u1", "u2", "u3", "u4", "u5"] {
        let marker = keys::processed_key(id);
        assert_eq!(cache.get(&marker).await.unwrap().as_deref(), Some("1"));
        assert!(cache.inner().ttl(&marker).is_some());
    }
}

#[tokio::test]
async fn test_backup_holds_pre_batch_state() {
    let cache = Arc::new(FaultyCache::new());
    seed(&cache).await;
    let before = cache.graph_namespaces();

    let report = committer(&cache)
        .commit_batch(&[RecordBuilder::service_registration().id("u1").service("billing").build()])
        .await
        .unwrap();

    let backup_key = report.backup_key.unwrap();
    let stored = cache.get(&backup_key).await.unwrap().unwrap();
    let restored: std::collections::BTreeMap<String, String> = serde_json::from_str(&stored).unwrap();
    assert_eq!(restored, before);
    assert!(cache.inner().ttl(&backup_key).is_some());
}

#[tokio::test]
async fn test_processed_update_is_not_applied_twice() {
    let cache = Arc::new(FaultyCache::new());
    let committer = committer(&cache);
    let record = RecordBuilder::pattern_detection().id("once").service("auth").build();

    committer.commit_batch(&[record.clone()]).await.unwrap();
    let after_first = cache.graph_namespaces();

    let report = committer.commit_batch(&[record]).await.unwrap();
    assert_eq!(report.applied, 0);
    assert_eq!(report.rejected, 1);
    assert_eq!(cache.graph_namespaces(), after_first);
}

#[tokio::test]
async fn test_duplicate_within_batch_applies_once() {
    let cache = Arc::new(FaultyCache::new());
    let record = RecordBuilder::relation_update().id("dup").service("auth").build();

    let report = committer(&cache)
        .commit_batch(&[record.clone(), record])
        .await
        .unwrap();

    assert_eq!(report.applied, 1);
    assert_eq!(report.rejected, 1);
    assert_eq!(cache.inner().dump_prefix(RELATION_PREFIX).len(), 1);
}

#[tokio::test]
async fn test_invalid_records_are_rejected_not_fatal() {
    let cache = Arc::new(FaultyCache::new());
    let records = vec![
        RecordBuilder::service_registration().id("").build(),
        RecordBuilder::service_registration().id("no-service").service("").build(),
        RecordBuilder::service_registration().id("good").service("billing").build(),
    ];

    let report = committer(&cache).commit_batch(&records).await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(report.rejected, 2);
    assert!(cache.graph_namespaces().contains_key("kg:service:billing"));
    assert!(!cache.exists(&keys::processed_key("no-service")).await.unwrap());
}

#[tokio::test]
async fn test_failed_write_rolls_back_to_backup() {
    let cache = Arc::new(FaultyCache::new());
    seed(&cache).await;
    let before = cache.graph_namespaces();

    // Half of the pipeline lands before the failure
    cache.fail_next_executes(1, 3);
    let records = vec![
        RecordBuilder::service_registration().id("r1").service("auth").payload(json!({"capabilities": []})).build(),
        RecordBuilder::schema_update().id("r2").service("billing").build(),
        RecordBuilder::relation_update().id("r3").service("auth").build(),
    ];
    let report = committer(&cache).commit_batch(&records).await.unwrap();

    assert!(report.rolled_back);
    assert_eq!(report.applied, 0);
    assert_eq!(cache.graph_namespaces(), before);
    for id in ["r1", "r2", "r3"] {
        assert!(!cache.exists(&keys::processed_key(id)).await.unwrap());
    }
    assert_eq!(cache.execute_count(), 2);
}

#[tokio::test]
async fn test_rolled_back_batch_can_be_retried() {
    let cache = Arc::new(FaultyCache::new());
    let committer = committer(&cache);
    let record = RecordBuilder::schema_update().id("retry").service("auth").build();

    cache.fail_next_executes(1, 1);
    assert!(committer.commit_batch(&[record.clone()]).await.unwrap().rolled_back);

    let report = committer.commit_batch(&[record]).await.unwrap();
    assert_eq!(report.applied, 1);
    assert!(cache.graph_namespaces().contains_key("kg:schema:auth"));
}

#[tokio::test]
async fn test_backup_failure_skips_batch() {
    let cache = Arc::new(FaultyCache::new());
    cache.fail_sets_with_prefix(Some(keys::BACKUP_PREFIX));

    let result = committer(&cache)
        .commit_batch(&[RecordBuilder::service_registration().id("u1").build()])
        .await;

    assert!(matches!(result, Err(KgError::DependencyUnavailable(_))));
    assert_eq!(cache.execute_count(), 0);
    assert!(cache.graph_namespaces().is_empty());
    assert!(!cache.exists(&keys::processed_key("u1")).await.unwrap());
}

#[tokio::test]
async fn test_flush_splits_into_batches() {
    let cache = Arc::new(FaultyCache::new());
    let committer = BatchCommitter::new(cache.clone(), pipeline(2, Duration::from_secs(5)));

    let mut threshold = Vec::new();
    for i in 0..5 {
        let record = RecordBuilder::pattern_detection().id(format!("p{}", i)).service("auth").build();
        threshold.push(committer.enqueue(record));
    }
    assert_eq!(threshold, vec![false, true, true, true, true]);
    assert_eq!(committer.pending_len(), 5);

    let report = committer.flush().await.unwrap();
    assert_eq!(report.received, 5);
    assert_eq!(report.applied, 5);
    assert_eq!(cache.execute_count(), 3);
    assert_eq!(committer.pending_len(), 0);
    assert_eq!(*committer.watch_state().borrow(), CommitterState::Idle);

    assert_eq!(committer.flush().await.unwrap(), FlushReport::default());
}

async fn wait_for_key(cache: &FaultyCache, key: &str) {
    for _ in 0..200 {
        if cache.exists(key).await.unwrap() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never written", key);
}

#[tokio::test(start_paused = true)]
async fn test_run_flushes_when_batch_is_full() {
    let cache = Arc::new(FaultyCache::new());
    let committer = Arc::new(BatchCommitter::new(cache.clone(), pipeline(3, Duration::from_secs(3_600))));
    let (tx, rx) = mpsc::channel(10);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(committer.clone().run(rx, cancel.clone()));

    for i in 0..3 {
        tx.send(RecordBuilder::schema_update().id(format!("s{}", i)).service(format!("svc{}", i)).build())
            .await
            .unwrap();
    }
    wait_for_key(&cache, "kg:schema:svc2").await;
    assert_eq!(cache.execute_count(), 1);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_run_flushes_on_interval() {
    let cache = Arc::new(FaultyCache::new());
    let committer = Arc::new(BatchCommitter::new(cache.clone(), pipeline(100, Duration::from_secs(5))));
    let (tx, rx) = mpsc::channel(10);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(committer.clone().run(rx, cancel.clone()));

    tx.send(RecordBuilder::service_registration().id("t1").service("auth").build())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(!cache.exists("kg:service:auth").await.unwrap());
    assert_eq!(committer.pending_len(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(cache.exists("kg:service:auth").await.unwrap());
    assert_eq!(committer.pending_len(), 0);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancel_drains_buffer_and_flushes() {
    let cache = Arc::new(FaultyCache::new());
    let committer = Arc::new(BatchCommitter::new(cache.clone(), pipeline(100, Duration::from_secs(3_600))));
    let (tx, rx) = mpsc::channel(10);

    for i in 0..4 {
        tx.send(RecordBuilder::relation_update().id(format!("r{}", i)).service("auth").build())
            .await
            .unwrap();
    }
    let cancel = CancellationToken::new();
    cancel.cancel();
    committer.clone().run(rx, cancel).await;

    assert_eq!(cache.inner().dump_prefix(RELATION_PREFIX).len(), 4);
    assert_eq!(committer.pending_len(), 0);
    assert!(tx.send(RecordBuilder::relation_update().id("late").build()).await.is_err());
}

#[tokio::test]
async fn test_run_exits_when_senders_drop() {
    let cache = Arc::new(FaultyCache::new());
    let committer = Arc::new(BatchCommitter::new(cache.clone(), pipeline(100, Duration::from_secs(3_600))));
    let (tx, rx) = mpsc::channel(10);

    tx.send(RecordBuilder::schema_update().id("last").service("auth").build())
        .await
        .unwrap();
    drop(tx);
    committer.run(rx, CancellationToken::new()).await;

    assert!(cache.exists("kg:schema:auth").await.unwrap());
}
