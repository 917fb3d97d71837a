//! Batch committer: applies buffered updates to the durable cache with
//! snapshot-before-write and compensating rollback.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use kgraph_cache::{DurableCache, WriteBatch};
use kgraph_core::keys::{self, GRAPH_PREFIXES};
use kgraph_core::{KgError, KgResult, UpdateRecord};
use kgraph_monitoring::LogExt;

use crate::config::PipelineConfig;

/// Accumulator state of the committer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitterState {
    Idle,
    Accumulating,
    Flushing,
}

/// Outcome of one flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Records taken from the accumulator
    pub received: usize,
    /// Records written to the cache
    pub applied: usize,
    /// Records skipped by validation
    pub rejected: usize,
    /// Whether the write failed and the cache was restored from the backup
    pub rolled_back: bool,
    /// Cache key of the backup taken before writing
    pub backup_key: Option<String>,
}

impl FlushReport {
    fn absorb(&mut self, other: FlushReport) {
        self.received += other.received;
        self.applied += other.applied;
        self.rejected += other.rejected;
        self.rolled_back |= other.rolled_back;
        if other.backup_key.is_some() {
            self.backup_key = other.backup_key;
        }
    }
}

/// Point-in-time copy of the graph namespaces
type BackupSnapshot = BTreeMap<String, String>;

/// Writes staged for one batch
struct StagedBatch {
    writes: WriteBatch,
    processed_keys: Vec<String>,
    applied: usize,
    rejected: usize,
}

/// Drains the update buffer and commits records in batches
pub struct BatchCommitter {
    cache: Arc<dyn DurableCache>,
    config: PipelineConfig,
    pending: Mutex<Vec<UpdateRecord>>,
    state: watch::Sender<CommitterState>,
    /// Last nanosecond suffix handed to an append-style key
    last_suffix: Mutex<i64>,
}

impl BatchCommitter {
    pub fn new(cache: Arc<dyn DurableCache>, config: PipelineConfig) -> Self {
        let (state, _) = watch::channel(CommitterState::Idle);
        Self {
            cache,
            config,
            pending: Mutex::new(Vec::new()),
            state,
            last_suffix: Mutex::new(0),
        }
    }

    pub fn watch_state(&self) -> watch::Receiver<CommitterState> {
        self.state.subscribe()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Add a record. Returns true once the batch size is reached.
    pub fn enqueue(&self, record: UpdateRecord) -> bool {
        let mut pending = self.pending.lock();
        pending.push(record);
        self.state.send_replace(CommitterState::Accumulating);
        pending.len() >= self.config.batch_size
    }

    /// Commit everything accumulated so far, one batch at a time
    pub async fn flush(&self) -> KgResult<FlushReport> {
        let records = std::mem::take(&mut *self.pending.lock());
        if records.is_empty() {
            return Ok(FlushReport::default());
        }

        self.state.send_replace(CommitterState::Flushing);
        let mut report = FlushReport::default();
        let mut outcome = Ok(());
        for chunk in records.chunks(self.config.batch_size.max(1)) {
            match self.commit_batch(chunk).await {
                Ok(batch_report) => report.absorb(batch_report),
                Err(e) => {
                    report.received += chunk.len();
                    outcome = Err(e);
                }
            }
        }

        let next = if self.pending.lock().is_empty() {
            CommitterState::Idle
        } else {
            CommitterState::Accumulating
        };
        self.state.send_replace(next);
        outcome.map(|_| report)
    }

    /// Back up, validate, stage and apply one batch
    pub async fn commit_batch(&self, records: &[UpdateRecord]) -> KgResult<FlushReport> {
        let mut report = FlushReport {
            received: records.len(),
            ..Default::default()
        };

        let snapshot = self.snapshot_namespaces().await.log_err("Failed to create backup")?;
        let backup_key = self.store_backup(&snapshot).await.log_err("Failed to create backup")?;
        report.backup_key = Some(backup_key.clone());

        let staged = self.stage(records).await;
        report.applied = staged.applied;
        report.rejected = staged.rejected;
        if staged.writes.is_empty() {
            debug!(backup_key = %backup_key, rejected = staged.rejected, "Nothing to apply in batch");
            return Ok(report);
        }

        if let Err(e) = self.cache.execute(staged.writes).await {
            error!(error = %e, backup_key = %backup_key, "Failed to execute update pipeline");
            self.rollback(&snapshot, staged.processed_keys)
                .await
                .map_err(|rollback_err| {
                    error!(backup_key = %backup_key, error = %rollback_err, "Failed to rollback to backup");
                    rollback_err
                })?;
            report.applied = 0;
            report.rolled_back = true;
            return Ok(report);
        }

        info!(count = report.applied, rejected = report.rejected, backup_key = %backup_key, "Successfully processed update batch");
        Ok(report)
    }

    async fn snapshot_namespaces(&self) -> KgResult<BackupSnapshot> {
        let mut snapshot = BackupSnapshot::new();
        for prefix in GRAPH_PREFIXES {
            for key in self.cache.scan_prefix(prefix).await? {
                // Keys can vanish between scan and read
                if let Some(value) = self.cache.get(&key).await? {
                    snapshot.insert(key, value);
                }
            }
        }
        Ok(snapshot)
    }

    async fn store_backup(&self, snapshot: &BackupSnapshot) -> KgResult<String> {
        let key = keys::backup_key(Utc::now().timestamp());
        let data = serde_json::to_string(snapshot).map_err(|e| KgError::EncodeError(e.to_string()))?;
        self.cache.set(&key, &data, Some(self.config.backup_ttl)).await?;
        info!(backup_key = %key, keys = snapshot.len(), "Created knowledge graph backup");
        Ok(key)
    }

    async fn stage(&self, records: &[UpdateRecord]) -> StagedBatch {
        let mut staged = StagedBatch {
            writes: WriteBatch::new(),
            processed_keys: Vec::new(),
            applied: 0,
            rejected: 0,
        };
        let mut seen = HashSet::new();

        for record in records {
            if let Err(e) = self.validate(record, &mut seen).await {
                warn!(update_id = %record.id, service_id = %record.service_id, error = %e, "Update validation failed");
                staged.rejected += 1;
                continue;
            }

            let data = match serde_json::to_string(&record.payload) {
                Ok(data) => data,
                Err(e) => {
                    error!(update_id = %record.id, error = %e, "Failed to encode update payload");
                    staged.rejected += 1;
                    continue;
                }
            };

            let suffix = if record.update_type.is_append_style() {
                self.next_suffix()
            } else {
                0
            };
            let processed = keys::processed_key(&record.id);
            staged.writes.set(keys::data_key(record, suffix), data);
            staged
                .writes
                .set_with_ttl(processed.clone(), "1", self.config.processed_ttl);
            staged.processed_keys.push(processed);
            staged.applied += 1;
        }
        staged
    }

    async fn validate(&self, record: &UpdateRecord, seen: &mut HashSet<String>) -> KgResult<()> {
        record.validate()?;
        if !seen.insert(record.id.clone()) {
            return Err(KgError::ValidationError(format!(
                "duplicate update {} within batch",
                record.id
            )));
        }
        let already = self
            .cache
            .exists(&keys::processed_key(&record.id))
            .await
            .map_err(|e| KgError::ValidationError(format!("failed to check update status: {}", e)))?;
        if already {
            return Err(KgError::ValidationError(format!(
                "duplicate update {}",
                record.id
            )));
        }
        Ok(())
    }

    /// Strictly increasing nanosecond suffix for append-style keys
    fn next_suffix(&self) -> i64 {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        let mut last = self.last_suffix.lock();
        *last = now.max(last.saturating_add(1));
        *last
    }

    /// Delete the current graph namespaces, rewrite the snapshot and drop
    /// the processed markers of the failed batch
    async fn rollback(&self, snapshot: &BackupSnapshot, processed_keys: Vec<String>) -> KgResult<()> {
        let mut current = Vec::new();
        for prefix in GRAPH_PREFIXES {
            current.extend(self.cache.scan_prefix(prefix).await?);
        }

        let mut writes = WriteBatch::new();
        writes.delete(current);
        for (key, value) in snapshot {
            writes.set(key.clone(), value.clone());
        }
        writes.delete(processed_keys);
        self.cache.execute(writes).await?;

        info!(keys = snapshot.len(), "Rolled back to backup");
        Ok(())
    }

    async fn flush_logged(&self) {
        if let Ok(report) = self.flush().await.log_err("Batch flush failed") {
            if report.received > 0 {
                debug!(?report, "Flush complete");
            }
        }
    }

    /// Drain `rx` until cancelled, flushing on size or on the interval.
    /// On cancellation the buffer is closed, drained, and flushed once more.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<UpdateRecord>, cancel: CancellationToken) {
        let period = self.config.flush_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    rx.close();
                    while let Some(record) = rx.recv().await {
                        self.enqueue(record);
                    }
                    self.flush_logged().await;
                    break;
                }
                received = rx.recv() => match received {
                    Some(record) => {
                        if self.enqueue(record) {
                            self.flush_logged().await;
                            ticker.reset();
                        }
                    }
                    None => {
                        self.flush_logged().await;
                        break;
                    }
                },
                _ = ticker.tick() => self.flush_logged().await,
            }
        }

        info!("Batch committer stopped");
    }
}
