//! Lifecycle coordinator for the knowledge graph pipeline.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use kgraph_cache::DurableCache;
use kgraph_core::{EventEnvelope, KgError, KgResult, UpdateRecord, UpdateType};
use kgraph_monitoring::LogExt;
use kgraph_store::GraphStore;

use crate::bus::EventBus;
use crate::committer::{BatchCommitter, CommitterState};
use crate::config::ServiceConfig;
use crate::subscriber::{EventSubscriber, SubscriberState};

/// Lifecycle of the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    /// Writes are refused locally until `recover` succeeds
    Degraded,
}

/// Background tasks of one pipeline run
struct Hooks {
    stop_subscriber: CancellationToken,
    /// Fired only after the subscriber has exited, so nothing it already
    /// took off the bus misses the final flush
    stop_committer: CancellationToken,
    subscriber: JoinHandle<()>,
    committer: JoinHandle<()>,
    subscriber_state: watch::Receiver<SubscriberState>,
    committer_state: watch::Receiver<CommitterState>,
}

/// Supervises the event subscriber and batch committer, tracks degraded
/// mode, and publishes updates on behalf of other services
pub struct KnowledgeGraphService {
    graph: Arc<GraphStore>,
    cache: Arc<dyn DurableCache>,
    bus: Arc<dyn EventBus>,
    config: ServiceConfig,
    state: watch::Sender<LifecycleState>,
    hooks: Mutex<Option<Hooks>>,
}

impl KnowledgeGraphService {
    pub fn new(
        graph: Arc<GraphStore>,
        cache: Arc<dyn DurableCache>,
        bus: Arc<dyn EventBus>,
        config: ServiceConfig,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Stopped);
        Self {
            graph,
            cache,
            bus,
            config,
            state,
            hooks: Mutex::new(None),
        }
    }

    pub fn graph(&self) -> &Arc<GraphStore> {
        &self.graph
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn is_degraded(&self) -> bool {
        self.state() == LifecycleState::Degraded
    }

    /// Subscriber connection state, while hooks are running
    pub async fn subscriber_state(&self) -> Option<SubscriberState> {
        self.hooks.lock().await.as_ref().map(|h| *h.subscriber_state.borrow())
    }

    /// Committer accumulator state, while hooks are running
    pub async fn committer_state(&self) -> Option<CommitterState> {
        self.hooks.lock().await.as_ref().map(|h| *h.committer_state.borrow())
    }

    fn set_state(&self, state: LifecycleState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(from = ?previous, to = ?state, "Knowledge graph service state changed");
        }
    }

    fn degrade(&self, reason: &str) {
        if !self.is_degraded() {
            warn!(reason, "Entering degraded mode");
        }
        self.set_state(LifecycleState::Degraded);
    }

    /// Start the pipeline. Never fails: an unreachable cache or a failed
    /// hook start leaves the service degraded instead.
    pub async fn start(&self) -> LifecycleState {
        let current = self.state();
        if current != LifecycleState::Stopped {
            debug!(state = ?current, "Start called while already started");
            return current;
        }
        self.set_state(LifecycleState::Starting);

        let dependency = self
            .check_dependency()
            .await
            .log_err("Durable cache unavailable, continuing in degraded mode");
        let hooks = self
            .start_hooks()
            .await
            .log_err("Failed to start knowledge graph hooks, continuing in degraded mode");

        let next = if dependency.is_ok() && hooks.is_ok() {
            LifecycleState::Running
        } else {
            LifecycleState::Degraded
        };
        self.set_state(next);
        info!(degraded_mode = next == LifecycleState::Degraded, "Knowledge graph service started");

        // Written once on start-up so the document on disk reflects this run
        let _ = self.graph.persist().log_warn("Failed to save knowledge graph on startup");
        next
    }

    /// Stop both tasks, wait for them to finish, then persist the graph
    pub async fn stop(&self) -> KgResult<()> {
        if self.state() == LifecycleState::Stopped {
            return Ok(());
        }
        info!("Knowledge graph service stopping");

        self.stop_hooks().await;
        self.set_state(LifecycleState::Stopped);
        self.graph.persist().log_err("Failed to save knowledge graph on shutdown")
    }

    /// Leave degraded mode once the cache answers again and the hooks have
    /// been restarted. A no-op unless degraded.
    pub async fn recover(&self) -> KgResult<()> {
        if !self.is_degraded() {
            return Ok(());
        }

        self.check_dependency().await.map_err(|e| {
            KgError::DependencyUnavailable(format!("failed to recover: cache still unavailable: {}", e))
        })?;
        self.stop_hooks().await;
        self.start_hooks()
            .await
            .map_err(|e| KgError::DependencyUnavailable(format!("failed to recover: hooks restart failed: {}", e)))?;

        self.set_state(LifecycleState::Running);
        info!("Successfully recovered from degraded mode");
        Ok(())
    }

    async fn check_dependency(&self) -> KgResult<()> {
        let timeout = self.config.dependency_check_timeout();
        match tokio::time::timeout(timeout, self.cache.ping()).await {
            Ok(result) => result,
            Err(_) => Err(KgError::DependencyUnavailable(format!(
                "cache ping timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    async fn start_hooks(&self) -> KgResult<()> {
        let handle = Handle::try_current().map_err(|e| {
            KgError::DependencyUnavailable(format!("no async runtime for hooks: {}", e))
        })?;

        let mut hooks = self.hooks.lock().await;
        if let Some(old) = hooks.take() {
            Self::shutdown(old).await;
        }

        let pipeline = self.config.pipeline();
        let (tx, rx) = mpsc::channel(pipeline.buffer_capacity);
        let committer = Arc::new(BatchCommitter::new(self.cache.clone(), pipeline.clone()));
        let subscriber = EventSubscriber::new(
            self.bus.clone(),
            &pipeline,
            self.config.reconnect_policy(),
            tx,
        );

        let stop_subscriber = CancellationToken::new();
        let stop_committer = CancellationToken::new();
        let subscriber_state = subscriber.watch_state();
        let committer_state = committer.watch_state();
        let committer_task = handle.spawn(committer.run(rx, stop_committer.clone()));
        let subscriber_task = handle.spawn(subscriber.run(stop_subscriber.clone()));

        *hooks = Some(Hooks {
            stop_subscriber,
            stop_committer,
            subscriber: subscriber_task,
            committer: committer_task,
            subscriber_state,
            committer_state,
        });
        info!("Knowledge graph hooks started");
        Ok(())
    }

    async fn stop_hooks(&self) {
        if let Some(hooks) = self.hooks.lock().await.take() {
            Self::shutdown(hooks).await;
        }
    }

    async fn shutdown(hooks: Hooks) {
        hooks.stop_subscriber.cancel();
        if let Err(e) = hooks.subscriber.await {
            error!(error = %e, "Event subscriber task failed");
        }
        hooks.stop_committer.cancel();
        if let Err(e) = hooks.committer.await {
            error!(error = %e, "Batch committer task failed");
        }
        debug!("Knowledge graph hooks stopped");
    }

    /// Publish an update with the configured timeout
    pub async fn publish_update(&self, record: UpdateRecord) -> KgResult<String> {
        self.publish_update_with_timeout(record, Some(self.config.publish_timeout()))
            .await
    }

    /// Publish an update onto the bus. Refused without contacting the bus
    /// while degraded; an emit failure or timeout degrades the service.
    pub async fn publish_update_with_timeout(
        &self,
        mut record: UpdateRecord,
        timeout: Option<Duration>,
    ) -> KgResult<String> {
        if self.is_degraded() {
            warn!(update_id = %record.id, service_id = %record.service_id, "Attempted to publish update while in degraded mode");
            return Err(KgError::Degraded);
        }

        record.validate()?;
        record.stamp(Utc::now());
        let envelope = EventEnvelope::for_update(&record)?;

        let emitted = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.bus.emit(envelope)).await {
                Ok(result) => result,
                Err(_) => Err(KgError::DependencyUnavailable(format!(
                    "emit timed out after {}ms",
                    limit.as_millis()
                ))),
            },
            None => self.bus.emit(envelope).await,
        };

        match emitted {
            Ok(event_id) => {
                debug!(update_id = %record.id, event_id = %event_id, update_type = %record.update_type, "Published knowledge graph update");
                Ok(event_id)
            }
            Err(e) => {
                error!(update_id = %record.id, error = %e, "Failed to publish knowledge graph update");
                self.degrade("publish failed");
                Err(KgError::publish("failed to publish update", e))
            }
        }
    }

    fn record_id(prefix: &str, service_id: &str) -> String {
        format!("{}_{}_{}", prefix, service_id, Utc::now().timestamp())
    }

    /// Announce a service and its capabilities
    pub async fn register_service(
        &self,
        service_id: &str,
        capabilities: Vec<String>,
        schema: Value,
    ) -> KgResult<String> {
        let record = UpdateRecord::new(
            Self::record_id("reg", service_id),
            UpdateType::ServiceRegistration,
            service_id,
            json!({ "capabilities": capabilities, "schema": schema }),
        );
        self.publish_update(record).await.map_err(|e| {
            KgError::publish(format!("failed to publish service registration for {}", service_id), e)
        })
    }

    pub async fn update_schema(&self, service_id: &str, schema: Value) -> KgResult<String> {
        let record = UpdateRecord::new(
            Self::record_id("schema", service_id),
            UpdateType::SchemaUpdate,
            service_id,
            schema,
        );
        self.publish_update(record).await.map_err(|e| {
            KgError::publish(format!("failed to publish schema update for {}", service_id), e)
        })
    }

    /// Publish a relation change, then persist and back up the graph
    pub async fn update_relation(&self, service_id: &str, relation: Value) -> KgResult<String> {
        let record = UpdateRecord::new(
            Self::record_id("rel", service_id),
            UpdateType::RelationUpdate,
            service_id,
            relation,
        );
        let event_id = self.publish_update(record).await.map_err(|e| {
            KgError::publish(format!("failed to publish relation update for {}", service_id), e)
        })?;

        self.persist_and_backup(&format!("UpdateRelation: {}", service_id));
        Ok(event_id)
    }

    /// Save the graph and take a file backup. Failures are logged only.
    fn persist_and_backup(&self, reason: &str) {
        info!(reason, "Persisting knowledge graph and taking backup");
        let _ = self.graph.persist().log_err("Failed to save knowledge graph");
        let _ = self
            .graph
            .backup(&format!("Auto-backup: {}", reason))
            .log_err("Failed to back up knowledge graph");
    }
}
