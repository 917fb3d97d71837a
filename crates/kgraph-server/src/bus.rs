//! Event bus abstraction and the in-process implementation.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use kgraph_core::{EventEnvelope, KgError, KgResult};

/// Envelopes delivered to one subscription. The stream ending, or yielding
/// an error, means the subscription terminated.
pub type EnvelopeStream = BoxStream<'static, KgResult<EventEnvelope>>;

/// Platform publish/subscribe transport
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Open a subscription for `topics`. Subscribers sharing a consumer
    /// group split the traffic between them.
    async fn subscribe(&self, topics: &[String], consumer_group: &str) -> KgResult<EnvelopeStream>;

    /// Publish an envelope on the topic named by its `event_type`,
    /// returning the bus event id
    async fn emit(&self, envelope: EventEnvelope) -> KgResult<String>;
}

const DEFAULT_QUEUE_CAPACITY: usize = 100;

struct Subscription {
    topics: Vec<String>,
    group: String,
    tx: mpsc::Sender<KgResult<EventEnvelope>>,
}

#[derive(Default)]
struct BusState {
    subscriptions: Vec<Subscription>,
    /// Round-robin cursor per consumer group
    cursors: HashMap<String, usize>,
}

/// In-process bus.
///
/// Each subscription has a bounded queue and `emit` waits for room, so a
/// slow consumer slows its producers down.
pub struct InMemoryEventBus {
    state: Arc<Mutex<BusState>>,
    queue_capacity: usize,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState::default())),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Live subscriptions listening on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let mut state = self.state.lock();
        state.subscriptions.retain(|s| !s.tx.is_closed());
        state
            .subscriptions
            .iter()
            .filter(|s| s.topics.iter().any(|t| t == topic))
            .count()
    }

    /// End every open subscription stream, as a dropped connection would
    pub fn disconnect_all(&self) {
        let dropped = std::mem::take(&mut self.state.lock().subscriptions);
        info!("Event bus disconnected {} subscriptions", dropped.len());
    }

    /// One sender per consumer group listening on `topic`
    fn route(&self, topic: &str) -> Vec<mpsc::Sender<KgResult<EventEnvelope>>> {
        let mut state = self.state.lock();
        state.subscriptions.retain(|s| !s.tx.is_closed());

        let mut by_group: Vec<(String, Vec<mpsc::Sender<KgResult<EventEnvelope>>>)> = Vec::new();
        for sub in state.subscriptions.iter().filter(|s| s.topics.iter().any(|t| t == topic)) {
            match by_group.iter_mut().find(|(group, _)| *group == sub.group) {
                Some((_, members)) => members.push(sub.tx.clone()),
                None => by_group.push((sub.group.clone(), vec![sub.tx.clone()])),
            }
        }

        let mut targets = Vec::with_capacity(by_group.len());
        for (group, mut members) in by_group {
            let cursor = state.cursors.entry(group).or_insert(0);
            let index = *cursor % members.len();
            *cursor = cursor.wrapping_add(1);
            targets.push(members.swap_remove(index));
        }
        targets
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn subscribe(&self, topics: &[String], consumer_group: &str) -> KgResult<EnvelopeStream> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.state.lock().subscriptions.push(Subscription {
            topics: topics.to_vec(),
            group: consumer_group.to_string(),
            tx,
        });
        debug!(?topics, consumer_group, "Subscribed to in-memory event bus");

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }

    async fn emit(&self, mut envelope: EventEnvelope) -> KgResult<String> {
        if envelope.id.is_empty() {
            envelope.id = Uuid::new_v4().to_string();
        }
        let event_id = envelope.id.clone();

        let targets = self.route(&envelope.event_type);
        if targets.is_empty() {
            debug!(event_id = %event_id, topic = %envelope.event_type, "No subscribers for event");
        }
        for tx in targets {
            // A receiver dropped between routing and sending just misses the event
            if tx.send(Ok(envelope.clone())).await.is_err() {
                debug!(event_id = %event_id, "Subscriber went away before delivery");
            }
        }
        Ok(event_id)
    }
}

/// Factory function to create an EventBus based on URL
pub async fn create_event_bus(url: &str) -> KgResult<Arc<dyn EventBus>> {
    if url.starts_with("memory://") {
        info!("Creating in-memory event bus");
        Ok(Arc::new(InMemoryEventBus::new()))
    } else {
        error!("Unsupported event bus URL: {}", url);
        Err(KgError::ConfigurationError(format!(
            "Unsupported event bus URL: {}",
            url
        )))
    }
}
