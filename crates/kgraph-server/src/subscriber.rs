//! Long-lived subscription feeding decoded updates into the batch buffer.

use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use kgraph_core::UpdateRecord;

use crate::backoff::ReconnectPolicy;
use crate::bus::{EnvelopeStream, EventBus};
use crate::config::PipelineConfig;

/// Connection state of the subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Disconnected,
    Connecting,
    Connected,
}

/// Why a subscription stopped delivering
enum StreamEnd {
    /// Shutdown requested
    Cancelled,
    /// The bus ended the subscription
    Terminated(String),
    /// Nobody is draining the buffer any more
    BufferClosed,
}

/// Keeps one subscription open for the update topic, reconnecting with
/// capped exponential backoff
pub struct EventSubscriber {
    bus: Arc<dyn EventBus>,
    topics: Vec<String>,
    consumer_group: String,
    policy: ReconnectPolicy,
    buffer: mpsc::Sender<UpdateRecord>,
    state: watch::Sender<SubscriberState>,
}

impl EventSubscriber {
    pub fn new(
        bus: Arc<dyn EventBus>,
        config: &PipelineConfig,
        policy: ReconnectPolicy,
        buffer: mpsc::Sender<UpdateRecord>,
    ) -> Self {
        let (state, _) = watch::channel(SubscriberState::Disconnected);
        Self {
            bus,
            topics: vec![config.topic.clone()],
            consumer_group: config.consumer_group.clone(),
            policy,
            buffer,
            state,
        }
    }

    /// Observe connection state changes
    pub fn watch_state(&self) -> watch::Receiver<SubscriberState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SubscriberState) {
        self.state.send_replace(state);
    }

    /// Run until `cancel` fires or the buffer's receiver is dropped.
    /// A record already taken off the bus is delivered before exiting.
    pub async fn run(self, cancel: CancellationToken) {
        let mut attempt: u32 = 0;

        loop {
            self.set_state(SubscriberState::Connecting);
            info!(topics = ?self.topics, group = %self.consumer_group, "Subscribing to event bus");

            let subscribed = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.bus.subscribe(&self.topics, &self.consumer_group) => result,
            };

            match subscribed {
                Ok(stream) => {
                    attempt = 0;
                    self.set_state(SubscriberState::Connected);
                    match self.pump(stream, &cancel).await {
                        StreamEnd::Cancelled => break,
                        StreamEnd::BufferClosed => {
                            warn!("Update buffer closed, subscriber exiting");
                            break;
                        }
                        StreamEnd::Terminated(reason) => {
                            warn!(reason = %reason, "Event subscription terminated, will retry");
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Event bus subscription failed, will retry");
                }
            }

            self.set_state(SubscriberState::Disconnected);
            attempt = attempt.saturating_add(1);
            let delay = self.policy.delay(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Waiting before resubscribing");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(SubscriberState::Disconnected);
        info!("Event subscriber stopped");
    }

    async fn pump(&self, mut stream: EnvelopeStream, cancel: &CancellationToken) -> StreamEnd {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StreamEnd::Cancelled,
                next = stream.next() => next,
            };

            let envelope = match next {
                None => return StreamEnd::Terminated("stream ended".to_string()),
                Some(Err(e)) => return StreamEnd::Terminated(e.to_string()),
                Some(Ok(envelope)) => envelope,
            };

            let record = match envelope.decode_update() {
                Ok(record) => record,
                Err(e) => {
                    warn!(event_id = %envelope.id, error = %e, "Dropping undecodable update event");
                    continue;
                }
            };
            debug!(update_id = %record.id, service_id = %record.service_id, "Update received");

            // Waits for room in the buffer, holding the bus back meanwhile.
            // Not cancellable: a record taken off the bus is handed over
            // unless the committer has already gone.
            if self.buffer.send(record).await.is_err() {
                return StreamEnd::BufferClosed;
            }
        }
    }
}
