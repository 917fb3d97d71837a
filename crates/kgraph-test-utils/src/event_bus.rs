use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use kgraph_core::{EventEnvelope, KgError, KgResult};
use kgraph_server::{EnvelopeStream, EventBus, InMemoryEventBus};

#[derive(Debug, Default)]
struct Script {
    failing_subscribes: usize,
    subscribe_attempts: Vec<Instant>,
    emit_fails: bool,
    emit_delay: Option<Duration>,
    emits: Vec<EventEnvelope>,
}

/// Event bus whose failures are scripted by the test. Successful
/// subscriptions and emits go through an in-memory bus.
pub struct ScriptedEventBus {
    inner: InMemoryEventBus,
    script: Mutex<Script>,
}

impl ScriptedEventBus {
    pub fn new() -> Self {
        Self {
            inner: InMemoryEventBus::new(),
            script: Mutex::new(Script::default()),
        }
    }

    /// Refuse the next `count` subscribe calls
    pub fn failing_subscribes(count: usize) -> Self {
        let bus = Self::new();
        bus.script.lock().failing_subscribes = count;
        bus
    }

    pub fn inner(&self) -> &InMemoryEventBus {
        &self.inner
    }

    /// When each subscribe call arrived
    pub fn subscribe_attempts(&self) -> Vec<Instant> {
        self.script.lock().subscribe_attempts.clone()
    }

    pub fn set_emit_fails(&self, fails: bool) {
        self.script.lock().emit_fails = fails;
    }

    /// Make every emit wait before completing
    pub fn set_emit_delay(&self, delay: Option<Duration>) {
        self.script.lock().emit_delay = delay;
    }

    /// Envelopes handed to `emit`, including failed ones
    pub fn emitted(&self) -> Vec<EventEnvelope> {
        self.script.lock().emits.clone()
    }
}

impl Default for ScriptedEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for ScriptedEventBus {
    async fn subscribe(&self, topics: &[String], consumer_group: &str) -> KgResult<EnvelopeStream> {
        let refuse = {
            let mut script = self.script.lock();
            script.subscribe_attempts.push(Instant::now());
            if script.failing_subscribes > 0 {
                script.failing_subscribes -= 1;
                true
            } else {
                false
            }
        };
        if refuse {
            debug!("Scripted subscribe failure");
            return Err(KgError::DependencyUnavailable("bus unreachable".to_string()));
        }
        self.inner.subscribe(topics, consumer_group).await
    }

    async fn emit(&self, envelope: EventEnvelope) -> KgResult<String> {
        let (fails, delay) = {
            let mut script = self.script.lock();
            script.emits.push(envelope.clone());
            (script.emit_fails, script.emit_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fails {
            return Err(KgError::DependencyUnavailable("emit refused".to_string()));
        }
        self.inner.emit(envelope).await
    }
}
