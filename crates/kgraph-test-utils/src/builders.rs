use serde_json::{json, Value};

use kgraph_core::{EventEnvelope, UpdateRecord, UpdateType, UPDATE_TOPIC};

/// Builder for update records with sensible test defaults
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    record: UpdateRecord,
}

impl RecordBuilder {
    pub fn new(update_type: UpdateType) -> Self {
        Self {
            record: UpdateRecord::new("update-1", update_type, "test-service", json!({})),
        }
    }

    pub fn service_registration() -> Self {
        Self::new(UpdateType::ServiceRegistration)
    }

    pub fn schema_update() -> Self {
        Self::new(UpdateType::SchemaUpdate)
    }

    pub fn pattern_detection() -> Self {
        Self::new(UpdateType::PatternDetection)
    }

    pub fn relation_update() -> Self {
        Self::new(UpdateType::RelationUpdate)
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.record.id = id.into();
        self
    }

    pub fn service(mut self, service_id: impl Into<String>) -> Self {
        self.record.service_id = service_id.into();
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.record.payload = payload;
        self
    }

    pub fn build(self) -> UpdateRecord {
        self.record
    }

    /// Wrap the record the way a producer would put it on the bus
    pub fn envelope(self) -> EventEnvelope {
        let record = self.record;
        EventEnvelope {
            id: format!("evt-{}", record.id),
            event_type: UPDATE_TOPIC.to_string(),
            timestamp: 0,
            payload: serde_json::to_value(&record).unwrap_or(Value::Null),
            metadata: None,
        }
    }
}

/// Envelope whose payload cannot be decoded as an update record
pub fn malformed_envelope(id: &str) -> EventEnvelope {
    EventEnvelope {
        id: id.to_string(),
        event_type: UPDATE_TOPIC.to_string(),
        timestamp: 0,
        payload: json!({"type": 42, "id": ["not", "a", "string"]}),
        metadata: None,
    }
}
