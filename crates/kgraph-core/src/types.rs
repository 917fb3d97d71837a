//! Records that travel over the event bus and into the durable cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{KgError, KgResult};

/// Topic carrying knowledge graph updates
pub const UPDATE_TOPIC: &str = "knowledge_graph.update";

/// Consumer group shared by every coordinator instance
pub const DEFAULT_CONSUMER_GROUP: &str = "kg-hooks-workers";

/// Version stamped on records built by the convenience publishers
pub const RECORD_VERSION: &str = "1.0";

/// Kind of change carried by an [`UpdateRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    /// A service announced itself and its capabilities
    ServiceRegistration,
    /// A service changed its schema
    SchemaUpdate,
    /// A usage pattern was detected
    PatternDetection,
    /// Relationships between services changed
    RelationUpdate,
}

impl UpdateType {
    /// Wire name of the update type
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::ServiceRegistration => "service_registration",
            UpdateType::SchemaUpdate => "schema_update",
            UpdateType::PatternDetection => "pattern_detection",
            UpdateType::RelationUpdate => "relation_update",
        }
    }

    /// Whether records of this type accumulate under time-suffixed keys
    /// instead of overwriting a fixed key
    pub fn is_append_style(&self) -> bool {
        matches!(self, UpdateType::PatternDetection | UpdateType::RelationUpdate)
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single knowledge graph update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// Unique id, doubles as the deduplication token
    #[serde(default)]
    pub id: String,

    /// What kind of change this is
    #[serde(rename = "type")]
    pub update_type: UpdateType,

    /// Service the update belongs to
    #[serde(default)]
    pub service_id: String,

    /// Opaque structured payload
    #[serde(default)]
    pub payload: Value,

    /// When the update was produced, stamped on publish if absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Record format version
    #[serde(default)]
    pub version: String,
}

impl UpdateRecord {
    /// Create a record with no timestamp
    pub fn new(
        id: impl Into<String>,
        update_type: UpdateType,
        service_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: id.into(),
            update_type,
            service_id: service_id.into(),
            payload,
            timestamp: None,
            version: RECORD_VERSION.to_string(),
        }
    }

    /// Check the fields every record must carry
    pub fn validate(&self) -> KgResult<()> {
        if self.id.is_empty() {
            return Err(KgError::ValidationError("update id is required".to_string()));
        }
        if self.service_id.is_empty() {
            return Err(KgError::ValidationError(format!(
                "update {} is missing service_id",
                self.id
            )));
        }
        Ok(())
    }

    /// Stamp the timestamp if it is absent
    pub fn stamp(&mut self, now: DateTime<Utc>) {
        if self.timestamp.is_none() {
            self.timestamp = Some(now);
        }
    }
}

/// Wire-level wrapper around a bus message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    /// Unix seconds
    pub timestamp: i64,

    pub payload: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl EventEnvelope {
    /// Wrap an update record for the update topic
    pub fn for_update(record: &UpdateRecord) -> KgResult<Self> {
        let payload = serde_json::to_value(record)
            .map_err(|e| KgError::EncodeError(format!("update {}: {}", record.id, e)))?;
        let timestamp = record.timestamp.unwrap_or_else(Utc::now).timestamp();

        Ok(Self {
            id: record.id.clone(),
            event_type: UPDATE_TOPIC.to_string(),
            timestamp,
            payload,
            metadata: None,
        })
    }

    /// Decode the payload as an update record
    pub fn decode_update(&self) -> KgResult<UpdateRecord> {
        if self.payload.is_null() {
            return Err(KgError::ParseError(format!(
                "event {} has no payload",
                self.id
            )));
        }
        UpdateRecord::deserialize(&self.payload)
            .map_err(|e| KgError::ParseError(format!("event {}: {}", self.id, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_update_type_wire_names() {
        let encoded = serde_json::to_value(UpdateType::ServiceRegistration).unwrap();
        assert_eq!(encoded, json!("service_registration"));

        let decoded: UpdateType = serde_json::from_value(json!("relation_update")).unwrap();
        assert_eq!(decoded, UpdateType::RelationUpdate);
        assert!(decoded.is_append_style());
        assert!(!UpdateType::SchemaUpdate.is_append_style());
    }

    #[test]
    fn test_record_decodes_with_missing_fields() {
        let record: UpdateRecord = serde_json::from_value(json!({
            "type": "schema_update",
            "payload": {"fields": ["id"]}
        }))
        .unwrap();

        assert_eq!(record.id, "");
        assert_eq!(record.timestamp, None);
        assert!(matches!(record.validate(), Err(KgError::ValidationError(_))));
    }

    #[test]
    fn test_envelope_carries_record() {
        let mut record = UpdateRecord::new(
            "reg_user_1",
            UpdateType::ServiceRegistration,
            "user",
            json!({"capabilities": ["login"]}),
        );
        record.stamp(Utc::now());

        let envelope = EventEnvelope::for_update(&record).unwrap();
        assert_eq!(envelope.event_type, UPDATE_TOPIC);
        assert_eq!(envelope.id, "reg_user_1");
        assert_eq!(envelope.decode_update().unwrap(), record);
    }

    #[test]
    fn test_decode_rejects_malformed_payload() {
        let envelope = EventEnvelope {
            id: "evt-1".to_string(),
            event_type: UPDATE_TOPIC.to_string(),
            timestamp: 0,
            payload: json!({"type": "not_a_type"}),
            metadata: None,
        };
        assert!(matches!(envelope.decode_update(), Err(KgError::ParseError(_))));

        let empty = EventEnvelope { payload: Value::Null, ..envelope };
        assert!(matches!(empty.decode_update(), Err(KgError::ParseError(_))));
    }
}
