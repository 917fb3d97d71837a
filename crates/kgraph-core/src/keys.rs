//! Durable-cache key namespaces.

use crate::types::{UpdateRecord, UpdateType};

pub const SERVICE_PREFIX: &str = "kg:service:";
pub const SCHEMA_PREFIX: &str = "kg:schema:";
pub const PATTERN_PREFIX: &str = "kg:pattern:";
pub const RELATION_PREFIX: &str = "kg:relation:";
pub const PROCESSED_PREFIX: &str = "kg:processed:";
pub const BACKUP_PREFIX: &str = "kg:backup:";

/// The four namespaces captured by batch backups
pub const GRAPH_PREFIXES: [&str; 4] = [SERVICE_PREFIX, SCHEMA_PREFIX, PATTERN_PREFIX, RELATION_PREFIX];

pub fn service_key(service_id: &str) -> String {
    format!("{}{}", SERVICE_PREFIX, service_id)
}

pub fn schema_key(service_id: &str) -> String {
    format!("{}{}", SCHEMA_PREFIX, service_id)
}

pub fn pattern_key(service_id: &str, nanos: i64) -> String {
    format!("{}{}:{}", PATTERN_PREFIX, service_id, nanos)
}

pub fn relation_key(service_id: &str, nanos: i64) -> String {
    format!("{}{}:{}", RELATION_PREFIX, service_id, nanos)
}

pub fn processed_key(update_id: &str) -> String {
    format!("{}{}", PROCESSED_PREFIX, update_id)
}

pub fn backup_key(unix_secs: i64) -> String {
    format!("{}{}", BACKUP_PREFIX, unix_secs)
}

/// Key a record's payload is written to. `nanos` only matters for
/// append-style types.
pub fn data_key(record: &UpdateRecord, nanos: i64) -> String {
    match record.update_type {
        UpdateType::ServiceRegistration => service_key(&record.service_id),
        UpdateType::SchemaUpdate => schema_key(&record.service_id),
        UpdateType::PatternDetection => pattern_key(&record.service_id, nanos),
        UpdateType::RelationUpdate => relation_key(&record.service_id, nanos),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_layout() {
        assert_eq!(service_key("user"), "kg:service:user");
        assert_eq!(relation_key("user", 42), "kg:relation:user:42");
        assert_eq!(processed_key("u-1"), "kg:processed:u-1");
        assert_eq!(backup_key(1700000000), "kg:backup:1700000000");
    }

    #[test]
    fn test_data_key_by_type() {
        let record = UpdateRecord::new("p-1", UpdateType::PatternDetection, "search", json!({}));
        assert_eq!(data_key(&record, 7), "kg:pattern:search:7");

        let record = UpdateRecord::new("s-1", UpdateType::SchemaUpdate, "search", json!({}));
        assert_eq!(data_key(&record, 7), "kg:schema:search");
    }
}
