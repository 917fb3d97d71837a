//! Configuration for the knowledge graph service
//!
//! Defaults, then an optional config file, then `KG_*` environment
//! variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use kgraph_core::{KgError, KgResult, DEFAULT_CONSUMER_GROUP, UPDATE_TOPIC};
use kgraph_store::GraphPaths;

use crate::backoff::ReconnectPolicy;

/// Prefix for environment overrides, e.g. `KG_CACHE_URL`
pub const ENV_PREFIX: &str = "KG";

/// Service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Log filter, overridden by `RUST_LOG`
    pub log_filter: String,

    /// JSON log lines instead of pretty output
    pub json_logs: bool,

    /// Durable cache URL (`memory://...` or `redis://...`)
    pub cache_url: String,

    /// Event bus URL (`memory://...`)
    pub bus_url: String,

    /// Knowledge graph document
    pub graph_path: PathBuf,

    /// Directory for timestamped graph backups
    pub backup_dir: PathBuf,

    /// Topic carrying update envelopes
    pub topic: String,

    /// Consumer group shared by all instances
    pub consumer_group: String,

    /// Capacity of the buffer between subscriber and committer
    pub buffer_capacity: usize,

    /// Records per flush
    pub batch_size: usize,

    /// Longest wait between flushes
    pub flush_interval_ms: u64,

    /// How long processed markers are kept
    pub processed_ttl_secs: u64,

    /// How long batch backups are kept
    pub backup_ttl_secs: u64,

    /// Ceiling for the exponential reconnect delay
    pub max_backoff_secs: u64,

    /// Random jitter added to each reconnect delay is below this
    pub max_jitter_ms: u64,

    /// Default timeout for a publish
    pub publish_timeout_ms: u64,

    /// Timeout for the start-up and recovery cache ping
    pub dependency_check_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            json_logs: false,
            cache_url: "memory://local".to_string(),
            bus_url: "memory://local".to_string(),
            graph_path: PathBuf::from("data/knowledge_graph.json"),
            backup_dir: PathBuf::from("data/backups"),
            topic: UPDATE_TOPIC.to_string(),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            buffer_capacity: 100,
            batch_size: 100,
            flush_interval_ms: 5_000,
            processed_ttl_secs: 24 * 60 * 60,
            backup_ttl_secs: 24 * 60 * 60,
            max_backoff_secs: 30,
            max_jitter_ms: 1_000,
            publish_timeout_ms: 5_000,
            dependency_check_timeout_ms: 5_000,
        }
    }
}

/// Settings for the subscriber and batch committer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub topic: String,
    pub consumer_group: String,
    pub buffer_capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub processed_ttl: Duration,
    pub backup_ttl: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        ServiceConfig::default().pipeline()
    }
}

impl ServiceConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> KgResult<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    pub(crate) fn load_with_prefix(path: Option<&Path>, prefix: &str) -> KgResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(config::Environment::with_prefix(prefix).try_parsing(true));

        let config: ServiceConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| KgError::ConfigurationError(e.to_string()))?;
        config.validate()?;

        info!(
            cache_url = %config.cache_url,
            bus_url = %config.bus_url,
            graph_path = %config.graph_path.display(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> KgResult<()> {
        let positive = [
            ("buffer_capacity", self.buffer_capacity as u64),
            ("batch_size", self.batch_size as u64),
            ("flush_interval_ms", self.flush_interval_ms),
            ("processed_ttl_secs", self.processed_ttl_secs),
            ("backup_ttl_secs", self.backup_ttl_secs),
            ("publish_timeout_ms", self.publish_timeout_ms),
            ("dependency_check_timeout_ms", self.dependency_check_timeout_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(KgError::ConfigurationError(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        if self.topic.is_empty() || self.consumer_group.is_empty() {
            return Err(KgError::ConfigurationError(
                "topic and consumer_group must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            topic: self.topic.clone(),
            consumer_group: self.consumer_group.clone(),
            buffer_capacity: self.buffer_capacity,
            batch_size: self.batch_size,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            processed_ttl: Duration::from_secs(self.processed_ttl_secs),
            backup_ttl: Duration::from_secs(self.backup_ttl_secs),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_secs(self.max_backoff_secs),
            Duration::from_millis(self.max_jitter_ms),
        )
    }

    pub fn graph_paths(&self) -> GraphPaths {
        GraphPaths::new(&self.graph_path, &self.backup_dir)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn dependency_check_timeout(&self) -> Duration {
        Duration::from_millis(self.dependency_check_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_pipeline_constants() {
        let config = ServiceConfig::default();
        config.validate().unwrap();

        let pipeline = config.pipeline();
        assert_eq!(pipeline.topic, "knowledge_graph.update");
        assert_eq!(pipeline.consumer_group, "kg-hooks-workers");
        assert_eq!(pipeline.batch_size, 100);
        assert_eq!(pipeline.buffer_capacity, 100);
        assert_eq!(pipeline.flush_interval, Duration::from_secs(5));
        assert_eq!(pipeline.processed_ttl, Duration::from_secs(86_400));
        assert_eq!(pipeline.backup_ttl, Duration::from_secs(86_400));
    }

    #[test]
    fn test_file_then_environment_overrides() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"batch_size": 25, "cache_url": "memory://file"}}"#).unwrap();

        std::env::set_var("KGCFGTEST_CACHE_URL", "memory://env");
        std::env::set_var("KGCFGTEST_FLUSH_INTERVAL_MS", "250");
        let config = ServiceConfig::load_with_prefix(Some(file.path()), "KGCFGTEST").unwrap();
        std::env::remove_var("KGCFGTEST_CACHE_URL");
        std::env::remove_var("KGCFGTEST_FLUSH_INTERVAL_MS");

        assert_eq!(config.batch_size, 25);
        assert_eq!(config.cache_url, "memory://env");
        assert_eq!(config.flush_interval_ms, 250);
        assert_eq!(config.max_backoff_secs, 30);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = ServiceConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(KgError::ConfigurationError(_))));
    }

    #[test]
    fn test_missing_file_rejected() {
        let result = ServiceConfig::load_with_prefix(Some(Path::new("/nonexistent/kg.toml")), "KGCFGNONE");
        assert!(matches!(result, Err(KgError::ConfigurationError(_))));
    }
}
