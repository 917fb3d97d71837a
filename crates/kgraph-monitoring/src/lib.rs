//! Logging setup shared by the knowledge graph binaries and tests.

pub mod logging;

pub use logging::{init_logging, init_test_tracing, LogExt};

/// Configuration for initializing logging
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Service name attached to the start-up log line
    pub service_name: String,
    /// Log level filter (e.g., "info,kgraph_server=debug"), overridden by `RUST_LOG`
    pub log_filter: String,
    /// JSON lines instead of the pretty development format
    pub enable_json_logging: bool,
    /// Environment (dev, staging, prod)
    pub environment: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            service_name: "kgraph".to_string(),
            log_filter: "info".to_string(),
            enable_json_logging: false,
            environment: "dev".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MonitoringConfig::default();
        assert_eq!(config.service_name, "kgraph");
        assert_eq!(config.log_filter, "info");
        assert!(!config.enable_json_logging);
    }
}
