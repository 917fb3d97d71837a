use anyhow::{Context, Result};
use kgraph_monitoring::MonitoringConfig;
use kgraph_server::ServiceConfig;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    // Optional config file, everything else comes from KG_* variables
    let config_path = std::env::var("KG_CONFIG").ok().map(PathBuf::from);
    let config = ServiceConfig::load(config_path.as_deref())
        .context("Failed to load configuration")?;

    let monitoring_config = MonitoringConfig {
        service_name: "kgraph-server".to_string(),
        log_filter: config.log_filter.clone(),
        enable_json_logging: config.json_logs,
        environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
    };
    kgraph_monitoring::init_logging(&monitoring_config)
        .context("Failed to initialize logging")?;

    kgraph_server::run(config).await.context("Server error")?;

    Ok(())
}
