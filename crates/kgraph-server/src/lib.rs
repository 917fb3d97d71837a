//!
//! KGraph Server - real-time ingestion pipeline for the knowledge graph
//!
//! An event subscriber feeds decoded updates into a batch committer that
//! applies them to the durable cache; the lifecycle coordinator supervises
//! both and degrades instead of failing when the cache is unavailable.

use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Event bus module
pub mod bus;

/// Reconnect backoff module
pub mod backoff;

/// Batch committer module
pub mod committer;

/// Configuration module
pub mod config;

/// Lifecycle coordinator module
pub mod coordinator;

/// Event subscriber module
pub mod subscriber;

// Re-export key types
pub use backoff::ReconnectPolicy;
pub use bus::{create_event_bus, EnvelopeStream, EventBus, InMemoryEventBus};
pub use committer::{BatchCommitter, CommitterState, FlushReport};
pub use config::{PipelineConfig, ServiceConfig};
pub use coordinator::{KnowledgeGraphService, LifecycleState};
pub use subscriber::{EventSubscriber, SubscriberState};

use kgraph_cache::create_durable_cache;
use kgraph_core::KgResult;
use kgraph_store::GraphStore;

/// Build the service from configuration without starting it
pub async fn build_service(config: ServiceConfig) -> KgResult<KnowledgeGraphService> {
    let cache = create_durable_cache(&config.cache_url).await?;
    let bus = create_event_bus(&config.bus_url).await?;
    let graph = Arc::new(GraphStore::open(config.graph_paths()));
    Ok(KnowledgeGraphService::new(graph, cache, bus, config))
}

/// Run the service until `shutdown` resolves
pub async fn run_until<F>(config: ServiceConfig, shutdown: F) -> KgResult<()>
where
    F: Future<Output = ()>,
{
    let service = build_service(config).await?;
    let state = service.start().await;
    info!(state = ?state, "Knowledge graph service running");

    shutdown.await;
    info!("Shutdown signal received");
    service.stop().await
}

/// Run the service until Ctrl-C
pub async fn run(config: ServiceConfig) -> KgResult<()> {
    run_until(config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    })
    .await
}
