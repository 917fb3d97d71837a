//! Core types for the knowledge graph ingestion pipeline.
//!
//! Shared by the graph store, the durable cache and the pipeline server.

pub mod error;
pub mod keys;
pub mod types;

pub use error::{KgError, KgResult};
pub use types::{
    EventEnvelope, UpdateRecord, UpdateType, DEFAULT_CONSUMER_GROUP, RECORD_VERSION, UPDATE_TOPIC,
};
