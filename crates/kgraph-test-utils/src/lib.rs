//! Fakes and builders for testing the knowledge graph pipeline.

pub mod builders;
pub mod cache;
pub mod event_bus;

pub use builders::RecordBuilder;
pub use cache::FaultyCache;
pub use event_bus::ScriptedEventBus;
