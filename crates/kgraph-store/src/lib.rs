//! Knowledge graph document store.
//!
//! A versioned in-memory document guarded by one read/write lock, persisted
//! as pretty-printed JSON, with timestamped file backups and a mermaid
//! dependency view of the core services.

mod backup;
mod catalog;
mod snapshot;
mod store;
mod visualize;

pub use backup::{backup_file_name, list_backups, BackupInfo};
pub use catalog::{dependencies_of, CatalogEntry, GraphSummary};
pub use snapshot::{load_from_file, Document, GraphSnapshot, Section, Sections};
pub use store::{GraphPaths, GraphStore, INITIAL_VERSION};
pub use visualize::CORE_SERVICES;
