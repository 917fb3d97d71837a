//! The lock-protected graph document.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use kgraph_core::{KgError, KgResult};

use crate::snapshot::{load_from_file, Document, GraphSnapshot, Section, Sections};

/// Version given to a freshly initialised graph
pub const INITIAL_VERSION: &str = "1.0.0";

/// Where the graph lives on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphPaths {
    /// Main document, written by `persist` and by `add_service`
    pub document: PathBuf,
    /// Directory holding timestamped backups
    pub backup_dir: PathBuf,
}

impl GraphPaths {
    pub fn new(document: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            document: document.into(),
            backup_dir: backup_dir.into(),
        }
    }

    /// Document and `backups/` next to each other under `root`
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self::new(root.join("knowledge_graph.json"), root.join("backups"))
    }
}

/// `last_updated`, kept outside the document lock so `save` can stamp while
/// holding only a read lock. `None` until a document is loaded.
#[derive(Debug, Default)]
pub(crate) struct Stamp(Mutex<Option<DateTime<Utc>>>);

impl Stamp {
    /// Move forward to now, or one nanosecond past the previous value if
    /// the clock has not caught up with it
    pub(crate) fn advance(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let mut current = self.0.lock();
        let next = match *current {
            Some(prev) if prev >= now => prev
                .checked_add_signed(chrono::Duration::nanoseconds(1))
                .unwrap_or(prev),
            _ => now,
        };
        *current = Some(next);
        next
    }

    pub(crate) fn set(&self, at: DateTime<Utc>) {
        *self.0.lock() = Some(at);
    }

    /// The current stamp, or the epoch when nothing was loaded yet
    pub(crate) fn get(&self) -> DateTime<Utc> {
        let current = *self.0.lock();
        current.unwrap_or_else(|| Utc.timestamp_nanos(0))
    }

    pub(crate) fn is_unset(&self) -> bool {
        self.0.lock().is_none()
    }
}

/// Fields guarded by the store's lock
#[derive(Debug, Default)]
pub(crate) struct GraphState {
    pub(crate) version: String,
    pub(crate) sections: Sections,
    pub(crate) loaded: bool,
}

impl GraphState {
    pub(crate) fn ensure_loaded(&self) -> KgResult<()> {
        if self.loaded {
            Ok(())
        } else {
            Err(KgError::NotLoaded)
        }
    }

    fn replace(&mut self, snapshot: GraphSnapshot) {
        self.version = snapshot.version;
        self.sections = snapshot.sections;
        self.loaded = true;
    }

    /// Bump the patch component, resetting anything that is not `x.y.z`
    fn increment_version(&mut self) {
        let parts: Vec<&str> = self.version.split('.').collect();
        self.version = match parts.as_slice() {
            [major, minor, patch] => match patch.parse::<u64>() {
                Ok(patch) => format!("{}.{}.{}", major, minor, patch + 1),
                Err(_) => INITIAL_VERSION.to_string(),
            },
            _ => INITIAL_VERSION.to_string(),
        };
    }
}

/// Versioned knowledge graph document.
///
/// One instance per process, constructed at start-up and shared by handle.
/// A single read/write lock guards the document.
#[derive(Debug)]
pub struct GraphStore {
    pub(crate) paths: GraphPaths,
    pub(crate) state: RwLock<GraphState>,
    pub(crate) last_updated: Stamp,
}

impl GraphStore {
    /// An unloaded store. Every operation fails with `NotLoaded` until
    /// `load` succeeds.
    pub fn new(paths: GraphPaths) -> Self {
        Self {
            paths,
            state: RwLock::new(GraphState::default()),
            last_updated: Stamp::default(),
        }
    }

    /// Load the document at `paths.document`, or start from an empty graph
    pub fn open(paths: GraphPaths) -> Self {
        let store = Self::new(paths);
        let document = store.paths.document.clone();

        match store.load(&document) {
            Ok(()) => info!("Loaded knowledge graph from {}", document.display()),
            Err(e) => {
                if document.exists() {
                    warn!("Knowledge graph at {} unreadable, starting empty: {}", document.display(), e);
                } else {
                    info!("No knowledge graph at {}, starting empty", document.display());
                }
                let mut state = store.state.write();
                state.replace(GraphSnapshot {
                    version: INITIAL_VERSION.to_string(),
                    last_updated: Utc::now(),
                    sections: Sections::default(),
                });
                store.last_updated.advance();
            }
        }
        store
    }

    pub fn paths(&self) -> &GraphPaths {
        &self.paths
    }

    pub fn is_loaded(&self) -> bool {
        self.state.read().loaded
    }

    pub fn version(&self) -> KgResult<String> {
        let state = self.state.read();
        state.ensure_loaded()?;
        Ok(state.version.clone())
    }

    pub fn last_updated(&self) -> KgResult<DateTime<Utc>> {
        self.state.read().ensure_loaded()?;
        Ok(self.last_updated.get())
    }

    /// Copy of the whole document
    pub fn snapshot(&self) -> KgResult<GraphSnapshot> {
        let state = self.state.read();
        state.ensure_loaded()?;
        Ok(self.snapshot_of(&state))
    }

    pub(crate) fn snapshot_of(&self, state: &GraphState) -> GraphSnapshot {
        GraphSnapshot {
            version: state.version.clone(),
            last_updated: self.last_updated.get(),
            sections: state.sections.clone(),
        }
    }

    /// Replace the in-memory document with the one at `path`
    pub fn load(&self, path: impl AsRef<Path>) -> KgResult<()> {
        let snapshot = load_from_file(path.as_ref())?;
        let mut state = self.state.write();
        self.last_updated.set(snapshot.last_updated);
        state.replace(snapshot);
        debug!("Knowledge graph loaded from {}", path.as_ref().display());
        Ok(())
    }

    /// Stamp `last_updated` and write the document to `path`.
    ///
    /// Holds only the read lock while the stamp moves.
    pub fn save(&self, path: impl AsRef<Path>) -> KgResult<()> {
        let state = self.state.read();
        state.ensure_loaded()?;
        self.last_updated.advance();
        self.snapshot_of(&state).write_to(path.as_ref())
    }

    /// Save to the configured document path
    pub fn persist(&self) -> KgResult<()> {
        self.save(&self.paths.document)
    }

    /// Read a top-level field. Dotted paths are not resolved.
    pub fn get_node(&self, path: &str) -> KgResult<Value> {
        let state = self.state.read();
        state.ensure_loaded()?;

        match path {
            "version" => Ok(Value::String(state.version.clone())),
            "last_updated" => Ok(Value::String(self.last_updated.get().to_rfc3339())),
            other => match Section::from_name(other) {
                Some(section) => Ok(Value::Object(state.sections.get(section).clone())),
                None => Err(KgError::NotImplemented(format!(
                    "get_node supports top-level fields only, got '{}'",
                    path
                ))),
            },
        }
    }

    /// Replace a top-level field after checking the value's shape
    pub fn update_node(&self, path: &str, value: Value) -> KgResult<()> {
        let mut state = self.state.write();
        state.ensure_loaded()?;

        match path {
            "version" => match value {
                Value::String(version) => state.version = version,
                _ => return Err(mismatch(path, "string")),
            },
            "last_updated" => {
                let at = value
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .ok_or_else(|| mismatch(path, "RFC3339 timestamp string"))?;
                self.last_updated.set(at.with_timezone(&Utc));
            }
            other => {
                let section = Section::from_name(other).ok_or_else(|| {
                    KgError::NotImplemented(format!(
                        "update_node supports top-level fields only, got '{}'",
                        path
                    ))
                })?;
                let map = match value {
                    Value::Object(map) => map,
                    _ => return Err(mismatch(path, "object")),
                };
                if section.is_categorized() && !map.values().all(Value::is_object) {
                    return Err(mismatch(path, "object of category objects"));
                }
                *state.sections.get_mut(section) = map;
            }
        }

        self.last_updated.advance();
        Ok(())
    }

    /// Upsert a service under `category`, bump the patch version and write
    /// the document
    pub fn add_service(&self, category: &str, name: &str, info: Map<String, Value>) -> KgResult<()> {
        let mut state = self.state.write();
        state.ensure_loaded()?;

        upsert(&mut state.sections.services, category, name, info);
        state.increment_version();
        self.last_updated.advance();
        debug!(category, name, version = %state.version, "Service added to knowledge graph");

        self.snapshot_of(&state).write_to(&self.paths.document)
    }

    /// Upsert a pattern under `category`
    pub fn add_pattern(&self, category: &str, name: &str, info: Map<String, Value>) -> KgResult<()> {
        let mut state = self.state.write();
        state.ensure_loaded()?;

        upsert(&mut state.sections.patterns, category, name, info);
        self.last_updated.advance();
        Ok(())
    }
}

fn mismatch(path: &str, expected: &str) -> KgError {
    KgError::TypeMismatch {
        path: path.to_string(),
        expected: expected.to_string(),
    }
}

/// Insert into `section[category][name]`, creating the category bucket if
/// absent or malformed
pub(crate) fn upsert(section: &mut Document, category: &str, name: &str, info: Map<String, Value>) {
    let bucket = section
        .entry(category.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !bucket.is_object() {
        *bucket = Value::Object(Map::new());
    }
    if let Value::Object(bucket) = bucket {
        bucket.insert(name.to_string(), Value::Object(info));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_strictly_increases() {
        let stamp = Stamp::default();
        let far_future: DateTime<Utc> = "2200-01-01T00:00:00Z".parse().unwrap();
        stamp.set(far_future);

        let first = stamp.advance();
        let second = stamp.advance();
        assert!(first > far_future);
        assert!(second > first);
    }

    #[test]
    fn test_stamp_keeps_dates_beyond_nanosecond_range() {
        let stamp = Stamp::default();
        assert!(stamp.is_unset());

        let year_3000: DateTime<Utc> = "3000-01-01T00:00:00Z".parse().unwrap();
        stamp.set(year_3000);
        assert_eq!(stamp.get(), year_3000);
        assert!(stamp.advance() > year_3000);

        let epoch: DateTime<Utc> = "1970-01-01T00:00:00Z".parse().unwrap();
        stamp.set(epoch);
        assert!(!stamp.is_unset());
        assert_eq!(stamp.get(), epoch);
    }

    #[test]
    fn test_increment_version() {
        let mut state = GraphState {
            version: "1.0.9".to_string(),
            ..Default::default()
        };
        state.increment_version();
        assert_eq!(state.version, "1.0.10");

        state.version = "v2".to_string();
        state.increment_version();
        assert_eq!(state.version, INITIAL_VERSION);

        state.version = "1.0.x".to_string();
        state.increment_version();
        assert_eq!(state.version, INITIAL_VERSION);
    }
}
