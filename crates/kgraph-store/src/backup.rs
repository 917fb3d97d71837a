//! Timestamped file backups of the graph document.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use kgraph_core::{KgError, KgResult};

use crate::snapshot::load_from_file;
use crate::store::GraphStore;

const BACKUP_FILE_FORMAT: &str = "knowledge_graph_%Y%m%d_%H%M%S.json";

/// Manifest describing one backup file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub timestamp: DateTime<Utc>,
    /// Graph version captured, empty if the file could not be read
    pub version: String,
    pub description: String,
    pub path: PathBuf,
}

/// File name for a backup taken at `at`
pub fn backup_file_name(at: DateTime<Utc>) -> String {
    at.format(BACKUP_FILE_FORMAT).to_string()
}

fn parse_backup_file_name(name: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(name, BACKUP_FILE_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Scan `dir` for backup files, oldest first.
///
/// The timestamp comes from the file name; the version is read from the
/// body when possible.
pub fn list_backups(dir: impl AsRef<Path>) -> KgResult<Vec<BackupInfo>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|e| {
        KgError::IOError(format!("failed to create backup directory {}: {}", dir.display(), e))
    })?;
    let entries = fs::read_dir(dir).map_err(|e| {
        KgError::IOError(format!("failed to read backup directory {}: {}", dir.display(), e))
    })?;

    let mut backups = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(timestamp) = name.to_str().and_then(parse_backup_file_name) else {
            continue;
        };

        let path = entry.path();
        let version = load_from_file(&path).map(|s| s.version).unwrap_or_default();
        backups.push(BackupInfo {
            timestamp,
            version,
            description: String::new(),
            path,
        });
    }

    backups.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.path.cmp(&b.path)));
    Ok(backups)
}

impl GraphStore {
    /// Write the full document to a timestamp-named file in the backup
    /// directory
    pub fn backup(&self, description: &str) -> KgResult<BackupInfo> {
        let state = self.state.read();
        state.ensure_loaded()?;

        let timestamp = Utc::now();
        let path = self.paths.backup_dir.join(backup_file_name(timestamp));
        let snapshot = self.snapshot_of(&state);
        snapshot.write_to(&path)?;

        info!(path = %path.display(), version = %snapshot.version, "Knowledge graph backup created");
        Ok(BackupInfo {
            timestamp,
            version: snapshot.version,
            description: description.to_string(),
            path,
        })
    }

    /// Swap in the document stored at `path`
    pub fn restore_from_backup(&self, path: impl AsRef<Path>) -> KgResult<()> {
        let path = path.as_ref();
        let snapshot = load_from_file(path)?;

        let mut state = self.state.write();
        state.version = snapshot.version;
        state.sections = snapshot.sections;
        state.loaded = true;
        self.last_updated.set(snapshot.last_updated);
        self.last_updated.advance();

        info!(path = %path.display(), version = %state.version, "Knowledge graph restored from backup");
        Ok(())
    }

    /// Backups in this store's backup directory, oldest first
    pub fn list_backups(&self) -> KgResult<Vec<BackupInfo>> {
        list_backups(&self.paths.backup_dir)
    }

    /// Restore the newest backup, then write it to the document path
    pub fn sync_from_latest_backup(&self) -> KgResult<BackupInfo> {
        let latest = self
            .list_backups()?
            .pop()
            .ok_or_else(|| KgError::NotFound("knowledge graph backup".to_string()))?;
        debug!(path = %latest.path.display(), "Syncing knowledge graph from latest backup");

        self.restore_from_backup(&latest.path)?;
        self.persist()?;
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_file_name_round_trip() {
        let at: DateTime<Utc> = "2024-03-09T07:05:01Z".parse().unwrap();
        let name = backup_file_name(at);
        assert_eq!(name, "knowledge_graph_20240309_070501.json");
        assert_eq!(parse_backup_file_name(&name), Some(at));
        assert_eq!(parse_backup_file_name("knowledge_graph.json"), None);
        assert_eq!(parse_backup_file_name("notes_20240309_070501.json"), None);
    }
}
