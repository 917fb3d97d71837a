//! On-disk shape of the knowledge graph document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::Path;

use kgraph_core::{KgError, KgResult};

/// Ordered string-keyed map of arbitrary values
pub type Document = Map<String, Value>;

/// Named top-level sections of the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    SystemComponents,
    RepositoryStructure,
    Services,
    Nexus,
    Patterns,
    DatabasePractices,
    RedisPractices,
    AmadeusIntegration,
}

impl Section {
    pub const ALL: [Section; 8] = [
        Section::SystemComponents,
        Section::RepositoryStructure,
        Section::Services,
        Section::Nexus,
        Section::Patterns,
        Section::DatabasePractices,
        Section::RedisPractices,
        Section::AmadeusIntegration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::SystemComponents => "system_components",
            Section::RepositoryStructure => "repository_structure",
            Section::Services => "services",
            Section::Nexus => "nexus",
            Section::Patterns => "patterns",
            Section::DatabasePractices => "database_practices",
            Section::RedisPractices => "redis_practices",
            Section::AmadeusIntegration => "amadeus_integration",
        }
    }

    pub fn from_name(name: &str) -> Option<Section> {
        Section::ALL.into_iter().find(|s| s.as_str() == name)
    }

    /// Sections whose values are `category -> name -> info`
    pub fn is_categorized(&self) -> bool {
        matches!(self, Section::Services | Section::Patterns)
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The eight sections of the graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sections {
    #[serde(default)]
    pub system_components: Document,
    #[serde(default)]
    pub repository_structure: Document,
    #[serde(default)]
    pub services: Document,
    #[serde(default)]
    pub nexus: Document,
    #[serde(default)]
    pub patterns: Document,
    #[serde(default)]
    pub database_practices: Document,
    #[serde(default)]
    pub redis_practices: Document,
    #[serde(default)]
    pub amadeus_integration: Document,
}

impl Sections {
    pub fn get(&self, section: Section) -> &Document {
        match section {
            Section::SystemComponents => &self.system_components,
            Section::RepositoryStructure => &self.repository_structure,
            Section::Services => &self.services,
            Section::Nexus => &self.nexus,
            Section::Patterns => &self.patterns,
            Section::DatabasePractices => &self.database_practices,
            Section::RedisPractices => &self.redis_practices,
            Section::AmadeusIntegration => &self.amadeus_integration,
        }
    }

    pub fn get_mut(&mut self, section: Section) -> &mut Document {
        match section {
            Section::SystemComponents => &mut self.system_components,
            Section::RepositoryStructure => &mut self.repository_structure,
            Section::Services => &mut self.services,
            Section::Nexus => &mut self.nexus,
            Section::Patterns => &mut self.patterns,
            Section::DatabasePractices => &mut self.database_practices,
            Section::RedisPractices => &mut self.redis_practices,
            Section::AmadeusIntegration => &mut self.amadeus_integration,
        }
    }
}

/// Full versioned document as written to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub version: String,
    pub last_updated: DateTime<Utc>,
    #[serde(flatten)]
    pub sections: Sections,
}

impl GraphSnapshot {
    /// Pretty-printed JSON form
    pub fn to_pretty_json(&self) -> KgResult<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| KgError::EncodeError(e.to_string()))
    }

    /// Write the document, creating parent directories as needed
    pub fn write_to(&self, path: &Path) -> KgResult<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| {
                KgError::IOError(format!("failed to create directory {}: {}", dir.display(), e))
            })?;
        }
        let data = self.to_pretty_json()?;
        fs::write(path, data).map_err(|e| {
            KgError::IOError(format!("failed to write {}: {}", path.display(), e))
        })
    }
}

/// Read a graph document from disk without touching any store
pub fn load_from_file(path: impl AsRef<Path>) -> KgResult<GraphSnapshot> {
    let path = path.as_ref();
    let data = fs::read(path)
        .map_err(|e| KgError::IOError(format!("failed to read {}: {}", path.display(), e)))?;
    serde_json::from_slice(&data)
        .map_err(|e| KgError::ParseError(format!("failed to parse {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_section_names_round_trip() {
        for section in Section::ALL {
            assert_eq!(Section::from_name(section.as_str()), Some(section));
        }
        assert_eq!(Section::from_name("services.core_services"), None);
    }

    #[test]
    fn test_document_layout() {
        let mut sections = Sections::default();
        sections
            .services
            .insert("core_services".to_string(), json!({"user": {}}));
        let snapshot = GraphSnapshot {
            version: "1.0.0".to_string(),
            last_updated: "2024-05-01T10:00:00Z".parse().unwrap(),
            sections,
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["version"], json!("1.0.0"));
        assert_eq!(value["last_updated"], json!("2024-05-01T10:00:00Z"));
        assert_eq!(value["services"]["core_services"]["user"], json!({}));
        assert_eq!(value["redis_practices"], json!({}));
    }

    #[test]
    fn test_missing_sections_default_to_empty() {
        let snapshot: GraphSnapshot = serde_json::from_value(json!({
            "version": "2.1.0",
            "last_updated": "2024-05-01T10:00:00Z",
            "nexus": {"bus": "event"}
        }))
        .unwrap();

        assert!(snapshot.sections.services.is_empty());
        assert_eq!(snapshot.sections.nexus["bus"], json!("event"));
    }
}
