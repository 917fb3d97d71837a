//! Typed access to the categorized sections, plus summary, pruning and
//! validation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

use kgraph_core::{KgError, KgResult};

use crate::snapshot::{Document, Section};
use crate::store::{GraphState, GraphStore};

/// One service or pattern with the category bucket it lives in
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub category: String,
    pub name: String,
    pub info: Value,
}

/// Overview of the graph contents
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphSummary {
    pub version: String,
    pub last_updated: DateTime<Utc>,
    pub service_count: usize,
    pub pattern_count: usize,
    pub service_names: Vec<String>,
    pub pattern_names: Vec<String>,
    pub service_categories: Vec<String>,
    pub pattern_categories: Vec<String>,
}

fn entries(section: &Document) -> impl Iterator<Item = (&String, &String, &Value)> {
    section.iter().flat_map(|(category, bucket)| {
        bucket
            .as_object()
            .into_iter()
            .flat_map(move |bucket| bucket.iter().map(move |(name, info)| (category, name, info)))
    })
}

fn find(section: &Document, name: &str) -> Option<CatalogEntry> {
    entries(section)
        .find(|(_, entry_name, _)| entry_name.as_str() == name)
        .map(|(category, name, info)| CatalogEntry {
            category: category.clone(),
            name: name.clone(),
            info: info.clone(),
        })
}

fn find_bucket<'a>(section: &'a mut Document, name: &str) -> Option<&'a mut serde_json::Map<String, Value>> {
    section
        .values_mut()
        .filter_map(Value::as_object_mut)
        .find(|bucket| bucket.contains_key(name))
}

fn names(section: &Document) -> Vec<String> {
    entries(section).map(|(_, name, _)| name.clone()).collect()
}

fn categories(section: &Document) -> Vec<String> {
    section.keys().cloned().collect()
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Names a service declares under `dependencies`
pub fn dependencies_of(info: &Value) -> Vec<&str> {
    info.get("dependencies")
        .and_then(Value::as_array)
        .map(|deps| deps.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

impl GraphStore {
    fn read_entry(&self, section: Section, name: &str) -> KgResult<Option<CatalogEntry>> {
        let state = self.state.read();
        state.ensure_loaded()?;
        Ok(find(state.sections.get(section), name))
    }

    fn replace_entry(&self, section: Section, name: &str, info: Value) -> KgResult<()> {
        let mut state = self.state.write();
        state.ensure_loaded()?;
        let bucket = find_bucket(state.sections.get_mut(section), name)
            .ok_or_else(|| not_found(section, name))?;
        bucket.insert(name.to_string(), info);
        self.last_updated.advance();
        Ok(())
    }

    fn remove_entry(&self, section: Section, name: &str) -> KgResult<()> {
        let mut state = self.state.write();
        state.ensure_loaded()?;
        let bucket = find_bucket(state.sections.get_mut(section), name)
            .ok_or_else(|| not_found(section, name))?;
        bucket.remove(name);
        self.last_updated.advance();
        Ok(())
    }

    fn entry_names(&self, section: Section) -> KgResult<Vec<String>> {
        let state = self.state.read();
        state.ensure_loaded()?;
        Ok(names(state.sections.get(section)))
    }

    pub fn get_service(&self, name: &str) -> KgResult<Option<CatalogEntry>> {
        self.read_entry(Section::Services, name)
    }

    /// Replace the info of an existing service, keeping its category
    pub fn update_service(&self, name: &str, info: Value) -> KgResult<()> {
        self.replace_entry(Section::Services, name, info)
    }

    pub fn delete_service(&self, name: &str) -> KgResult<()> {
        self.remove_entry(Section::Services, name)
    }

    pub fn list_service_names(&self) -> KgResult<Vec<String>> {
        self.entry_names(Section::Services)
    }

    pub fn get_pattern(&self, name: &str) -> KgResult<Option<CatalogEntry>> {
        self.read_entry(Section::Patterns, name)
    }

    /// Replace the info of an existing pattern, keeping its category
    pub fn update_pattern(&self, name: &str, info: Value) -> KgResult<()> {
        self.replace_entry(Section::Patterns, name, info)
    }

    pub fn delete_pattern(&self, name: &str) -> KgResult<()> {
        self.remove_entry(Section::Patterns, name)
    }

    pub fn list_pattern_names(&self) -> KgResult<Vec<String>> {
        self.entry_names(Section::Patterns)
    }

    pub fn describe(&self) -> KgResult<GraphSummary> {
        let state = self.state.read();
        state.ensure_loaded()?;
        let services = &state.sections.services;
        let patterns = &state.sections.patterns;

        let service_names = names(services);
        let pattern_names = names(patterns);
        Ok(GraphSummary {
            version: state.version.clone(),
            last_updated: self.last_updated.get(),
            service_count: service_names.len(),
            pattern_count: pattern_names.len(),
            service_names,
            pattern_names,
            service_categories: categories(services),
            pattern_categories: categories(patterns),
        })
    }

    /// Drop null, empty-string and empty-map entries from every section.
    /// Returns how many entries were removed.
    pub fn prune(&self) -> KgResult<usize> {
        let mut state = self.state.write();
        state.ensure_loaded()?;

        let mut removed = 0;
        for section in Section::ALL {
            let doc = state.sections.get_mut(section);
            if section.is_categorized() {
                for bucket in doc.values_mut().filter_map(Value::as_object_mut) {
                    let before = bucket.len();
                    bucket.retain(|_, info| !is_empty_value(info));
                    removed += before - bucket.len();
                }
            }
            let before = doc.len();
            doc.retain(|_, value| !is_empty_value(value));
            removed += before - doc.len();
        }

        self.last_updated.advance();
        debug!(removed, "Pruned knowledge graph");
        Ok(removed)
    }

    /// Version and timestamp are present
    pub fn validate(&self) -> KgResult<()> {
        let state = self.state.read();
        state.ensure_loaded()?;
        self.validate_header(&state)
    }

    fn validate_header(&self, state: &GraphState) -> KgResult<()> {
        if state.version.is_empty() {
            return Err(KgError::ValidationError("missing version".to_string()));
        }
        if self.last_updated.is_unset() {
            return Err(KgError::ValidationError("missing last_updated".to_string()));
        }
        Ok(())
    }

    /// `validate`, plus no empty names, no self-dependencies and no
    /// dependencies on undeclared services
    pub fn validate_full(&self) -> KgResult<()> {
        let state = self.state.read();
        state.ensure_loaded()?;
        self.validate_header(&state)?;

        let services = &state.sections.services;
        if entries(services).any(|(_, name, _)| name.is_empty()) {
            return Err(KgError::ValidationError("service with empty name detected".to_string()));
        }
        if entries(&state.sections.patterns).any(|(_, name, _)| name.is_empty()) {
            return Err(KgError::ValidationError("pattern with empty name detected".to_string()));
        }

        let declared: HashSet<&str> = entries(services).map(|(_, name, _)| name.as_str()).collect();
        for (_, name, info) in entries(services) {
            for dep in dependencies_of(info) {
                if dep == name.as_str() {
                    return Err(KgError::ValidationError(format!(
                        "service '{}' cannot depend on itself",
                        name
                    )));
                }
                if !declared.contains(dep) {
                    return Err(KgError::ValidationError(format!(
                        "service '{}' dependency '{}' does not exist",
                        name, dep
                    )));
                }
            }
        }
        Ok(())
    }
}

fn not_found(section: Section, name: &str) -> KgError {
    let kind = match section {
        Section::Patterns => "pattern",
        _ => "service",
    };
    KgError::NotFound(format!("{} '{}'", kind, name))
}
