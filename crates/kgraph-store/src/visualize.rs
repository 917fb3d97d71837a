use serde_json::Value;
use std::collections::HashSet;
use std::fmt::Write;
use tracing::debug;

use kgraph_core::{KgError, KgResult};

use crate::catalog::dependencies_of;
use crate::store::GraphStore;

/// Service bucket drawn by the mermaid renderer
pub const CORE_SERVICES: &str = "core_services";

fn quoted(label: &str) -> String {
    serde_json::to_string(label).unwrap_or_else(|_| format!("\"{}\"", label))
}

impl GraphStore {
    /// Render part of the graph. Only `("mermaid", "services")` is
    /// supported: a dependency graph over the `core_services` bucket.
    pub fn generate_visualization(&self, format: &str, section: &str) -> KgResult<String> {
        let state = self.state.read();
        state.ensure_loaded()?;

        if format != "mermaid" || section != "services" {
            return Err(KgError::NotImplemented(format!(
                "visualization format '{}' for section '{}'",
                format, section
            )));
        }

        let empty = serde_json::Map::new();
        let services = state
            .sections
            .services
            .get(CORE_SERVICES)
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        let mut out = String::from("graph TD\n");
        // `write!` into a String cannot fail
        for name in services.keys() {
            let _ = writeln!(out, "    service_{}[{}]", name, quoted(name));
        }

        let mut synthesized = HashSet::new();
        for (name, info) in services {
            for dep in dependencies_of(info) {
                let target = if services.contains_key(dep) {
                    format!("service_{}", dep)
                } else {
                    if synthesized.insert(dep) {
                        let _ = writeln!(out, "    {}[{}]", dep, quoted(dep));
                    }
                    dep.to_string()
                };
                let _ = writeln!(out, "    service_{} --> {}", name, target);
            }
        }

        debug!(services = services.len(), "Generated mermaid visualization");
        Ok(out)
    }
}
