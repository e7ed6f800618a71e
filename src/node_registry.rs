//! Node topology registry
//!
//! Loads `nodes.json`, the external collaborator artifact that maps each
//! node id to its role and base URL. Built once at startup and held
//! immutably in `AppState` for the life of the process — this crate never
//! rewrites the file.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::config::NodeRole;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct NodeEntry {
    pub role: NodeRole,
    pub url: String,
}

/// In-memory view of `nodes.json`.
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    nodes: HashMap<String, NodeEntry>,
}

impl NodeRegistry {
    /// Load the registry from a JSON file on disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("reading {}: {e}", path.display())))?;
        let nodes: HashMap<String, NodeEntry> = serde_json::from_str(&content)?;
        Ok(Self { nodes })
    }

    pub fn all(&self) -> &HashMap<String, NodeEntry> {
        &self.nodes
    }

    /// Base URLs of every node whose role is `participant`.
    pub fn participant_urls(&self) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| n.role == NodeRole::Participant)
            .map(|n| n.url.clone())
            .collect()
    }

    /// Base URL of the single coordinator, if the registry lists one.
    pub fn coordinator_url(&self) -> Option<&str> {
        self.nodes
            .values()
            .find(|n| n.role == NodeRole::Coordinator)
            .map(|n| n.url.as_str())
    }

    pub fn node_url(&self, node_id: &str) -> Option<&str> {
        self.nodes.get(node_id).map(|n| n.url.as_str())
    }

    pub fn is_participant(&self, node_id: &str) -> bool {
        self.nodes
            .get(node_id)
            .map(|n| n.role == NodeRole::Participant)
            .unwrap_or(false)
    }

    pub fn is_coordinator(&self, node_id: &str) -> bool {
        self.nodes
            .get(node_id)
            .map(|n| n.role == NodeRole::Coordinator)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{
                "coord": {{"role": "coordinator", "url": "http://localhost:8080"}},
                "p1": {{"role": "participant", "url": "http://localhost:8081"}},
                "p2": {{"role": "participant", "url": "http://localhost:8082"}}
            }}"#
        )
        .unwrap();
        file
    }

    #[test]
    fn participant_urls_excludes_coordinator() {
        let file = write_fixture();
        let registry = NodeRegistry::load(file.path()).unwrap();
        let mut urls = registry.participant_urls();
        urls.sort();
        assert_eq!(urls, vec!["http://localhost:8081", "http://localhost:8082"]);
    }

    #[test]
    fn coordinator_url_resolves() {
        let file = write_fixture();
        let registry = NodeRegistry::load(file.path()).unwrap();
        assert_eq!(registry.coordinator_url(), Some("http://localhost:8080"));
        assert!(registry.is_coordinator("coord"));
        assert!(registry.is_participant("p1"));
        assert!(!registry.is_participant("coord"));
    }

    #[test]
    fn missing_file_is_config_error() {
        let result = NodeRegistry::load("/nonexistent/nodes.json");
        assert!(result.is_err());
    }
}
