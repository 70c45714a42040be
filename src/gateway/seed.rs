//! JSON dataset seeding for the embedded backend
//!
//! ```json
//! {
//!   "nodes": [{"key": "banking", "label": "Industry", "properties": {"name": "Banking"}}],
//!   "relationships": [{"from": "banking", "to": "retail", "type": "HAS_SECTOR"}]
//! }
//! ```

use crate::graph::{GraphError, GraphStore, Label, NodeId, PropertyMap, PropertyValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("Failed to read dataset: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid dataset JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Duplicate node key: {0}")]
    DuplicateKey(String),

    #[error("Relationship refers to unknown node key: {0}")]
    UnknownKey(String),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub nodes: Vec<SeedNode>,
    #[serde(default)]
    pub relationships: Vec<SeedRelationship>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedNode {
    /// Dataset-local key referenced by relationships
    pub key: String,
    pub label: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedRelationship {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

fn to_property_map(properties: &serde_json::Map<String, serde_json::Value>) -> PropertyMap {
    properties
        .iter()
        .map(|(k, v)| (k.clone(), PropertyValue::from_json(v)))
        .collect()
}

impl Dataset {
    pub fn from_json(text: &str) -> Result<Self, SeedError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, SeedError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Insert every node and relationship into `store`
    pub fn load_into(&self, store: &mut GraphStore) -> Result<(), SeedError> {
        let mut keys: HashMap<&str, NodeId> = HashMap::new();
        for node in &self.nodes {
            if keys.contains_key(node.key.as_str()) {
                return Err(SeedError::DuplicateKey(node.key.clone()));
            }
            let id = store.create_node_with_properties(
                vec![Label::new(node.label.as_str())],
                to_property_map(&node.properties),
            );
            keys.insert(&node.key, id);
        }

        for rel in &self.relationships {
            let from = *keys
                .get(rel.from.as_str())
                .ok_or_else(|| SeedError::UnknownKey(rel.from.clone()))?;
            let to = *keys
                .get(rel.to.as_str())
                .ok_or_else(|| SeedError::UnknownKey(rel.to.clone()))?;
            store.create_edge_with_properties(
                from,
                to,
                rel.rel_type.as_str(),
                to_property_map(&rel.properties),
            )?;
        }
        Ok(())
    }

    /// A small industry catalogue used by the server when no dataset is configured
    pub fn sample() -> Self {
        let text = include_str!("sample_dataset.json");
        serde_json::from_str(text).unwrap_or_default()
    }
}
