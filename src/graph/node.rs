//! Node implementation for the embedded property graph

use super::property::{PropertyMap, PropertyValue};
use super::types::{Label, NodeId};
use serde::{Deserialize, Serialize};

/// A node in the property graph
///
/// Labels keep insertion order: the first label is the node's primary
/// entity type and is what the view model groups by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node
    pub id: NodeId,

    /// Labels for this node, primary label first
    pub labels: Vec<Label>,

    /// Properties associated with this node
    pub properties: PropertyMap,
}

impl Node {
    /// Create a new node with labels and properties
    pub fn new_with_properties(id: NodeId, labels: Vec<Label>, properties: PropertyMap) -> Self {
        let mut node = Node {
            id,
            labels: Vec::with_capacity(labels.len()),
            properties,
        };
        for label in labels {
            node.add_label(label);
        }
        node
    }

    /// Add a label to this node (no-op when already present)
    pub fn add_label(&mut self, label: impl Into<Label>) {
        let label = label.into();
        if !self.labels.contains(&label) {
            self.labels.push(label);
        }
    }

    /// Check if node has a specific label
    pub fn has_label(&self, label: &Label) -> bool {
        self.labels.contains(label)
    }

    /// Set a property value
    pub fn set_property(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        self.properties.insert(key.into(), value.into())
    }

    /// Get a property value
    pub fn get_property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_keep_order_and_dedup() {
        let node = Node::new_with_properties(
            NodeId::new(1),
            vec![Label::new("Sector"), Label::new("Archived"), Label::new("Sector")],
            PropertyMap::new(),
        );
        assert_eq!(node.labels, vec![Label::new("Sector"), Label::new("Archived")]);
        assert!(node.has_label(&Label::new("Archived")));
    }

    #[test]
    fn test_properties() {
        let mut node = Node::new_with_properties(
            NodeId::new(1),
            vec![Label::new("Industry")],
            PropertyMap::new(),
        );
        assert!(node.set_property("name", "Banking").is_none());
        assert_eq!(
            node.get_property("name").and_then(|v| v.as_string()),
            Some("Banking")
        );
    }
}
