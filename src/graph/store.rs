//! In-memory graph storage for the embedded store backend
//!
//! Nodes and edges live in ordered maps so that scans are deterministic:
//! the same query over an unchanged graph yields rows in the same order.

use super::edge::Edge;
use super::node::Node;
use super::property::PropertyMap;
use super::types::{EdgeId, EdgeType, Label, NodeId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

/// Errors that can occur during graph operations
#[derive(Error, Debug, PartialEq)]
pub enum GraphError {
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Edge {0} not found")]
    EdgeNotFound(EdgeId),

    #[error("Invalid edge: source node {0} does not exist")]
    InvalidEdgeSource(NodeId),

    #[error("Invalid edge: target node {0} does not exist")]
    InvalidEdgeTarget(NodeId),

    #[error("Cannot delete {0}: it still has relationships, use DETACH DELETE")]
    NodeHasRelationships(NodeId),
}

pub type GraphResult<T> = Result<T, GraphError>;

/// In-memory graph storage
///
/// - nodes: NodeId -> Node
/// - edges: EdgeId -> Edge
/// - outgoing / incoming: adjacency lists
/// - label_index: Label -> NodeIds
#[derive(Debug, Default)]
pub struct GraphStore {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeId, Edge>,
    outgoing: HashMap<NodeId, Vec<EdgeId>>,
    incoming: HashMap<NodeId, Vec<EdgeId>>,
    label_index: HashMap<Label, BTreeSet<NodeId>>,
    next_node_id: u64,
    next_edge_id: u64,
}

impl GraphStore {
    /// Create a new empty graph store
    pub fn new() -> Self {
        Self {
            next_node_id: 1,
            next_edge_id: 1,
            ..Default::default()
        }
    }

    /// Create a node with a single label
    pub fn create_node(&mut self, label: impl Into<Label>) -> NodeId {
        self.create_node_with_properties(vec![label.into()], PropertyMap::new())
    }

    /// Create a node with labels and properties
    pub fn create_node_with_properties(
        &mut self,
        labels: Vec<Label>,
        properties: PropertyMap,
    ) -> NodeId {
        let id = NodeId::new(self.next_node_id);
        self.next_node_id += 1;

        let node = Node::new_with_properties(id, labels, properties);
        for label in &node.labels {
            self.label_index.entry(label.clone()).or_default().insert(id);
        }
        self.nodes.insert(id, node);
        id
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get_node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Create a directed edge with properties
    pub fn create_edge_with_properties(
        &mut self,
        source: NodeId,
        target: NodeId,
        edge_type: impl Into<EdgeType>,
        properties: PropertyMap,
    ) -> GraphResult<EdgeId> {
        if !self.nodes.contains_key(&source) {
            return Err(GraphError::InvalidEdgeSource(source));
        }
        if !self.nodes.contains_key(&target) {
            return Err(GraphError::InvalidEdgeTarget(target));
        }

        let id = EdgeId::new(self.next_edge_id);
        self.next_edge_id += 1;

        self.edges.insert(
            id,
            Edge::new_with_properties(id, source, target, edge_type, properties),
        );
        self.outgoing.entry(source).or_default().push(id);
        self.incoming.entry(target).or_default().push(id);
        Ok(id)
    }

    pub fn create_edge(
        &mut self,
        source: NodeId,
        target: NodeId,
        edge_type: impl Into<EdgeType>,
    ) -> GraphResult<EdgeId> {
        self.create_edge_with_properties(source, target, edge_type, PropertyMap::new())
    }

    pub fn get_edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    pub fn get_edge_mut(&mut self, id: EdgeId) -> Option<&mut Edge> {
        self.edges.get_mut(&id)
    }

    /// Delete an edge
    pub fn delete_edge(&mut self, id: EdgeId) -> GraphResult<Edge> {
        let edge = self.edges.remove(&id).ok_or(GraphError::EdgeNotFound(id))?;
        if let Some(list) = self.outgoing.get_mut(&edge.source) {
            list.retain(|e| *e != id);
        }
        if let Some(list) = self.incoming.get_mut(&edge.target) {
            list.retain(|e| *e != id);
        }
        Ok(edge)
    }

    /// Delete a node. With `detach`, its relationships are deleted first;
    /// without it, a node that still has relationships is an error.
    pub fn delete_node(&mut self, id: NodeId, detach: bool) -> GraphResult<Node> {
        if !self.nodes.contains_key(&id) {
            return Err(GraphError::NodeNotFound(id));
        }

        let attached: Vec<EdgeId> = self
            .outgoing
            .get(&id)
            .into_iter()
            .chain(self.incoming.get(&id))
            .flatten()
            .copied()
            .collect();

        if !attached.is_empty() && !detach {
            return Err(GraphError::NodeHasRelationships(id));
        }
        for edge_id in attached {
            // a self-loop appears in both lists
            if self.edges.contains_key(&edge_id) {
                self.delete_edge(edge_id)?;
            }
        }

        self.outgoing.remove(&id);
        self.incoming.remove(&id);
        let node = self.nodes.remove(&id).ok_or(GraphError::NodeNotFound(id))?;
        for label in &node.labels {
            if let Some(ids) = self.label_index.get_mut(label) {
                ids.remove(&id);
            }
        }
        Ok(node)
    }

    /// Outgoing edges of a node, in creation order
    pub fn get_outgoing_edges(&self, node_id: NodeId) -> Vec<&Edge> {
        self.outgoing
            .get(&node_id)
            .map(|ids| ids.iter().filter_map(|id| self.edges.get(id)).collect())
            .unwrap_or_default()
    }

    /// Incoming edges of a node, in creation order
    pub fn get_incoming_edges(&self, node_id: NodeId) -> Vec<&Edge> {
        self.incoming
            .get(&node_id)
            .map(|ids| ids.iter().filter_map(|id| self.edges.get(id)).collect())
            .unwrap_or_default()
    }

    /// Node ids carrying a label, in ascending id order
    pub fn node_ids_by_label(&self, label: &Label) -> Vec<NodeId> {
        self.label_index
            .get(label)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// All node ids, in ascending order
    pub fn all_node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn banking_graph() -> (GraphStore, NodeId, NodeId) {
        let mut store = GraphStore::new();
        let banking = store.create_node("Industry");
        let retail = store.create_node("Sector");
        store.create_edge(banking, retail, "HAS_SECTOR").unwrap();
        (store, banking, retail)
    }

    #[test]
    fn test_create_and_index() {
        let (store, banking, retail) = banking_graph();
        assert_eq!(store.node_count(), 2);
        assert_eq!(store.edge_count(), 1);
        assert_eq!(store.node_ids_by_label(&Label::new("Industry")), vec![banking]);
        assert_eq!(store.get_outgoing_edges(banking).len(), 1);
        assert_eq!(store.get_incoming_edges(retail).len(), 1);
    }

    #[test]
    fn test_edge_requires_existing_endpoints() {
        let mut store = GraphStore::new();
        let a = store.create_node("Industry");
        let missing = NodeId::new(99);
        assert_eq!(
            store.create_edge(a, missing, "HAS_SECTOR"),
            Err(GraphError::InvalidEdgeTarget(missing))
        );
    }

    #[test]
    fn test_delete_requires_detach() {
        let (mut store, banking, retail) = banking_graph();
        assert_eq!(
            store.delete_node(banking, false).unwrap_err(),
            GraphError::NodeHasRelationships(banking)
        );

        store.delete_node(banking, true).unwrap();
        assert_eq!(store.node_count(), 1);
        assert_eq!(store.edge_count(), 0);
        assert!(store.get_incoming_edges(retail).is_empty());
        assert!(store.node_ids_by_label(&Label::new("Industry")).is_empty());
    }
}
