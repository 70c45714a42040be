//! Records flowing through query execution

use crate::graph::{EdgeId, NodeId, PropertyValue};
use std::collections::HashMap;

/// Value types that can be bound to variables or returned in a row
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A node reference
    Node(NodeId),
    /// An edge reference
    Edge(EdgeId),
    /// A path: alternating nodes and edges, `nodes.len() == edges.len() + 1`
    Path { nodes: Vec<NodeId>, edges: Vec<EdgeId> },
    /// A property value (including lists and null)
    Property(PropertyValue),
}

impl Value {
    pub fn null() -> Self {
        Value::Property(PropertyValue::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Property(PropertyValue::Null))
    }

    /// Truthiness in a WHERE clause: only boolean true passes
    pub fn is_true(&self) -> bool {
        matches!(self, Value::Property(PropertyValue::Boolean(true)))
    }

    /// Stable textual key, used for DISTINCT
    pub fn distinct_key(&self) -> String {
        match self {
            Value::Node(id) => id.element_id(),
            Value::Edge(id) => id.element_id(),
            Value::Path { nodes, edges } => {
                let nodes: Vec<String> = nodes.iter().map(|n| n.element_id()).collect();
                let edges: Vec<String> = edges.iter().map(|e| e.element_id()).collect();
                format!("path[{}|{}]", nodes.join(","), edges.join(","))
            }
            Value::Property(p) => p.to_json().to_string(),
        }
    }
}

impl From<PropertyValue> for Value {
    fn from(value: PropertyValue) -> Self {
        Value::Property(value)
    }
}

/// A single record: variable bindings
#[derive(Debug, Clone, Default)]
pub struct Record {
    bindings: HashMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a variable to a value
    pub fn bind(&mut self, variable: impl Into<String>, value: Value) {
        self.bindings.insert(variable.into(), value);
    }

    /// Get a bound value
    pub fn get(&self, variable: &str) -> Option<&Value> {
        self.bindings.get(variable)
    }

    pub fn is_bound(&self, variable: &str) -> bool {
        self.bindings.contains_key(variable)
    }
}

/// Counters reported for write queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateStats {
    pub nodes_created: usize,
    pub nodes_deleted: usize,
    pub relationships_created: usize,
    pub relationships_deleted: usize,
    pub properties_set: usize,
}

impl UpdateStats {
    pub fn is_empty(&self) -> bool {
        *self == UpdateStats::default()
    }
}

/// Result of executing a query
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    /// Column names
    pub columns: Vec<String>,
    /// Rows, one value per column
    pub records: Vec<Vec<Value>>,
    /// Write counters (all zero for reads)
    pub stats: UpdateStats,
}

impl RecordBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
