//! Embedded property graph
//!
//! This module implements the property graph data model backing the
//! embedded store gateway:
//! - Nodes with ordered labels and properties
//! - Directed, typed edges with properties
//! - Ordered in-memory storage with a label index

pub mod edge;
pub mod node;
pub mod property;
pub mod store;
pub mod types;

// Re-export main types
pub use edge::Edge;
pub use node::Node;
pub use property::{PropertyMap, PropertyValue};
pub use store::{GraphError, GraphResult, GraphStore};
pub use types::{EdgeId, EdgeType, Label, NodeId};
