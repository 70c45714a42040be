//! nlgraph
//!
//! Natural-language questions over a versioned property graph. A request
//! runs through two language-model calls (reasoning, synthesis) wrapped in
//! deterministic stages that validate, repair and explain the generated
//! graph query:
//!
//! ```text
//! text → reasoning → exploration → synthesis → validation ─┬→ execution → assembly
//!                                                           └→ fallback ─┘
//! ```
//!
//! Graph edits take a separate path: synthesis produces a
//! [`MutationPlan`](nlq::MutationPlan) that runs only after explicit
//! confirmation.
//!
//! ## Example
//!
//! ```rust
//! use nlgraph::gateway::{Dataset, EmbeddedGateway};
//! use nlgraph::graph::GraphStore;
//! use nlgraph::nlq::validator::validate_text;
//!
//! let mut store = GraphStore::new();
//! Dataset::sample().load_into(&mut store).unwrap();
//! let gateway = EmbeddedGateway::new(Vec::<String>::new()).with_graph("main", store);
//! assert_eq!(gateway.versions(), vec!["main"]);
//!
//! assert!(validate_text("MATCH (n:Industry) RETURN n LIMIT 50").valid);
//! assert!(!validate_text("MATCH (n:Industry)").valid);
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod gateway;
pub mod graph;
pub mod http;
pub mod nlq;
pub mod query;
pub mod schema;

// Re-export main types for convenience
pub use config::{AppConfig, ConfigError};
pub use gateway::{GatewayError, GraphGateway, StoreHandle};
pub use graph::{GraphError, GraphStore};
pub use nlq::{NLQPipeline, NLQRequest, NLQResponse, PipelineError};
pub use query::QueryEngine;
pub use schema::SchemaDescriptor;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}
