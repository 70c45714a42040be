//! Graph Store Gateway
//!
//! A [`GraphGateway`] resolves a named graph version to a [`StoreHandle`];
//! the handle executes query text (never rewritten) and offers a few narrow,
//! parameterised lookups. How versions are stored is the backend's concern:
//! the embedded backend keeps one in-memory graph per version, the remote
//! backend forwards the version name to a graph server.

pub mod embedded;
pub mod remote;
pub mod seed;

pub use embedded::EmbeddedGateway;
pub use remote::RemoteGateway;
pub use seed::{Dataset, SeedError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// The engine rejected the query text (syntax or schema problem)
    #[error("Query rejected: {0}")]
    Syntax(String),

    /// The query was well-formed but failed against the data
    #[error("Execution failed: {0}")]
    Execution(String),

    /// The store could not be reached or the session is unusable
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Unknown graph version: {0}")]
    UnknownVersion(String),
}

impl GatewayError {
    /// Errors after which the request cannot continue against the store
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::Connection(_) | GatewayError::UnknownVersion(_))
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Query parameters, JSON-typed so any backend can carry them
pub type QueryParams = BTreeMap<String, serde_json::Value>;

/// A node as returned by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNode {
    #[serde(rename = "id")]
    pub element_id: String,
    pub labels: Vec<String>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl RawNode {
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }
}

/// A relationship as returned by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRelationship {
    #[serde(rename = "id")]
    pub element_id: String,
    #[serde(rename = "source")]
    pub start: String,
    #[serde(rename = "target")]
    pub end: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPath {
    pub nodes: Vec<RawNode>,
    pub relationships: Vec<RawRelationship>,
}

/// One cell of a result row; also the wire format of the remote backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Node(RawNode),
    Relationship(RawRelationship),
    Path(RawPath),
    List(Vec<RawValue>),
    Scalar(serde_json::Value),
}

impl RawValue {
    /// Visit every node and relationship reachable from this cell
    pub fn visit<'a>(
        &'a self,
        on_node: &mut dyn FnMut(&'a RawNode),
        on_rel: &mut dyn FnMut(&'a RawRelationship),
    ) {
        match self {
            RawValue::Node(n) => on_node(n),
            RawValue::Relationship(r) => on_rel(r),
            RawValue::Path(p) => {
                p.nodes.iter().for_each(|n| on_node(n));
                p.relationships.iter().for_each(|r| on_rel(r));
            }
            RawValue::List(items) => {
                for item in items {
                    item.visit(on_node, on_rel);
                }
            }
            RawValue::Scalar(_) => {}
        }
    }
}

/// Write counters reported by a store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WriteSummary {
    pub nodes_created: usize,
    pub nodes_deleted: usize,
    pub relationships_created: usize,
    pub relationships_deleted: usize,
    pub properties_set: usize,
}

/// Tabular result of one query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub records: Vec<Vec<RawValue>>,
    #[serde(default)]
    pub stats: WriteSummary,
}

impl QueryRows {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every node cell in row order, duplicates included
    pub fn nodes(&self) -> Vec<&RawNode> {
        let mut nodes = Vec::new();
        for cell in self.records.iter().flatten() {
            cell.visit(&mut |n| nodes.push(n), &mut |_| {});
        }
        nodes
    }
}

/// How `find_by_property` compares the stored value with the term
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Case-sensitive equality
    Exact,
    /// Case-sensitive substring
    Contains,
    /// Case-insensitive substring
    CaseInsensitive,
}

/// Quote a label or property name for interpolation into query text
pub fn quote_identifier(name: &str) -> GatewayResult<String> {
    if name.is_empty() || name.contains('`') {
        return Err(GatewayError::Syntax(format!("invalid identifier `{}`", name)));
    }
    if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
    {
        Ok(name.to_string())
    } else {
        Ok(format!("`{}`", name))
    }
}

/// A session against one graph version.
///
/// Callers must `close()` the handle on every exit path; a closed handle
/// rejects further queries with [`GatewayError::Connection`].
#[async_trait]
pub trait StoreHandle: Send + Sync {
    /// Version name this handle is scoped to
    fn version(&self) -> &str;

    /// Execute a read query
    async fn execute(&self, query: &str, params: QueryParams) -> GatewayResult<QueryRows>;

    /// Execute a query that may modify the graph
    async fn execute_write(&self, query: &str) -> GatewayResult<QueryRows>;

    /// Release the session
    async fn close(&self);

    /// Nodes of `label` whose `property` matches `term`
    async fn find_by_property(
        &self,
        label: &str,
        property: &str,
        term: &str,
        mode: MatchMode,
        limit: usize,
    ) -> GatewayResult<Vec<RawNode>> {
        let label = quote_identifier(label)?;
        let property = quote_identifier(property)?;
        let predicate = match mode {
            MatchMode::Exact => format!("n.{} = $term", property),
            MatchMode::Contains => format!("n.{} CONTAINS $term", property),
            MatchMode::CaseInsensitive => {
                format!("toLower(n.{}) CONTAINS toLower($term)", property)
            }
        };
        let query = format!(
            "MATCH (n:{}) WHERE {} RETURN n LIMIT {}",
            label, predicate, limit
        );
        let mut params = QueryParams::new();
        params.insert("term".to_string(), serde_json::Value::from(term));
        let rows = self.execute(&query, params).await?;
        Ok(rows.nodes().into_iter().cloned().collect())
    }

    /// Up to `limit` arbitrary nodes of `label`
    async fn sample(&self, label: &str, limit: usize) -> GatewayResult<Vec<RawNode>> {
        let query = format!("MATCH (n:{}) RETURN n LIMIT {}", quote_identifier(label)?, limit);
        let rows = self.execute(&query, QueryParams::new()).await?;
        Ok(rows.nodes().into_iter().cloned().collect())
    }

    /// The element plus its direct neighbourhood
    async fn neighbors(&self, element_id: &str, limit: usize) -> GatewayResult<QueryRows> {
        let mut params = QueryParams::new();
        params.insert("id".to_string(), serde_json::Value::from(element_id));
        let query = format!(
            "MATCH (n)-[r]-(m) WHERE elementId(n) = $id RETURN n, r, m LIMIT {}",
            limit
        );
        let rows = self.execute(&query, params.clone()).await?;
        if !rows.is_empty() {
            return Ok(rows);
        }
        self.execute("MATCH (n) WHERE elementId(n) = $id RETURN n", params)
            .await
    }
}

/// Resolves named graph versions to store handles
#[async_trait]
pub trait GraphGateway: Send + Sync {
    async fn resolve_store_handle(&self, version: &str) -> GatewayResult<Box<dyn StoreHandle>>;

    /// Short backend description for status output
    fn describe(&self) -> String;
}
