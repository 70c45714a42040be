//! Embedded backend: one in-memory graph per version name

use super::{
    GatewayError, GatewayResult, GraphGateway, QueryParams, QueryRows, RawNode, RawPath,
    RawRelationship, RawValue, StoreHandle, WriteSummary,
};
use crate::graph::{EdgeId, GraphStore, NodeId, PropertyMap, PropertyValue};
use crate::query::{ExecutionError, Params, QueryEngine, RecordBatch, UpdateStats, Value};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Gateway over in-process graphs.
///
/// The set of versions is fixed at construction; resolving any other name
/// fails with [`GatewayError::UnknownVersion`].
#[derive(Default)]
pub struct EmbeddedGateway {
    graphs: BTreeMap<String, Arc<RwLock<GraphStore>>>,
}

impl EmbeddedGateway {
    /// Create empty graphs for the given version names
    pub fn new<I, S>(versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let graphs = versions
            .into_iter()
            .map(|v| (v.into(), Arc::new(RwLock::new(GraphStore::new()))))
            .collect();
        Self { graphs }
    }

    /// Add (or replace) a version backed by an existing store
    pub fn with_graph(mut self, version: impl Into<String>, store: GraphStore) -> Self {
        self.graphs.insert(version.into(), Arc::new(RwLock::new(store)));
        self
    }

    pub fn versions(&self) -> Vec<String> {
        self.graphs.keys().cloned().collect()
    }

    /// Shared graph for a version, for seeding and inspection
    pub fn graph(&self, version: &str) -> Option<Arc<RwLock<GraphStore>>> {
        self.graphs.get(version).cloned()
    }
}

#[async_trait]
impl GraphGateway for EmbeddedGateway {
    async fn resolve_store_handle(&self, version: &str) -> GatewayResult<Box<dyn StoreHandle>> {
        let graph = self
            .graphs
            .get(version)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownVersion(version.to_string()))?;
        Ok(Box::new(EmbeddedHandle {
            version: version.to_string(),
            graph,
            engine: QueryEngine::new(),
            closed: AtomicBool::new(false),
        }))
    }

    fn describe(&self) -> String {
        format!("embedded ({} versions)", self.graphs.len())
    }
}

pub struct EmbeddedHandle {
    version: String,
    graph: Arc<RwLock<GraphStore>>,
    engine: QueryEngine,
    closed: AtomicBool,
}

impl EmbeddedHandle {
    fn ensure_open(&self) -> GatewayResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(GatewayError::Connection(format!(
                "session on `{}` is closed",
                self.version
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StoreHandle for EmbeddedHandle {
    fn version(&self) -> &str {
        &self.version
    }

    async fn execute(&self, query: &str, params: QueryParams) -> GatewayResult<QueryRows> {
        self.ensure_open()?;
        let params = to_params(&params);
        let store = self.graph.read().await;
        let batch = self
            .engine
            .execute(query, &store, &params)
            .map_err(map_error)?;
        debug!(version = %self.version, rows = batch.len(), "embedded read");
        Ok(to_rows(&store, batch))
    }

    async fn execute_write(&self, query: &str) -> GatewayResult<QueryRows> {
        self.ensure_open()?;
        let mut store = self.graph.write().await;
        let batch = self
            .engine
            .execute_mut(query, &mut store, &Params::new())
            .map_err(map_error)?;
        debug!(version = %self.version, stats = ?batch.stats, "embedded write");
        Ok(to_rows(&store, batch))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

fn to_params(params: &QueryParams) -> Params {
    params
        .iter()
        .map(|(k, v)| (k.clone(), PropertyValue::from_json(v)))
        .collect()
}

fn map_error(err: ExecutionError) -> GatewayError {
    match err {
        ExecutionError::Graph(e) => GatewayError::Execution(e.to_string()),
        other => GatewayError::Syntax(other.to_string()),
    }
}

fn to_rows(store: &GraphStore, batch: RecordBatch) -> QueryRows {
    let records = batch
        .records
        .iter()
        .map(|row| row.iter().map(|value| to_raw(store, value)).collect())
        .collect();
    QueryRows {
        columns: batch.columns,
        records,
        stats: to_summary(batch.stats),
    }
}

fn to_summary(stats: UpdateStats) -> WriteSummary {
    WriteSummary {
        nodes_created: stats.nodes_created,
        nodes_deleted: stats.nodes_deleted,
        relationships_created: stats.relationships_created,
        relationships_deleted: stats.relationships_deleted,
        properties_set: stats.properties_set,
    }
}

fn to_json_map(properties: &PropertyMap) -> serde_json::Map<String, serde_json::Value> {
    properties
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect()
}

fn raw_node(store: &GraphStore, id: NodeId) -> Option<RawNode> {
    store.get_node(id).map(|node| RawNode {
        element_id: id.element_id(),
        labels: node.labels.iter().map(|l| l.as_str().to_string()).collect(),
        properties: to_json_map(&node.properties),
    })
}

fn raw_relationship(store: &GraphStore, id: EdgeId) -> Option<RawRelationship> {
    store.get_edge(id).map(|edge| RawRelationship {
        element_id: id.element_id(),
        start: edge.source.element_id(),
        end: edge.target.element_id(),
        rel_type: edge.edge_type.as_str().to_string(),
        properties: to_json_map(&edge.properties),
    })
}

// Elements deleted by the same query come back as null
fn to_raw(store: &GraphStore, value: &Value) -> RawValue {
    match value {
        Value::Node(id) => raw_node(store, *id)
            .map(RawValue::Node)
            .unwrap_or(RawValue::Scalar(serde_json::Value::Null)),
        Value::Edge(id) => raw_relationship(store, *id)
            .map(RawValue::Relationship)
            .unwrap_or(RawValue::Scalar(serde_json::Value::Null)),
        Value::Path { nodes, edges } => RawValue::Path(RawPath {
            nodes: nodes.iter().filter_map(|id| raw_node(store, *id)).collect(),
            relationships: edges
                .iter()
                .filter_map(|id| raw_relationship(store, *id))
                .collect(),
        }),
        Value::Property(p) => RawValue::Scalar(p.to_json()),
    }
}
