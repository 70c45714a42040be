//! Exploration Execution
//!
//! Runs the reasoning stage's exploration queries one by one and reduces
//! each result to a short digest for the synthesis prompt. Nothing here
//! fails the request: a rejected, failing or slow query becomes a note.

use super::types::{ExplorationQuery, ExplorationResult};
use super::validator::{is_read_only, validate_text};
use crate::gateway::{QueryParams, QueryRows, RawValue, StoreHandle};
use crate::schema::SchemaDescriptor;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

pub struct ExplorationRunner<'a> {
    schema: &'a SchemaDescriptor,
    timeout: Duration,
    label_limit: usize,
}

impl<'a> ExplorationRunner<'a> {
    pub fn new(schema: &'a SchemaDescriptor, timeout: Duration, label_limit: usize) -> Self {
        Self {
            schema,
            timeout,
            label_limit,
        }
    }

    /// Execute sequentially, in proposal order
    pub async fn run(
        &self,
        handle: &dyn StoreHandle,
        queries: &[ExplorationQuery],
    ) -> Vec<ExplorationResult> {
        let mut results = Vec::with_capacity(queries.len());
        for exploration in queries {
            let summary = self.explore(handle, &exploration.query).await;
            debug!(query = %exploration.query, summary = %summary, "exploration");
            results.push(ExplorationResult {
                query: exploration.query.clone(),
                purpose: exploration.purpose.clone(),
                summary,
            });
        }
        results
    }

    async fn explore(&self, handle: &dyn StoreHandle, query: &str) -> String {
        if !is_read_only(query) {
            warn!(query, "exploration query writes to the graph, skipped");
            return "Skipped: exploration queries must be read-only".to_string();
        }
        let validation = validate_text(query);
        if !validation.valid {
            return format!("Skipped: {}", validation.errors.join("; "));
        }

        match tokio::time::timeout(self.timeout, handle.execute(query, QueryParams::new())).await {
            Ok(Ok(rows)) => summarize(&rows, self.schema, self.label_limit),
            Ok(Err(e)) => {
                warn!(query, error = %e, "exploration query failed");
                format!("Failed: {}", e)
            }
            Err(_) => {
                warn!(query, "exploration query timed out");
                format!("Failed: timed out after {} ms", self.timeout.as_millis())
            }
        }
    }
}

/// Row count plus at most `label_limit` entity captions
pub fn summarize(rows: &QueryRows, schema: &SchemaDescriptor, label_limit: usize) -> String {
    if rows.is_empty() {
        return "No results".to_string();
    }

    let mut seen = HashSet::new();
    let mut captions = Vec::new();
    for node in rows.nodes() {
        if !seen.insert(node.element_id.as_str()) {
            continue;
        }
        let label = node.labels.first().map(String::as_str).unwrap_or("Unknown");
        let name = node
            .property_str(schema.display_property(label))
            .unwrap_or(&node.element_id);
        captions.push(format!("{} ({})", name, label));
    }

    let count = rows.len();
    let noun = if count == 1 { "row" } else { "rows" };

    if captions.is_empty() {
        let values: Vec<String> = rows
            .records
            .iter()
            .take(label_limit)
            .map(|record| {
                rows.columns
                    .iter()
                    .zip(record)
                    .map(|(column, value)| format!("{}={}", column, render_scalar(value)))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .collect();
        return format!("{} {}: {}", count, noun, values.join("; "));
    }

    let extra = captions.len().saturating_sub(label_limit);
    captions.truncate(label_limit);
    let mut summary = format!("{} {}; entities: {}", count, noun, captions.join(", "));
    if extra > 0 {
        summary.push_str(&format!(" (+{} more)", extra));
    }
    summary
}

fn render_scalar(value: &RawValue) -> String {
    match value {
        RawValue::Scalar(serde_json::Value::String(s)) => s.clone(),
        RawValue::Scalar(other) => other.to_string(),
        RawValue::Node(n) => n.element_id.clone(),
        RawValue::Relationship(r) => r.rel_type.clone(),
        RawValue::Path(p) => format!("path of {}", p.relationships.len()),
        RawValue::List(items) => format!(
            "[{}]",
            items.iter().map(render_scalar).collect::<Vec<_>>().join(", ")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Dataset, EmbeddedGateway, GraphGateway};
    use crate::graph::GraphStore;

    async fn handle() -> Box<dyn StoreHandle> {
        let mut store = GraphStore::new();
        Dataset::sample().load_into(&mut store).unwrap();
        let gateway = EmbeddedGateway::new(Vec::<String>::new()).with_graph("main", store);
        gateway.resolve_store_handle("main").await.unwrap()
    }

    fn exploration(query: &str) -> ExplorationQuery {
        ExplorationQuery {
            query: query.to_string(),
            purpose: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_summaries() {
        let schema = SchemaDescriptor::default_registry();
        let runner = ExplorationRunner::new(&schema, Duration::from_secs(2), 2);
        let handle = handle().await;

        let results = runner
            .run(
                handle.as_ref(),
                &[
                    exploration("MATCH (n:Industry) WHERE toLower(n.name) CONTAINS 'retail' RETURN n LIMIT 10"),
                    exploration("MATCH (n:Sector) WHERE toLower(n.name) CONTAINS 'retail' RETURN n LIMIT 10"),
                    exploration("MATCH (n:Industry) RETURN n"),
                    exploration("MATCH (n:Sector) RETURN count(n) AS sectors"),
                ],
            )
            .await;

        assert_eq!(results[0].summary, "No results");
        assert_eq!(results[1].summary, "1 row; entities: Retail Banking (Sector)");
        assert_eq!(
            results[2].summary,
            "3 rows; entities: Banking (Industry), Insurance (Industry) (+1 more)"
        );
        assert_eq!(results[3].summary, "1 row: sectors=4");
        handle.close().await;
    }

    #[tokio::test]
    async fn test_failures_become_notes() {
        let schema = SchemaDescriptor::default_registry();
        let runner = ExplorationRunner::new(&schema, Duration::from_secs(2), 10);
        let handle = handle().await;

        let results = runner
            .run(
                handle.as_ref(),
                &[
                    exploration("MATCH (n:Role) DETACH DELETE n"),
                    exploration("MATCH (n WHERE RETURN n"),
                    exploration("RETURN 1"),
                    exploration("MATCH (n:Role) RETURN n"),
                ],
            )
            .await;

        assert_eq!(results.len(), 4);
        assert!(results[0].summary.starts_with("Skipped"));
        assert!(results[1].summary.starts_with("Failed"));
        assert!(results[2].summary.starts_with("Skipped"));
        assert!(results[3].summary.starts_with("3 rows"));

        let rows = handle
            .execute("MATCH (n:Role) RETURN n", QueryParams::new())
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        handle.close().await;
    }
}
