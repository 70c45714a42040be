//! Result Assembler
//!
//! Converts raw rows into a renderable subgraph, writes the one-line
//! summary, and diagnoses empty results.

use super::extract::candidate_terms;
use super::resolver::{EntityResolver, MatchTier};
use super::types::{GraphEdge, GraphNode, GraphViewModel};
use crate::gateway::{QueryRows, RawNode, RawRelationship, StoreHandle};
use crate::schema::SchemaDescriptor;
use indexmap::IndexMap;
use tracing::{debug, warn};

/// How many entity types a summary names
const SUMMARY_TYPE_LIMIT: usize = 3;

/// Deduplicate every node and relationship in `rows` by element id,
/// keeping first-seen order.
pub fn assemble(rows: &QueryRows, schema: &SchemaDescriptor) -> GraphViewModel {
    let mut nodes: IndexMap<&str, &RawNode> = IndexMap::new();
    let mut edges: IndexMap<&str, &RawRelationship> = IndexMap::new();

    for cell in rows.records.iter().flatten() {
        cell.visit(
            &mut |n| {
                nodes.entry(n.element_id.as_str()).or_insert(n);
            },
            &mut |r| {
                edges.entry(r.element_id.as_str()).or_insert(r);
            },
        );
    }

    GraphViewModel {
        nodes: nodes.values().map(|n| graph_node(n, schema)).collect(),
        edges: edges
            .values()
            .map(|r| GraphEdge {
                id: r.element_id.clone(),
                from: r.start.clone(),
                to: r.end.clone(),
                edge_type: r.rel_type.clone(),
                properties: r.properties.clone(),
            })
            .collect(),
    }
}

fn graph_node(node: &RawNode, schema: &SchemaDescriptor) -> GraphNode {
    let group = node
        .labels
        .first()
        .cloned()
        .unwrap_or_else(|| "Unknown".to_string());
    let label = node
        .property_str(schema.display_property(&group))
        .map(str::to_string)
        .unwrap_or_else(|| group.clone());
    GraphNode {
        id: node.element_id.clone(),
        label,
        group,
        properties: node.properties.clone(),
    }
}

/// "Found 3 entities (Industry, Sector)" plus the relationship count.
///
/// `row_count` covers results that hold only scalars, such as counts.
pub fn summarize(view: &GraphViewModel, row_count: usize) -> String {
    if view.is_empty() {
        return match row_count {
            0 => "No matching entities found.".to_string(),
            1 => "Returned 1 row.".to_string(),
            n => format!("Returned {} rows.", n),
        };
    }

    let mut types: Vec<&str> = Vec::new();
    for node in &view.nodes {
        if !types.contains(&node.group.as_str()) {
            types.push(&node.group);
        }
    }
    types.truncate(SUMMARY_TYPE_LIMIT);

    let count = view.nodes.len();
    let mut summary = format!(
        "Found {} {} ({})",
        count,
        if count == 1 { "entity" } else { "entities" },
        types.join(", ")
    );
    match view.edges.len() {
        0 => {}
        1 => summary.push_str(" and 1 relationship"),
        n => summary.push_str(&format!(" and {} relationships", n)),
    }
    summary.push('.');
    summary
}

/// Near matches for the terms of a request that returned nothing.
///
/// Returns the "did you mean" clause, or `None` when no term has a partial
/// or fuzzy match. Lookup failures are logged and skipped.
pub async fn diagnose(
    text: &str,
    schema: &SchemaDescriptor,
    handle: &dyn StoreHandle,
) -> Option<String> {
    let resolver = EntityResolver::new(schema, handle);
    let mut suggestions: Vec<String> = Vec::new();

    for term in candidate_terms(text, schema) {
        let types = schema.likely_types_for_term(&term);
        let resolution = match resolver.resolve(&term, &types).await {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!(term = %term, error = %e, "diagnosis lookup failed");
                continue;
            }
        };
        if matches!(resolution.tier, MatchTier::Partial | MatchTier::Fuzzy) {
            for suggestion in resolution.describe_suggestions() {
                if !suggestions.contains(&suggestion) {
                    suggestions.push(suggestion);
                }
            }
        }
    }

    debug!(suggestions = suggestions.len(), "empty result diagnosed");
    if suggestions.is_empty() {
        None
    } else {
        Some(format!("Did you mean: {}?", suggestions.join(", ")))
    }
}
