//! CREATE / SET / DELETE application

use super::eval::Evaluator;
use super::record::{Record, UpdateStats, Value};
use super::{ExecutionError, ExecutionResult, Params};
use crate::graph::{EdgeId, GraphStore, NodeId, PropertyMap, PropertyValue};
use crate::query::ast::{Direction, NodePattern, Pattern, SetItem, UpdateClause};
use std::collections::BTreeSet;

/// Apply one write clause to every record, returning the rebound records
pub fn apply_update(
    store: &mut GraphStore,
    params: &Params,
    clause: &UpdateClause,
    records: Vec<Record>,
    stats: &mut UpdateStats,
) -> ExecutionResult<Vec<Record>> {
    match clause {
        UpdateClause::Create(pattern) => records
            .into_iter()
            .map(|record| create_pattern(store, params, pattern, record, stats))
            .collect(),
        UpdateClause::Set(items) => {
            for record in &records {
                set_properties(store, params, items, record, stats)?;
            }
            Ok(records)
        }
        UpdateClause::Delete { detach, variables } => {
            delete_bound(store, *detach, variables, &records, stats)?;
            Ok(records)
        }
    }
}

fn create_pattern(
    store: &mut GraphStore,
    params: &Params,
    pattern: &Pattern,
    mut record: Record,
    stats: &mut UpdateStats,
) -> ExecutionResult<Record> {
    for path in &pattern.paths {
        let mut previous = resolve_or_create(store, params, &path.start, &mut record, stats)?;

        for segment in &path.segments {
            let next = resolve_or_create(store, params, &segment.node, &mut record, stats)?;

            let edge_type = match segment.edge.types.as_slice() {
                [single] => single.clone(),
                _ => {
                    return Err(ExecutionError::Semantic(
                        "CREATE requires exactly one relationship type".to_string(),
                    ))
                }
            };
            let (source, target) = match segment.edge.direction {
                Direction::Outgoing => (previous, next),
                Direction::Incoming => (next, previous),
                Direction::Both => {
                    return Err(ExecutionError::Semantic(
                        "CREATE requires a directed relationship".to_string(),
                    ))
                }
            };

            let properties = {
                let eval = Evaluator::new(store, params);
                evaluate_map(&eval, &segment.edge.properties, &record)?
            };
            let edge_id = store.create_edge_with_properties(source, target, edge_type, properties)?;
            stats.relationships_created += 1;

            if let Some(var) = &segment.edge.variable {
                record.bind(var.clone(), Value::Edge(edge_id));
            }
            previous = next;
        }
    }
    Ok(record)
}

fn resolve_or_create(
    store: &mut GraphStore,
    params: &Params,
    pattern: &NodePattern,
    record: &mut Record,
    stats: &mut UpdateStats,
) -> ExecutionResult<NodeId> {
    if let Some(var) = &pattern.variable {
        match record.get(var) {
            Some(Value::Node(id)) => return Ok(*id),
            Some(other) => {
                return Err(ExecutionError::TypeError(format!(
                    "variable `{}` is bound to {:?}, not a node",
                    var, other
                )))
            }
            None => {}
        }
    }

    let properties = {
        let eval = Evaluator::new(store, params);
        evaluate_map(&eval, &pattern.properties, record)?
    };
    stats.properties_set += properties.len();
    let id = store.create_node_with_properties(pattern.labels.clone(), properties);
    stats.nodes_created += 1;

    if let Some(var) = &pattern.variable {
        record.bind(var.clone(), Value::Node(id));
    }
    Ok(id)
}

fn evaluate_map(
    eval: &Evaluator<'_>,
    entries: &[(String, crate::query::ast::Expression)],
    record: &Record,
) -> ExecutionResult<PropertyMap> {
    let mut map = PropertyMap::new();
    for (key, expr) in entries {
        let value = eval.eval_property(expr, record)?;
        if !value.is_null() {
            map.insert(key.clone(), value);
        }
    }
    Ok(map)
}

fn set_properties(
    store: &mut GraphStore,
    params: &Params,
    items: &[SetItem],
    record: &Record,
    stats: &mut UpdateStats,
) -> ExecutionResult<()> {
    for item in items {
        let value = {
            let eval = Evaluator::new(store, params);
            eval.eval_property(&item.value, record)?
        };
        let target = record
            .get(&item.variable)
            .ok_or_else(|| ExecutionError::VariableNotFound(item.variable.clone()))?;

        let properties = match target {
            Value::Node(id) => store.get_node_mut(*id).map(|n| &mut n.properties),
            Value::Edge(id) => store.get_edge_mut(*id).map(|e| &mut e.properties),
            Value::Property(PropertyValue::Null) => None,
            other => {
                return Err(ExecutionError::TypeError(format!(
                    "cannot SET a property on {:?}",
                    other
                )))
            }
        };

        // Setting null removes the property
        if let Some(properties) = properties {
            if value.is_null() {
                properties.remove(&item.property);
            } else {
                properties.insert(item.property.clone(), value);
            }
            stats.properties_set += 1;
        }
    }
    Ok(())
}

fn delete_bound(
    store: &mut GraphStore,
    detach: bool,
    variables: &[String],
    records: &[Record],
    stats: &mut UpdateStats,
) -> ExecutionResult<()> {
    let mut nodes = BTreeSet::new();
    let mut edges = BTreeSet::new();

    for record in records {
        for var in variables {
            match record.get(var) {
                Some(Value::Node(id)) => {
                    nodes.insert(*id);
                }
                Some(Value::Edge(id)) => {
                    edges.insert(*id);
                }
                Some(Value::Path { nodes: n, edges: e }) => {
                    nodes.extend(n.iter().copied());
                    edges.extend(e.iter().copied());
                }
                Some(Value::Property(PropertyValue::Null)) => {}
                Some(other) => {
                    return Err(ExecutionError::TypeError(format!(
                        "cannot DELETE {:?}",
                        other
                    )))
                }
                None => return Err(ExecutionError::VariableNotFound(var.clone())),
            }
        }
    }

    for id in edges {
        if store.get_edge(id).is_some() {
            store.delete_edge(id)?;
            stats.relationships_deleted += 1;
        }
    }

    for id in nodes {
        if store.get_node(id).is_none() {
            continue;
        }
        let attached: BTreeSet<EdgeId> = store
            .get_outgoing_edges(id)
            .into_iter()
            .chain(store.get_incoming_edges(id))
            .map(|e| e.id)
            .collect();
        store.delete_node(id, detach)?;
        stats.nodes_deleted += 1;
        stats.relationships_deleted += attached.len();
    }
    Ok(())
}
