//! Pattern matching over the embedded graph
//!
//! Patterns are matched by depth-first expansion from the start node of
//! each path. A relationship is never bound twice within one path.

use super::eval::Evaluator;
use super::record::{Record, Value};
use super::{ExecutionError, ExecutionResult};
use crate::graph::{Edge, EdgeId, GraphStore, NodeId};
use crate::query::ast::{Direction, EdgePattern, MatchClause, NodePattern, PathPattern, Pattern};

pub struct PatternMatcher<'a> {
    store: &'a GraphStore,
    eval: &'a Evaluator<'a>,
}

impl<'a> PatternMatcher<'a> {
    pub fn new(store: &'a GraphStore, eval: &'a Evaluator<'a>) -> Self {
        Self { store, eval }
    }

    /// Apply MATCH clauses in order, starting from a single empty record
    pub fn match_clauses(&self, clauses: &[MatchClause]) -> ExecutionResult<Vec<Record>> {
        let mut records = vec![Record::new()];
        for clause in clauses {
            let mut next = Vec::new();
            for record in &records {
                for candidate in self.match_pattern(&clause.pattern, record)? {
                    let keep = match &clause.predicate {
                        Some(predicate) => self.eval.passes(predicate, &candidate)?,
                        None => true,
                    };
                    if keep {
                        next.push(candidate);
                    }
                }
            }
            records = next;
        }
        Ok(records)
    }

    /// Extend `record` with every binding of the comma-separated paths
    pub fn match_pattern(&self, pattern: &Pattern, record: &Record) -> ExecutionResult<Vec<Record>> {
        let mut records = vec![record.clone()];
        for path in &pattern.paths {
            let mut next = Vec::new();
            for current in &records {
                next.extend(self.match_path(path, current)?);
            }
            records = next;
        }
        Ok(records)
    }

    fn match_path(&self, path: &PathPattern, record: &Record) -> ExecutionResult<Vec<Record>> {
        let mut results = Vec::new();
        for start in self.start_candidates(&path.start, record)? {
            let mut bound = record.clone();
            if let Some(var) = &path.start.variable {
                bound.bind(var.clone(), Value::Node(start));
            }
            let mut walk = Walk {
                nodes: vec![start],
                edges: Vec::new(),
            };
            self.expand(path, 0, &mut walk, bound, &mut results)?;
        }
        Ok(results)
    }

    fn expand(
        &self,
        path: &PathPattern,
        depth: usize,
        walk: &mut Walk,
        record: Record,
        results: &mut Vec<Record>,
    ) -> ExecutionResult<()> {
        let Some(segment) = path.segments.get(depth) else {
            let mut record = record;
            if let Some(var) = &path.variable {
                record.bind(
                    var.clone(),
                    Value::Path {
                        nodes: walk.nodes.clone(),
                        edges: walk.edges.clone(),
                    },
                );
            }
            results.push(record);
            return Ok(());
        };

        let current = *walk.nodes.last().ok_or_else(|| {
            ExecutionError::Semantic("path expansion lost its current node".to_string())
        })?;

        for (edge, next) in self.adjacent(current, segment.edge.direction) {
            if walk.edges.contains(&edge.id) || !self.edge_matches(&segment.edge, edge, &record)? {
                continue;
            }
            if !self.node_matches(&segment.node, next, &record)? {
                continue;
            }

            let mut bound = record.clone();
            if let Some(var) = &segment.edge.variable {
                bound.bind(var.clone(), Value::Edge(edge.id));
            }
            if let Some(var) = &segment.node.variable {
                bound.bind(var.clone(), Value::Node(next));
            }

            walk.nodes.push(next);
            walk.edges.push(edge.id);
            self.expand(path, depth + 1, walk, bound, results)?;
            walk.nodes.pop();
            walk.edges.pop();
        }
        Ok(())
    }

    fn start_candidates(&self, pattern: &NodePattern, record: &Record) -> ExecutionResult<Vec<NodeId>> {
        if let Some(var) = &pattern.variable {
            if let Some(value) = record.get(var) {
                return match value {
                    Value::Node(id) if self.node_matches(pattern, *id, record)? => Ok(vec![*id]),
                    Value::Node(_) => Ok(Vec::new()),
                    other => Err(ExecutionError::TypeError(format!(
                        "variable `{}` is bound to {:?}, not a node",
                        var, other
                    ))),
                };
            }
        }

        let scan = match pattern.labels.first() {
            Some(label) => self.store.node_ids_by_label(label),
            None => self.store.all_node_ids(),
        };

        let mut candidates = Vec::new();
        for id in scan {
            if self.node_matches(pattern, id, record)? {
                candidates.push(id);
            }
        }
        Ok(candidates)
    }

    fn adjacent(&self, node: NodeId, direction: Direction) -> Vec<(&'a Edge, NodeId)> {
        let outgoing = || {
            self.store
                .get_outgoing_edges(node)
                .into_iter()
                .map(|e| (e, e.target))
        };
        let incoming = || {
            self.store
                .get_incoming_edges(node)
                .into_iter()
                .map(|e| (e, e.source))
        };

        match direction {
            Direction::Outgoing => outgoing().collect(),
            Direction::Incoming => incoming().collect(),
            Direction::Both => outgoing()
                .chain(incoming().filter(|(e, _)| e.source != e.target))
                .collect(),
        }
    }

    fn node_matches(&self, pattern: &NodePattern, id: NodeId, record: &Record) -> ExecutionResult<bool> {
        let Some(node) = self.store.get_node(id) else {
            return Ok(false);
        };
        if !pattern.labels.iter().all(|l| node.has_label(l)) {
            return Ok(false);
        }
        if let Some(var) = &pattern.variable {
            match record.get(var) {
                Some(Value::Node(bound)) if *bound != id => return Ok(false),
                Some(Value::Node(_)) | None => {}
                Some(_) => return Ok(false),
            }
        }
        for (key, expr) in &pattern.properties {
            let expected = self.eval.eval_property(expr, record)?;
            match node.get_property(key) {
                Some(actual) if actual.loose_eq(&expected) => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    fn edge_matches(&self, pattern: &EdgePattern, edge: &Edge, record: &Record) -> ExecutionResult<bool> {
        if !pattern.types.is_empty() && !pattern.types.contains(&edge.edge_type) {
            return Ok(false);
        }
        if let Some(var) = &pattern.variable {
            match record.get(var) {
                Some(Value::Edge(bound)) if *bound != edge.id => return Ok(false),
                Some(Value::Edge(_)) | None => {}
                Some(_) => return Ok(false),
            }
        }
        for (key, expr) in &pattern.properties {
            let expected = self.eval.eval_property(expr, record)?;
            match edge.properties.get(key) {
                Some(actual) if actual.loose_eq(&expected) => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }
}

struct Walk {
    nodes: Vec<NodeId>,
    edges: Vec<EdgeId>,
}
