//! Query execution for the embedded store
//!
//! Execution is record-at-a-time: MATCH clauses produce binding records,
//! write clauses mutate the store per record, and the RETURN clause
//! projects, de-duplicates, orders and pages the surviving records.

pub mod eval;
pub mod matcher;
pub mod record;
pub mod update;

pub use eval::Evaluator;
pub use matcher::PatternMatcher;
pub use record::{Record, RecordBatch, UpdateStats, Value};

use crate::graph::{GraphError, GraphStore, PropertyValue};
use crate::query::ast::{Expression, Query, ReturnClause};
use crate::query::parser::ParseError;
use eval::compare_values;
use indexmap::IndexMap;
use std::cmp::Ordering;
use rustc_hash::FxHashSet;
use std::collections::HashMap;
use thiserror::Error;

/// Named query parameters (`$name`)
pub type Params = HashMap<String, PropertyValue>;

/// Execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Graph store error
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Write clauses are not allowed on a read-only execution")]
    ReadOnly,

    /// Type error
    #[error("Type error: {0}")]
    TypeError(String),

    /// Variable not found
    #[error("Variable not found: {0}")]
    VariableNotFound(String),

    #[error("Missing parameter: ${0}")]
    ParameterMissing(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Semantic error: {0}")]
    Semantic(String),
}

impl ExecutionError {
    /// Errors caused by the query text itself rather than the data
    pub fn is_syntax(&self) -> bool {
        matches!(
            self,
            ExecutionError::Parse(_)
                | ExecutionError::VariableNotFound(_)
                | ExecutionError::UnknownFunction(_)
                | ExecutionError::Semantic(_)
        )
    }
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Query executor for read-only queries
pub struct QueryExecutor<'a> {
    store: &'a GraphStore,
    params: &'a Params,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(store: &'a GraphStore, params: &'a Params) -> Self {
        Self { store, params }
    }

    /// Execute a read-only query and return results
    pub fn execute(&self, query: &Query) -> ExecutionResult<RecordBatch> {
        if !query.is_read_only() {
            return Err(ExecutionError::ReadOnly);
        }

        let eval = Evaluator::new(self.store, self.params);
        let records = PatternMatcher::new(self.store, &eval).match_clauses(&query.match_clauses)?;
        project(&eval, records, query.return_clause.as_ref(), UpdateStats::default())
    }
}

/// Query executor for write queries (CREATE, SET, DELETE)
pub struct MutQueryExecutor<'a> {
    store: &'a mut GraphStore,
    params: &'a Params,
}

impl<'a> MutQueryExecutor<'a> {
    pub fn new(store: &'a mut GraphStore, params: &'a Params) -> Self {
        Self { store, params }
    }

    /// Execute a query (read or write); writes are applied in clause order
    pub fn execute(&mut self, query: &Query) -> ExecutionResult<RecordBatch> {
        let mut records = {
            let eval = Evaluator::new(self.store, self.params);
            PatternMatcher::new(self.store, &eval).match_clauses(&query.match_clauses)?
        };

        let mut stats = UpdateStats::default();
        for clause in &query.update_clauses {
            records = update::apply_update(self.store, self.params, clause, records, &mut stats)?;
        }

        let eval = Evaluator::new(self.store, self.params);
        project(&eval, records, query.return_clause.as_ref(), stats)
    }
}

struct Row {
    values: Vec<Value>,
    source: Option<Record>,
}

fn is_aggregate(expr: &Expression) -> bool {
    matches!(expr, Expression::Function { name, .. } if name.eq_ignore_ascii_case("count"))
}

fn row_key(values: &[Value]) -> String {
    values
        .iter()
        .map(Value::distinct_key)
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

fn project(
    eval: &Evaluator<'_>,
    records: Vec<Record>,
    clause: Option<&ReturnClause>,
    stats: UpdateStats,
) -> ExecutionResult<RecordBatch> {
    let Some(clause) = clause else {
        return Ok(RecordBatch {
            columns: Vec::new(),
            records: Vec::new(),
            stats,
        });
    };

    let columns: Vec<String> = clause
        .items
        .iter()
        .map(|item| item.column_name().to_string())
        .collect();

    let mut rows = if clause.items.iter().any(|item| is_aggregate(&item.expression)) {
        aggregate_rows(eval, records, clause)?
    } else {
        records
            .into_iter()
            .map(|record| {
                let values = clause
                    .items
                    .iter()
                    .map(|item| eval.eval(&item.expression, &record))
                    .collect::<ExecutionResult<Vec<_>>>()?;
                Ok(Row {
                    values,
                    source: Some(record),
                })
            })
            .collect::<ExecutionResult<Vec<_>>>()?
    };

    if clause.distinct {
        let mut seen = FxHashSet::default();
        rows.retain(|row| seen.insert(row_key(&row.values)));
    }

    if !clause.order_by.is_empty() {
        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            let keys = clause
                .order_by
                .iter()
                .map(|order| sort_key(eval, clause, &order.expression, &row))
                .collect::<ExecutionResult<Vec<_>>>()?;
            keyed.push((keys, row));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for ((left, right), order) in a.iter().zip(b.iter()).zip(&clause.order_by) {
                let ord = order_values(left, right);
                let ord = if order.ascending { ord } else { ord.reverse() };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        rows = keyed.into_iter().map(|(_, row)| row).collect();
    }

    let skip = clause.skip.unwrap_or(0);
    let limit = clause.limit.unwrap_or(usize::MAX);
    let records = rows
        .into_iter()
        .skip(skip)
        .take(limit)
        .map(|row| row.values)
        .collect();

    Ok(RecordBatch {
        columns,
        records,
        stats,
    })
}

/// Group by the non-aggregate items and count non-null arguments per group
fn aggregate_rows(
    eval: &Evaluator<'_>,
    records: Vec<Record>,
    clause: &ReturnClause,
) -> ExecutionResult<Vec<Row>> {
    let mut groups: IndexMap<String, (Vec<Value>, Vec<Record>)> = IndexMap::new();
    for record in records {
        let mut keys = Vec::new();
        for item in clause.items.iter().filter(|i| !is_aggregate(&i.expression)) {
            keys.push(eval.eval(&item.expression, &record)?);
        }
        groups
            .entry(row_key(&keys))
            .or_insert_with(|| (keys, Vec::new()))
            .1
            .push(record);
    }

    let grouped = clause.items.iter().any(|i| !is_aggregate(&i.expression));
    if groups.is_empty() && !grouped {
        groups.insert(String::new(), (Vec::new(), Vec::new()));
    }

    let mut rows = Vec::with_capacity(groups.len());
    for (_, (keys, members)) in groups {
        let mut keys = keys.into_iter();
        let mut values = Vec::with_capacity(clause.items.len());
        for item in &clause.items {
            match &item.expression {
                Expression::Function { args, .. } if is_aggregate(&item.expression) => {
                    let mut count = 0i64;
                    for member in &members {
                        let counted = match args.first() {
                            Some(arg) => !eval.eval(arg, member)?.is_null(),
                            None => true,
                        };
                        if counted {
                            count += 1;
                        }
                    }
                    values.push(Value::Property(PropertyValue::Integer(count)));
                }
                _ => values.push(keys.next().unwrap_or_else(Value::null)),
            }
        }
        rows.push(Row {
            values,
            source: None,
        });
    }
    Ok(rows)
}

/// ORDER BY may name a returned column (by alias or expression) or any
/// expression over the underlying record
fn sort_key(
    eval: &Evaluator<'_>,
    clause: &ReturnClause,
    expr: &Expression,
    row: &Row,
) -> ExecutionResult<Value> {
    if let Expression::Variable(name) = expr {
        if let Some(idx) = clause.items.iter().position(|i| i.alias.as_deref() == Some(name)) {
            return Ok(row.values[idx].clone());
        }
    }
    if let Some(idx) = clause.items.iter().position(|i| &i.expression == expr) {
        return Ok(row.values[idx].clone());
    }
    match &row.source {
        Some(record) => eval.eval(expr, record),
        None => Err(ExecutionError::Semantic(
            "ORDER BY after aggregation must refer to a returned column".to_string(),
        )),
    }
}

/// Nulls sort after every other value
fn order_values(left: &Value, right: &Value) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => compare_values(left, right).unwrap_or(Ordering::Equal),
    }
}
