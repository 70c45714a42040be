//! Query processing module
//!
//! The embedded store speaks a pattern-query dialect covering what the
//! pipeline generates:
//! - MATCH with node/relationship patterns, path variables and WHERE
//! - RETURN with DISTINCT, aliases, count(), ORDER BY, SKIP and LIMIT
//! - CREATE, SET and [DETACH] DELETE for confirmed mutation plans

pub mod ast;
pub mod executor;
pub mod parser;

// Re-export main types
pub use ast::Query;
pub use executor::{
    ExecutionError, ExecutionResult, MutQueryExecutor, Params, QueryExecutor, Record,
    RecordBatch, UpdateStats, Value,
};
pub use parser::{parse_query, ParseError, ParseResult};

use crate::graph::GraphStore;

/// Query engine - parses and executes query text against a store
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryEngine;

impl QueryEngine {
    pub fn new() -> Self {
        Self
    }

    /// Parse a query and check if it requires mutation (CREATE, SET, DELETE)
    pub fn needs_mutation(&self, query_str: &str) -> ExecutionResult<bool> {
        Ok(!parse_query(query_str)?.is_read_only())
    }

    /// Parse and execute a read-only query
    pub fn execute(
        &self,
        query_str: &str,
        store: &GraphStore,
        params: &Params,
    ) -> ExecutionResult<RecordBatch> {
        let query = parse_query(query_str)?;
        QueryExecutor::new(store, params).execute(&query)
    }

    /// Parse and execute any query, applying its writes
    pub fn execute_mut(
        &self,
        query_str: &str,
        store: &mut GraphStore,
        params: &Params,
    ) -> ExecutionResult<RecordBatch> {
        let query = parse_query(query_str)?;
        MutQueryExecutor::new(store, params).execute(&query)
    }
}
