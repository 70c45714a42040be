//! Natural Language Querying (NLQ)
//!
//! Turns free text into a validated graph query and a renderable subgraph:
//! reasoning → exploration → synthesis → validation (→ fallback) →
//! execution → assembly. Mutation requests stop after synthesis with a
//! [`types::MutationPlan`] that the caller must confirm or cancel.

pub mod assembler;
pub mod client;
pub mod exploration;
pub mod extract;
pub mod fallback;
pub mod mutation;
pub mod pipeline;
pub mod reasoning;
pub mod resolver;
pub mod synthesis;
pub mod types;
pub mod validator;

pub use client::{LanguageModel, NLQClient, ScriptedModel};
pub use pipeline::NLQPipeline;
pub use types::*;

use crate::gateway::GatewayError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NLQError {
    #[error("LLM API error: {0}")]
    ApiError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("LLM call timed out after {0} ms")]
    Timeout(u64),
}

pub type NLQResult<T> = Result<T, NLQError>;

/// Conditions that end a request without an answer
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The store is unreachable or the graph version does not exist
    #[error("Graph store failure: {0}")]
    Store(#[from] GatewayError),

    /// Even the deterministic fallback query could not be executed
    #[error("Fallback query failed: {0}")]
    FallbackFailed(GatewayError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
