//! Request, response and intermediate types of the NLQ pipeline
//!
//! Everything crossing the HTTP boundary uses camelCase field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One refinement step, accumulated and replayed by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub user_request: String,
    #[serde(default)]
    pub cypher_query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// What the UI is currently showing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryContext {
    pub current_entity_type: Option<String>,
    pub selected_entity_ids: Vec<String>,
    pub graph_version: Option<String>,
}

/// Inbound read-path (and mutation propose) request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NLQRequest {
    pub query_text: String,
    #[serde(default)]
    pub context: Option<QueryContext>,
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
}

impl NLQRequest {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            ..Default::default()
        }
    }

    pub fn graph_version(&self) -> Option<&str> {
        self.context.as_ref()?.graph_version.as_deref()
    }

    pub fn current_entity_type(&self) -> Option<&str> {
        self.context.as_ref()?.current_entity_type.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clarification {
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorationQuery {
    pub query: String,
    #[serde(default)]
    pub purpose: String,
}

/// Output of the reasoning stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningTrace {
    pub interpretations: Vec<String>,
    pub chosen_interpretation: String,
    pub needs_clarification: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<Clarification>,
    pub exploration_queries: Vec<ExplorationQuery>,
    /// The model's answer was unusable and the trace was synthesized locally
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl ReasoningTrace {
    /// The trivial trace used when the model fails
    pub fn trivial(text: &str) -> Self {
        Self {
            interpretations: vec![text.to_string()],
            chosen_interpretation: text.to_string(),
            needs_clarification: false,
            clarification: None,
            exploration_queries: Vec::new(),
            degraded: true,
        }
    }
}

/// Digest of one exploration query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorationResult {
    pub query: String,
    pub purpose: String,
    pub summary: String,
}

/// One synthesized query; immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateQuery {
    text: String,
    explanation: String,
}

impl CandidateQuery {
    pub fn new(text: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            text: text.into().trim().to_string(),
            explanation: explanation.into(),
        }
    }

    /// Placeholder for an unusable model answer; never passes validation
    pub fn empty(explanation: impl Into<String>) -> Self {
        Self::new(String::new(), explanation)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn explanation(&self) -> &str {
        &self.explanation
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub group: String,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Deduplicated, renderable subgraph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphViewModel {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl GraphViewModel {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        };
        f.write_str(s)
    }
}

/// A graph-modifying query awaiting explicit confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationPlan {
    pub id: Uuid,
    pub query: String,
    pub explanation: String,
    pub risk_level: RiskLevel,
    pub affected_entity_types: Vec<String>,
    pub graph_version: String,
    pub proposed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub query: String,
    pub graph_data: GraphViewModel,
    pub summary: String,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningTrace>,
}

/// Every pipeline outcome shares this envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NLQResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_result: Option<QueryResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_clarification: Option<Clarification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_confirmation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutation_plan: Option<MutationPlan>,
}

impl NLQResponse {
    fn base(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
            query_result: None,
            needs_clarification: None,
            needs_confirmation: None,
            mutation_plan: None,
        }
    }

    pub fn answered(message: impl Into<String>, result: QueryResult) -> Self {
        Self {
            query_result: Some(result),
            ..Self::base(true, message)
        }
    }

    pub fn clarification(clarification: Clarification) -> Self {
        let message = clarification.question.clone();
        Self {
            needs_clarification: Some(clarification),
            ..Self::base(false, message)
        }
    }

    pub fn confirmation(plan: MutationPlan, message: impl Into<String>) -> Self {
        Self {
            needs_confirmation: Some(true),
            mutation_plan: Some(plan),
            ..Self::base(false, message)
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::base(false, message)
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::base(true, message)
    }
}

/// Body of the mutation execute / cancel endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationDecision {
    pub mutation_plan: MutationPlan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandRequest {
    pub element_id: String,
    #[serde(default)]
    pub graph_version: Option<String>,
}
