//! Reasoning Stage
//!
//! First model call: interpret the request, optionally ask for
//! clarification, and propose exploration queries. Any failure (error,
//! timeout, unparseable output) degrades to a trivial trace. Domain terms
//! found in the text always get exploration queries, whatever the model
//! proposed.

use super::client::LanguageModel;
use super::extract::{candidate_terms, escape_literal, extract_json};
use super::types::{Clarification, ExplorationQuery, NLQRequest, ReasoningTrace};
use crate::gateway::quote_identifier;
use crate::schema::SchemaDescriptor;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Row cap on generated term-check queries
const TERM_CHECK_LIMIT: usize = 10;

pub struct ReasoningStage<'a> {
    model: &'a dyn LanguageModel,
    schema: &'a SchemaDescriptor,
    timeout: Duration,
    max_exploration_queries: usize,
}

impl<'a> ReasoningStage<'a> {
    pub fn new(
        model: &'a dyn LanguageModel,
        schema: &'a SchemaDescriptor,
        timeout: Duration,
        max_exploration_queries: usize,
    ) -> Self {
        Self {
            model,
            schema,
            timeout,
            max_exploration_queries,
        }
    }

    pub async fn reason(&self, request: &NLQRequest) -> ReasoningTrace {
        let text = request.query_text.trim();
        let prompt = self.build_prompt(request);

        let mut trace = match tokio::time::timeout(self.timeout, self.model.complete(&prompt)).await {
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "reasoning timed out, degrading");
                ReasoningTrace::trivial(text)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "reasoning call failed, degrading");
                ReasoningTrace::trivial(text)
            }
            Ok(Ok(completion)) => match parse_trace(&completion, text) {
                Some(trace) => trace,
                None => {
                    warn!("reasoning output unparseable, degrading");
                    ReasoningTrace::trivial(text)
                }
            },
        };

        self.add_term_checks(text, &mut trace);
        trace.exploration_queries.truncate(self.max_exploration_queries);

        info!(
            interpretations = trace.interpretations.len(),
            explorations = trace.exploration_queries.len(),
            clarification = trace.needs_clarification,
            degraded = trace.degraded,
            "reasoning complete"
        );
        trace
    }

    pub fn build_prompt(&self, request: &NLQRequest) -> String {
        let mut prompt = String::new();
        prompt.push_str("You interpret questions about a property graph.\n\n");
        prompt.push_str("Schema:\n");
        prompt.push_str(&self.schema.to_prompt());

        if let Some(context) = &request.context {
            prompt.push_str("\nUI context:\n");
            if let Some(entity_type) = &context.current_entity_type {
                prompt.push_str(&format!("- Currently displayed entity type: {}\n", entity_type));
            }
            if !context.selected_entity_ids.is_empty() {
                prompt.push_str(&format!(
                    "- Selected entity ids: {}\n",
                    context.selected_entity_ids.join(", ")
                ));
            }
        }

        if !request.conversation_history.is_empty() {
            prompt.push_str("\nConversation so far:\n");
            for (i, turn) in request.conversation_history.iter().enumerate() {
                prompt.push_str(&format!("Turn {}:\n  User: {}\n", i + 1, turn.user_request));
                if !turn.cypher_query.is_empty() {
                    prompt.push_str(&format!("  Query: {}\n", turn.cypher_query));
                }
                if let Some(feedback) = &turn.feedback {
                    prompt.push_str(&format!("  Feedback: {}\n", feedback));
                }
            }
        }

        prompt.push_str(&format!("\nUser request: \"{}\"\n\n", request.query_text.trim()));
        prompt.push_str(
            "List the plausible interpretations, choose one, and propose read-only \
             exploration queries (MATCH ... RETURN ... LIMIT 10) that check any names \
             in the request against the entity types they could belong to. If the \
             request cannot be answered without more information, ask a question.\n\
             Respond with JSON only:\n\
             {\"interpretations\": [string], \"chosenInterpretation\": string, \
             \"needsClarification\": bool, \"clarification\": {\"question\": string, \
             \"options\": [string]} | null, \"explorationQueries\": [{\"query\": string, \
             \"purpose\": string}]}\n",
        );
        prompt
    }

    /// Prepend one lookup per likely entity type for every domain term that
    /// no proposed query mentions yet.
    fn add_term_checks(&self, text: &str, trace: &mut ReasoningTrace) {
        let mut checks = Vec::new();
        for term in candidate_terms(text, self.schema) {
            let needle = term.to_lowercase();
            let covered = trace
                .exploration_queries
                .iter()
                .any(|q| q.query.to_lowercase().contains(&needle));
            if covered {
                continue;
            }
            for entity_type in self.schema.likely_types_for_term(&term) {
                let (Ok(label), Ok(property)) = (
                    quote_identifier(entity_type),
                    quote_identifier(self.schema.display_property(entity_type)),
                ) else {
                    continue;
                };
                checks.push(ExplorationQuery {
                    query: format!(
                        "MATCH (n:{}) WHERE toLower(n.{}) CONTAINS {} RETURN n LIMIT {}",
                        label,
                        property,
                        escape_literal(&needle),
                        TERM_CHECK_LIMIT
                    ),
                    purpose: format!("Check whether '{}' names a {}", term, entity_type),
                });
            }
        }
        if !checks.is_empty() {
            debug!(count = checks.len(), "added term-check explorations");
            checks.append(&mut trace.exploration_queries);
            trace.exploration_queries = checks;
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ReasoningPayload {
    interpretations: Vec<serde_json::Value>,
    #[serde(alias = "chosen_interpretation", alias = "chosen")]
    chosen_interpretation: Option<serde_json::Value>,
    #[serde(alias = "needs_clarification")]
    needs_clarification: bool,
    clarification: Option<ClarificationPayload>,
    #[serde(alias = "exploration_queries", alias = "explorations")]
    exploration_queries: Vec<serde_json::Value>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ClarificationPayload {
    question: String,
    options: Vec<String>,
}

/// Plain string, or the first string field of an object
fn as_text(value: &serde_json::Value, keys: &[&str]) -> Option<String> {
    let text = match value {
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        serde_json::Value::Object(map) => keys
            .iter()
            .find_map(|k| map.get(*k).and_then(|v| v.as_str()))
            .map(|s| s.trim().to_string()),
        _ => None,
    };
    text.filter(|s| !s.is_empty())
}

fn parse_trace(completion: &str, text: &str) -> Option<ReasoningTrace> {
    let value = extract_json(completion)?;
    let payload: ReasoningPayload = serde_json::from_value(value).ok()?;

    let mut interpretations: Vec<String> = payload
        .interpretations
        .iter()
        .filter_map(|v| as_text(v, &["interpretation", "description", "text"]))
        .collect();
    let chosen = payload
        .chosen_interpretation
        .as_ref()
        .and_then(|v| as_text(v, &["interpretation", "description", "text"]))
        .or_else(|| interpretations.first().cloned())
        .unwrap_or_else(|| text.to_string());
    if interpretations.is_empty() {
        interpretations.push(chosen.clone());
    }

    let clarification = payload
        .clarification
        .filter(|c| !c.question.trim().is_empty())
        .map(|c| Clarification {
            question: c.question.trim().to_string(),
            options: c.options,
        });
    let needs_clarification = payload.needs_clarification && clarification.is_some();

    let exploration_queries = payload
        .exploration_queries
        .iter()
        .filter_map(|v| {
            let query = as_text(v, &["query", "cypher"])?;
            let purpose = as_text(v, &["purpose", "reason"]).unwrap_or_default();
            Some(ExplorationQuery { query, purpose })
        })
        .collect();

    Some(ReasoningTrace {
        interpretations,
        chosen_interpretation: chosen,
        needs_clarification,
        clarification: if needs_clarification { clarification } else { None },
        exploration_queries,
        degraded: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlq::client::ScriptedModel;
    use crate::nlq::types::{ConversationTurn, QueryContext};

    fn stage<'a>(model: &'a ScriptedModel, schema: &'a SchemaDescriptor) -> ReasoningStage<'a> {
        ReasoningStage::new(model, schema, Duration::from_millis(500), 10)
    }

    #[tokio::test]
    async fn test_parses_structured_output() {
        let schema = SchemaDescriptor::default_registry();
        let model = ScriptedModel::new([r#"Sure:
```json
{"interpretations": ["All industries", {"description": "Industries with sectors"}],
 "chosenInterpretation": "All industries",
 "needsClarification": false,
 "explorationQueries": ["MATCH (n:Industry) RETURN n LIMIT 10"]}
```"#]);
        let trace = stage(&model, &schema)
            .reason(&NLQRequest::new("Show me all industries"))
            .await;

        assert!(!trace.degraded);
        assert_eq!(trace.interpretations, vec!["All industries", "Industries with sectors"]);
        assert_eq!(trace.chosen_interpretation, "All industries");
        assert_eq!(trace.exploration_queries.len(), 1);
        assert_eq!(trace.exploration_queries[0].purpose, "");
    }

    #[tokio::test]
    async fn test_degrades_on_garbage_error_and_timeout() {
        let schema = SchemaDescriptor::default_registry();

        let garbage = ScriptedModel::new(["I think you want industries."]);
        let trace = stage(&garbage, &schema).reason(&NLQRequest::new("industries")).await;
        assert!(trace.degraded);
        assert_eq!(trace.chosen_interpretation, "industries");
        assert!(trace.exploration_queries.is_empty());

        let exhausted = ScriptedModel::new(Vec::<String>::new());
        let trace = stage(&exhausted, &schema).reason(&NLQRequest::new("industries")).await;
        assert!(trace.degraded);

        let slow = ScriptedModel::new(["{}"]).with_delay(Duration::from_secs(5));
        let stage = ReasoningStage::new(&slow, &schema, Duration::from_millis(20), 10);
        let trace = stage.reason(&NLQRequest::new("industries")).await;
        assert!(trace.degraded);
        assert_eq!(trace.interpretations, vec!["industries"]);
    }

    #[tokio::test]
    async fn test_clarification_requires_a_question() {
        let schema = SchemaDescriptor::default_registry();
        let model = ScriptedModel::new([
            r#"{"needsClarification": true, "clarification": {"question": "Which retail?", "options": ["Retail Banking"]}}"#,
            r#"{"needsClarification": true}"#,
        ]);
        let stage = stage(&model, &schema);

        let asked = stage.reason(&NLQRequest::new("retail stuff")).await;
        assert!(asked.needs_clarification);
        assert_eq!(asked.clarification.unwrap().options, vec!["Retail Banking"]);

        let ignored = stage.reason(&NLQRequest::new("retail stuff")).await;
        assert!(!ignored.needs_clarification);
        assert!(ignored.clarification.is_none());
    }

    #[tokio::test]
    async fn test_terms_always_get_explored() {
        let schema = SchemaDescriptor::default_registry();
        let model = ScriptedModel::new(Vec::<String>::new());
        let trace = stage(&model, &schema)
            .reason(&NLQRequest::new("What projects are available for retail?"))
            .await;

        let queries: Vec<&str> = trace.exploration_queries.iter().map(|q| q.query.as_str()).collect();
        assert_eq!(
            queries,
            vec![
                "MATCH (n:Industry) WHERE toLower(n.name) CONTAINS 'retail' RETURN n LIMIT 10",
                "MATCH (n:Sector) WHERE toLower(n.name) CONTAINS 'retail' RETURN n LIMIT 10",
                "MATCH (n:Department) WHERE toLower(n.name) CONTAINS 'retail' RETURN n LIMIT 10",
            ]
        );
    }

    #[tokio::test]
    async fn test_covered_terms_are_not_duplicated() {
        let schema = SchemaDescriptor::default_registry();
        let model = ScriptedModel::new([
            r#"{"explorationQueries": [{"query": "MATCH (n:Sector) WHERE n.name CONTAINS 'Retail Banking' RETURN n", "purpose": "sector?"}]}"#,
        ]);
        let trace = stage(&model, &schema)
            .reason(&NLQRequest::new("Projects for Retail Banking"))
            .await;
        assert_eq!(trace.exploration_queries.len(), 1);
        assert_eq!(trace.exploration_queries[0].purpose, "sector?");
    }

    #[tokio::test]
    async fn test_prompt_contains_context_and_history() {
        let schema = SchemaDescriptor::default_registry();
        let model = ScriptedModel::new(["{}"]);
        let request = NLQRequest {
            query_text: "and their pain points?".to_string(),
            context: Some(QueryContext {
                current_entity_type: Some("Sector".to_string()),
                selected_entity_ids: vec!["n:4".to_string()],
                graph_version: None,
            }),
            conversation_history: vec![ConversationTurn {
                user_request: "show sectors".to_string(),
                cypher_query: "MATCH (n:Sector) RETURN n".to_string(),
                feedback: Some("only banking".to_string()),
            }],
        };
        stage(&model, &schema).reason(&request).await;

        let prompt = &model.prompts().await[0];
        assert!(prompt.contains("(:Industry)-[:HAS_SECTOR]->(:Sector)"));
        assert!(prompt.contains("Currently displayed entity type: Sector"));
        assert!(prompt.contains("Selected entity ids: n:4"));
        assert!(prompt.contains("Turn 1:\n  User: show sectors\n  Query: MATCH (n:Sector) RETURN n\n  Feedback: only banking"));
        assert!(prompt.contains("User request: \"and their pain points?\""));
    }
}
