//! Query Synthesizer
//!
//! Second model call: turn the chosen interpretation and exploration
//! digests into exactly one candidate query. An unusable answer yields an
//! empty candidate, which the validator rejects, so the caller falls back.

use super::client::LanguageModel;
use super::extract::{extract_cypher, extract_json};
use super::types::{CandidateQuery, ConversationTurn, ExplorationResult, NLQRequest, ReasoningTrace};
use crate::schema::SchemaDescriptor;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

/// Read query or graph-modifying plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisMode {
    Read,
    Mutation,
}

pub struct SynthesisStage<'a> {
    model: &'a dyn LanguageModel,
    schema: &'a SchemaDescriptor,
    timeout: Duration,
}

impl<'a> SynthesisStage<'a> {
    pub fn new(model: &'a dyn LanguageModel, schema: &'a SchemaDescriptor, timeout: Duration) -> Self {
        Self {
            model,
            schema,
            timeout,
        }
    }

    /// Read-path synthesis
    pub async fn synthesize(
        &self,
        request: &NLQRequest,
        trace: &ReasoningTrace,
        explorations: &[ExplorationResult],
    ) -> CandidateQuery {
        let prompt = self.build_prompt(request, Some(trace), explorations, SynthesisMode::Read);
        self.complete(&prompt).await
    }

    /// Mutation-mode synthesis: the request describes a graph edit
    pub async fn synthesize_mutation(&self, request: &NLQRequest) -> CandidateQuery {
        let prompt = self.build_prompt(request, None, &[], SynthesisMode::Mutation);
        self.complete(&prompt).await
    }

    async fn complete(&self, prompt: &str) -> CandidateQuery {
        let completion = match tokio::time::timeout(self.timeout, self.model.complete(prompt)).await {
            Ok(Ok(completion)) => completion,
            Ok(Err(e)) => {
                warn!(error = %e, "synthesis call failed");
                return CandidateQuery::empty("The language model was unavailable.");
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "synthesis timed out");
                return CandidateQuery::empty("The language model timed out.");
            }
        };

        match parse_candidate(&completion) {
            Some(candidate) => {
                info!(query = %candidate.text(), "query synthesized");
                candidate
            }
            None => {
                warn!("synthesis output unparseable");
                CandidateQuery::empty("The language model returned an unusable answer.")
            }
        }
    }

    pub fn build_prompt(
        &self,
        request: &NLQRequest,
        trace: Option<&ReasoningTrace>,
        explorations: &[ExplorationResult],
        mode: SynthesisMode,
    ) -> String {
        let mut prompt = String::from("Schema:\n");
        prompt.push_str(&self.schema.to_prompt());
        prompt.push_str(
            "\nUse only the node labels, relationship types and properties listed above. \
             Never introduce new labels, relationship types or properties.\n",
        );

        push_history(&mut prompt, &request.conversation_history);

        prompt.push_str(&format!("\nUser request: \"{}\"\n", request.query_text.trim()));
        if let Some(trace) = trace {
            prompt.push_str(&format!("Interpretation: {}\n", trace.chosen_interpretation));
        }

        if !explorations.is_empty() {
            prompt.push_str("\nWhat the graph contains:\n");
            for result in explorations {
                let purpose = if result.purpose.is_empty() {
                    result.query.as_str()
                } else {
                    result.purpose.as_str()
                };
                prompt.push_str(&format!("- {}: {}\n", purpose, result.summary));
            }
        }

        match mode {
            SynthesisMode::Read => prompt.push_str(
                "\nWrite ONE read-only query (MATCH ... [WHERE ...] RETURN ... [LIMIT n]) that \
                 answers the request. Return whole nodes and relationships by variable so \
                 they can be drawn; prefer names confirmed by the graph contents above.\n",
            ),
            SynthesisMode::Mutation => prompt.push_str(
                "\nWrite ONE query that performs the requested change (CREATE, SET or \
                 [DETACH] DELETE). Identify existing entities by their display property.\n",
            ),
        }
        prompt.push_str("Respond with JSON only: {\"query\": string, \"explanation\": string}\n");
        prompt
    }
}

fn push_history(prompt: &mut String, history: &[ConversationTurn]) {
    if history.is_empty() {
        return;
    }
    prompt.push_str("\nConversation so far:\n");
    for (i, turn) in history.iter().enumerate() {
        prompt.push_str(&format!("Turn {}:\n  User: {}\n", i + 1, turn.user_request));
        if !turn.cypher_query.is_empty() {
            prompt.push_str(&format!("  Query: {}\n", turn.cypher_query));
        }
        if let Some(feedback) = &turn.feedback {
            prompt.push_str(&format!("  Feedback: {}\n", feedback));
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SynthesisPayload {
    #[serde(alias = "cypher", alias = "cypherQuery")]
    query: Option<String>,
    explanation: Option<String>,
}

fn parse_candidate(completion: &str) -> Option<CandidateQuery> {
    let payload: SynthesisPayload = serde_json::from_value(extract_json(completion)?).ok()?;
    let query = extract_cypher(payload.query.as_deref()?);
    if query.is_empty() {
        return None;
    }
    Some(CandidateQuery::new(query, payload.explanation.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlq::client::ScriptedModel;
    use crate::nlq::validator::validate;

    fn trace() -> ReasoningTrace {
        ReasoningTrace::trivial("projects for retail")
    }

    #[tokio::test]
    async fn test_parses_query_and_explanation() {
        let schema = SchemaDescriptor::default_registry();
        let model = ScriptedModel::new([
            r#"{"query": "```cypher\nMATCH (s:Sector)-[r:HAS_OPPORTUNITY]->(p) WHERE s.name = 'Retail Banking' RETURN s, r, p\n```", "explanation": "Projects of Retail Banking"}"#,
        ]);
        let stage = SynthesisStage::new(&model, &schema, Duration::from_secs(1));
        let explorations = vec![ExplorationResult {
            query: "MATCH (n:Sector) RETURN n".to_string(),
            purpose: "Check whether 'retail' names a Sector".to_string(),
            summary: "1 row; entities: Retail Banking (Sector)".to_string(),
        }];

        let candidate = stage
            .synthesize(&NLQRequest::new("projects for retail"), &trace(), &explorations)
            .await;
        assert_eq!(
            candidate.text(),
            "MATCH (s:Sector)-[r:HAS_OPPORTUNITY]->(p) WHERE s.name = 'Retail Banking' RETURN s, r, p"
        );
        assert_eq!(candidate.explanation(), "Projects of Retail Banking");
        assert!(validate(&candidate).valid);

        let prompt = &model.prompts().await[0];
        assert!(prompt.contains("Never introduce new labels"));
        assert!(prompt.contains("- Check whether 'retail' names a Sector: 1 row; entities: Retail Banking (Sector)"));
    }

    #[tokio::test]
    async fn test_unusable_answers_yield_empty_candidates() {
        let schema = SchemaDescriptor::default_registry();
        let model = ScriptedModel::new([
            "MATCH (n) RETURN n",
            r#"{"explanation": "no query field"}"#,
            r#"{"query": "   "}"#,
        ]);
        let stage = SynthesisStage::new(&model, &schema, Duration::from_secs(1));
        let request = NLQRequest::new("anything");

        for _ in 0..4 {
            let candidate = stage.synthesize(&request, &trace(), &[]).await;
            assert!(candidate.is_empty());
            assert!(!validate(&candidate).valid);
        }
    }

    #[tokio::test]
    async fn test_timeout_yields_empty_candidate() {
        let schema = SchemaDescriptor::default_registry();
        let model = ScriptedModel::new([r#"{"query": "MATCH (n) RETURN n"}"#])
            .with_delay(Duration::from_secs(5));
        let stage = SynthesisStage::new(&model, &schema, Duration::from_millis(20));
        let candidate = stage.synthesize(&NLQRequest::new("x"), &trace(), &[]).await;
        assert!(candidate.is_empty());
        assert_eq!(candidate.explanation(), "The language model timed out.");
    }

    #[tokio::test]
    async fn test_mutation_prompt() {
        let schema = SchemaDescriptor::default_registry();
        let model = ScriptedModel::new([
            r#"{"cypher": "MATCH (n:Role {name: 'ML Engineer'}) DETACH DELETE n", "explanation": "Remove the role"}"#,
        ]);
        let stage = SynthesisStage::new(&model, &schema, Duration::from_secs(1));
        let candidate = stage
            .synthesize_mutation(&NLQRequest::new("Delete the ML Engineer role"))
            .await;
        assert_eq!(candidate.text(), "MATCH (n:Role {name: 'ML Engineer'}) DETACH DELETE n");
        assert!(model.prompts().await[0].contains("performs the requested change"));
    }
}
