//! Pipeline orchestration
//!
//! One [`NLQPipeline`] is shared by all requests. It holds the read-only
//! schema, the gateway, the model and the ledger of consumed mutation
//! plans; everything else lives for one request. Every store handle the
//! pipeline opens is closed before the call returns, on success and error
//! paths alike.

use super::assembler::{assemble, diagnose, summarize};
use super::client::LanguageModel;
use super::exploration::ExplorationRunner;
use super::fallback::FallbackSynthesizer;
use super::mutation::{build_plan, PlanLedger, ProposedMutation};
use super::reasoning::ReasoningStage;
use super::synthesis::SynthesisStage;
use super::types::*;
use super::validator::{is_read_only, validate};
use super::{PipelineError, PipelineResult};
use crate::config::PipelineConfig;
use crate::gateway::{GraphGateway, QueryParams, QueryRows, StoreHandle, WriteSummary};
use crate::schema::SchemaDescriptor;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Nodes returned by a neighbour expansion
const EXPAND_LIMIT: usize = 50;

pub struct NLQPipeline {
    schema: Arc<SchemaDescriptor>,
    gateway: Arc<dyn GraphGateway>,
    model: Arc<dyn LanguageModel>,
    config: PipelineConfig,
    ledger: PlanLedger,
}

impl NLQPipeline {
    pub fn new(
        schema: Arc<SchemaDescriptor>,
        gateway: Arc<dyn GraphGateway>,
        model: Arc<dyn LanguageModel>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            schema,
            gateway,
            model,
            config,
            ledger: PlanLedger::default(),
        }
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    pub fn gateway(&self) -> &dyn GraphGateway {
        self.gateway.as_ref()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Requested graph version, or the configured default
    pub fn version_for(&self, requested: Option<&str>) -> String {
        requested
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(&self.config.default_graph_version)
            .to_string()
    }

    /// Read path: question in, subgraph and explanation out
    pub async fn answer(&self, request: &NLQRequest) -> PipelineResult<NLQResponse> {
        let started = Instant::now();
        if request.query_text.trim().is_empty() {
            return Ok(NLQResponse::failure("Please enter a question."));
        }

        let reasoning = ReasoningStage::new(
            self.model.as_ref(),
            &self.schema,
            Duration::from_millis(self.config.reasoning_timeout_ms),
            self.config.max_exploration_queries,
        );
        let trace = reasoning.reason(request).await;
        if trace.needs_clarification {
            if let Some(clarification) = trace.clarification.clone() {
                info!(question = %clarification.question, "asking for clarification");
                return Ok(NLQResponse::clarification(clarification));
            }
        }

        let version = self.version_for(request.graph_version());
        let handle = self.open(&version).await?;
        let outcome = self.answer_with(handle.as_ref(), request, trace, started).await;
        handle.close().await;
        outcome
    }

    async fn answer_with(
        &self,
        handle: &dyn StoreHandle,
        request: &NLQRequest,
        trace: ReasoningTrace,
        started: Instant,
    ) -> PipelineResult<NLQResponse> {
        let text = request.query_text.trim();
        let context = request.context.as_ref();

        let explorations = ExplorationRunner::new(
            &self.schema,
            Duration::from_millis(self.config.exploration_timeout_ms),
            self.config.summary_label_limit,
        )
        .run(handle, &trace.exploration_queries)
        .await;

        let synthesis = SynthesisStage::new(
            self.model.as_ref(),
            &self.schema,
            Duration::from_millis(self.config.synthesis_timeout_ms),
        );
        let candidate = synthesis.synthesize(request, &trace, &explorations).await;

        let fallback = FallbackSynthesizer::new(&self.schema);
        let validation = validate(&candidate);
        let (mut candidate, mut used_fallback) = if !validation.valid {
            warn!(errors = ?validation.errors, query = %candidate.text(), "candidate rejected, using fallback");
            let replacement = fallback.synthesize_with_resolution(text, context, handle).await;
            (annotate(replacement, "The generated query was not usable, so a simpler query was used."), true)
        } else if !is_read_only(candidate.text()) {
            warn!(query = %candidate.text(), "candidate writes to the graph, using fallback");
            let replacement = fallback.synthesize_with_resolution(text, context, handle).await;
            (annotate(replacement, "The generated query would have modified the graph, so a read-only query was used."), true)
        } else {
            (candidate, false)
        };

        let rows = match handle.execute(candidate.text(), QueryParams::new()).await {
            Ok(rows) => rows,
            Err(e) if e.is_fatal() => {
                error!(error = %e, "graph store failure");
                return Err(PipelineError::Store(e));
            }
            Err(e) if !used_fallback => {
                warn!(error = %e, query = %candidate.text(), "query failed, retrying with fallback");
                let replacement = fallback.synthesize_with_resolution(text, context, handle).await;
                candidate = annotate(replacement, "The original query had errors, so a simpler query was used.");
                used_fallback = true;
                self.execute_fallback(handle, &candidate).await?
            }
            Err(e) => {
                error!(error = %e, query = %candidate.text(), "fallback query failed");
                return Err(PipelineError::FallbackFailed(e));
            }
        };

        let view = assemble(&rows, &self.schema);
        let mut message = if candidate.explanation().is_empty() {
            "Here is what I found.".to_string()
        } else {
            candidate.explanation().to_string()
        };
        if view.is_empty() && rows.is_empty() {
            if let Some(clause) = diagnose(text, &self.schema, handle).await {
                message = format!("{} {}", clause, message);
            }
        }

        let summary = summarize(&view, rows.len());
        let execution_time_ms = started.elapsed().as_millis() as u64;
        info!(
            nodes = view.nodes.len(),
            edges = view.edges.len(),
            fallback = used_fallback,
            elapsed_ms = execution_time_ms,
            "request answered"
        );

        Ok(NLQResponse::answered(
            message,
            QueryResult {
                query: candidate.text().to_string(),
                graph_data: view,
                summary,
                execution_time_ms,
                reasoning: Some(trace),
            },
        ))
    }

    async fn execute_fallback(
        &self,
        handle: &dyn StoreHandle,
        candidate: &CandidateQuery,
    ) -> PipelineResult<QueryRows> {
        handle
            .execute(candidate.text(), QueryParams::new())
            .await
            .map_err(|e| {
                error!(error = %e, query = %candidate.text(), "fallback query failed");
                if e.is_fatal() {
                    PipelineError::Store(e)
                } else {
                    PipelineError::FallbackFailed(e)
                }
            })
    }

    /// Synthesize a graph change and return it for confirmation
    pub async fn propose_mutation(&self, request: &NLQRequest) -> PipelineResult<NLQResponse> {
        if request.query_text.trim().is_empty() {
            return Ok(NLQResponse::failure("Please describe the change."));
        }

        // The version must exist before a plan is issued against it
        let version = self.version_for(request.graph_version());
        let handle = self.open(&version).await?;
        handle.close().await;

        let synthesis = SynthesisStage::new(
            self.model.as_ref(),
            &self.schema,
            Duration::from_millis(self.config.synthesis_timeout_ms),
        );
        let candidate = synthesis.synthesize_mutation(request).await;

        if candidate.is_empty() {
            return Ok(NLQResponse::failure(
                "I could not turn that request into a graph change. Please rephrase it.",
            ));
        }
        if is_read_only(candidate.text()) {
            return Ok(NLQResponse::failure(
                "That request does not change the graph; ask it as a question instead.",
            ));
        }

        let plan = build_plan(&candidate, &self.schema, &version);
        let scope = if plan.affected_entity_types.is_empty() {
            "the graph".to_string()
        } else {
            plan.affected_entity_types.join(", ")
        };
        let message = format!(
            "This change is {} risk and affects {}. Confirm to apply it.",
            plan.risk_level, scope
        );
        info!(plan = %plan.id, risk = %plan.risk_level, "mutation proposed");
        Ok(NLQResponse::confirmation(plan, message))
    }

    /// CONFIRMED: execute a plan exactly once
    pub async fn execute_mutation(&self, plan: MutationPlan) -> PipelineResult<NLQResponse> {
        let started = Instant::now();
        let id = plan.id;
        if !self.ledger.consume(id) {
            warn!(plan = %id, "plan replayed");
            return Ok(NLQResponse::failure(
                "This change was already confirmed or cancelled.",
            ));
        }

        let proposed = ProposedMutation::from_plan(plan);
        let handle = match self.open(&proposed.plan().graph_version).await {
            Ok(handle) => handle,
            Err(e) => {
                self.ledger.release(id);
                return Err(e);
            }
        };
        let outcome = proposed.confirm(handle.as_ref()).await;
        handle.close().await;

        match outcome {
            Ok(executed) => {
                let view = assemble(&executed.rows, &self.schema);
                Ok(NLQResponse::answered(
                    "The change was applied.",
                    QueryResult {
                        query: executed.plan.query,
                        graph_data: view,
                        summary: describe_writes(&executed.rows.stats),
                        execution_time_ms: started.elapsed().as_millis() as u64,
                        reasoning: None,
                    },
                ))
            }
            Err(e) if e.is_fatal() => {
                error!(plan = %id, error = %e, "graph store failure during mutation");
                Err(PipelineError::Store(e))
            }
            Err(e) => {
                warn!(plan = %id, error = %e, "mutation rejected by the store");
                Ok(NLQResponse::failure(
                    "The change could not be applied to the graph. Nothing was modified.",
                ))
            }
        }
    }

    /// CANCELLED: discard a plan without touching the store
    pub fn cancel_mutation(&self, plan: MutationPlan) -> NLQResponse {
        if !self.ledger.consume(plan.id) {
            return NLQResponse::failure("This change was already confirmed or cancelled.");
        }
        ProposedMutation::from_plan(plan).cancel();
        NLQResponse::ok("The change was cancelled. Nothing was modified.")
    }

    /// Direct neighbourhood of one element
    pub async fn expand(&self, element_id: &str, version: Option<&str>) -> PipelineResult<GraphViewModel> {
        let version = self.version_for(version);
        let handle = self.open(&version).await?;
        let rows = handle.neighbors(element_id, EXPAND_LIMIT).await;
        handle.close().await;
        Ok(assemble(&rows?, &self.schema))
    }

    async fn open(&self, version: &str) -> PipelineResult<Box<dyn StoreHandle>> {
        self.gateway.resolve_store_handle(version).await.map_err(|e| {
            error!(version, error = %e, "could not open graph store session");
            PipelineError::Store(e)
        })
    }
}

fn annotate(candidate: CandidateQuery, note: &str) -> CandidateQuery {
    let explanation = format!("{} {}", note, candidate.explanation());
    CandidateQuery::new(candidate.text(), explanation.trim())
}

/// "1 node created, 2 properties set"
fn describe_writes(stats: &WriteSummary) -> String {
    let parts: Vec<String> = [
        (stats.nodes_created, "node", "created"),
        (stats.nodes_deleted, "node", "deleted"),
        (stats.relationships_created, "relationship", "created"),
        (stats.relationships_deleted, "relationship", "deleted"),
        (stats.properties_set, "property", "set"),
    ]
    .iter()
    .filter(|(count, _, _)| *count > 0)
    .map(|(count, noun, verb)| {
        let noun = match (*count, *noun) {
            (1, n) => n.to_string(),
            (_, "property") => "properties".to_string(),
            (_, n) => format!("{}s", n),
        };
        format!("{} {} {}", count, noun, verb)
    })
    .collect();

    if parts.is_empty() {
        "No elements were modified.".to_string()
    } else {
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_writes() {
        let stats = WriteSummary {
            nodes_created: 1,
            properties_set: 3,
            relationships_deleted: 2,
            ..Default::default()
        };
        assert_eq!(
            describe_writes(&stats),
            "1 node created, 2 relationships deleted, 3 properties set"
        );
        assert_eq!(describe_writes(&WriteSummary::default()), "No elements were modified.");
    }

    #[test]
    fn test_annotate_keeps_query() {
        let annotated = annotate(CandidateQuery::new("MATCH (n) RETURN n LIMIT 25", "Showing."), "Note.");
        assert_eq!(annotated.text(), "MATCH (n) RETURN n LIMIT 25");
        assert_eq!(annotated.explanation(), "Note. Showing.");
    }
}
