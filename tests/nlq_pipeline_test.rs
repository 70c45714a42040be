//! End-to-end pipeline scenarios over the embedded store with a scripted
//! language model.

use async_trait::async_trait;
use nlgraph::config::PipelineConfig;
use nlgraph::gateway::{
    Dataset, EmbeddedGateway, GatewayError, GatewayResult, GraphGateway, MatchMode, QueryParams,
    QueryRows, StoreHandle,
};
use nlgraph::graph::GraphStore;
use nlgraph::nlq::{
    ConversationTurn, LanguageModel, NLQPipeline, NLQRequest, PipelineError, QueryContext,
    RiskLevel, ScriptedModel,
};
use nlgraph::SchemaDescriptor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const NO_EXPLORATION: &str = r#"{"interpretations": [], "needsClarification": false, "explorationQueries": []}"#;

fn sample_gateway() -> Arc<EmbeddedGateway> {
    let mut store = GraphStore::new();
    Dataset::sample().load_into(&mut store).unwrap();
    Arc::new(EmbeddedGateway::default().with_graph("main", store))
}

fn pipeline(gateway: Arc<dyn GraphGateway>, model: Arc<ScriptedModel>) -> NLQPipeline {
    let model: Arc<dyn LanguageModel> = model;
    NLQPipeline::new(
        Arc::new(SchemaDescriptor::default_registry()),
        gateway,
        model,
        PipelineConfig::default(),
    )
}

async fn count(gateway: &dyn GraphGateway, query: &str) -> usize {
    let handle = gateway.resolve_store_handle("main").await.unwrap();
    let rows = handle.execute(query, QueryParams::new()).await.unwrap();
    handle.close().await;
    rows.len()
}

/// Counts opened and closed sessions of the wrapped gateway. With
/// `connection_lost` set, every read fails as if the store went away.
struct CountingGateway {
    inner: Arc<EmbeddedGateway>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    connection_lost: bool,
}

struct CountingHandle {
    inner: Box<dyn StoreHandle>,
    closed: Arc<AtomicUsize>,
    connection_lost: bool,
}

#[async_trait]
impl GraphGateway for CountingGateway {
    async fn resolve_store_handle(&self, version: &str) -> GatewayResult<Box<dyn StoreHandle>> {
        let inner = self.inner.resolve_store_handle(version).await?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingHandle {
            inner,
            closed: Arc::clone(&self.closed),
            connection_lost: self.connection_lost,
        }))
    }

    fn describe(&self) -> String {
        format!("counting {}", self.inner.describe())
    }
}

#[async_trait]
impl StoreHandle for CountingHandle {
    fn version(&self) -> &str {
        self.inner.version()
    }

    async fn execute(&self, query: &str, params: QueryParams) -> GatewayResult<QueryRows> {
        if self.connection_lost {
            return Err(GatewayError::Connection("bolt socket reset by peer".to_string()));
        }
        self.inner.execute(query, params).await
    }

    async fn execute_write(&self, query: &str) -> GatewayResult<QueryRows> {
        self.inner.execute_write(query).await
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await;
    }
}

#[tokio::test]
async fn test_show_all_industries_returns_only_industries() {
    let dataset = Dataset::from_json(
        r#"{
            "nodes": [
                {"key": "b", "label": "Industry", "properties": {"name": "Banking"}},
                {"key": "i", "label": "Industry", "properties": {"name": "Insurance"}},
                {"key": "r", "label": "Sector", "properties": {"name": "Retail Banking"}}
            ],
            "relationships": [{"from": "b", "to": "r", "type": "HAS_SECTOR"}]
        }"#,
    )
    .unwrap();
    let mut store = GraphStore::new();
    dataset.load_into(&mut store).unwrap();
    let gateway = Arc::new(EmbeddedGateway::default().with_graph("main", store));

    let model = Arc::new(ScriptedModel::new([
        r#"{"interpretations": ["List every industry"], "chosenInterpretation": "List every industry",
            "needsClarification": false, "explorationQueries": ["MATCH (n:Industry) RETURN n LIMIT 10"]}"#,
        r#"{"query": "MATCH (n:Industry) RETURN n LIMIT 50", "explanation": "All industries in the graph."}"#,
    ]));
    let pipeline = pipeline(gateway, model.clone());

    let response = pipeline
        .answer(&NLQRequest::new("Show me all industries"))
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.message, "All industries in the graph.");
    let result = response.query_result.unwrap();
    assert_eq!(result.query, "MATCH (n:Industry) RETURN n LIMIT 50");
    assert_eq!(result.graph_data.nodes.len(), 2);
    assert!(result.graph_data.nodes.iter().all(|n| n.group == "Industry"));
    assert!(result.graph_data.edges.is_empty());
    assert_eq!(result.summary, "Found 2 entities (Industry).");

    let reasoning = result.reasoning.unwrap();
    assert_eq!(reasoning.chosen_interpretation, "List every industry");

    let prompts = model.prompts().await;
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("2 rows; entities: Banking (Industry), Insurance (Industry)"));
}

#[tokio::test]
async fn test_lowercase_term_is_disambiguated_through_exploration() {
    let gateway = sample_gateway();
    let model = Arc::new(ScriptedModel::new([
        NO_EXPLORATION,
        r#"{"query": "MATCH (s:Sector)-[r:HAS_OPPORTUNITY]->(p:ProjectOpportunity) WHERE s.name = 'Retail Banking' RETURN s, r, p",
            "explanation": "Projects available for the Retail Banking sector."}"#,
    ]));
    let pipeline = pipeline(gateway, model.clone());

    let response = pipeline
        .answer(&NLQRequest::new("What projects are available for retail?"))
        .await
        .unwrap();

    assert!(response.success);
    assert!(response.message.contains("Retail Banking"));

    let result = response.query_result.unwrap();
    let exploration = &result.reasoning.unwrap().exploration_queries;
    assert!(exploration
        .iter()
        .any(|q| q.query == "MATCH (n:Industry) WHERE toLower(n.name) CONTAINS 'retail' RETURN n LIMIT 10"));
    assert!(exploration
        .iter()
        .any(|q| q.query == "MATCH (n:Sector) WHERE toLower(n.name) CONTAINS 'retail' RETURN n LIMIT 10"));

    let synthesis_prompt = &model.prompts().await[1];
    assert!(synthesis_prompt.contains("- Check whether 'retail' names a Industry: No results"));
    assert!(synthesis_prompt.contains("- Check whether 'retail' names a Sector: 1 row; entities: Retail Banking (Sector)"));

    let mut titles: Vec<&str> = result
        .graph_data
        .nodes
        .iter()
        .filter(|n| n.group == "ProjectOpportunity")
        .map(|n| n.label.as_str())
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["Digital Onboarding", "Real-Time Fraud Detection"]);
    assert_eq!(result.graph_data.edges.len(), 2);
}

#[tokio::test]
async fn test_clarification_short_circuits_before_the_store() {
    let inner = sample_gateway();
    let opened = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));
    let gateway = Arc::new(CountingGateway {
        inner,
        opened: opened.clone(),
        closed: closed.clone(),
        connection_lost: false,
    });
    let model = Arc::new(ScriptedModel::new([
        r#"{"needsClarification": true, "clarification": {"question": "Which retail business do you mean?", "options": ["Retail Banking"]}}"#,
    ]));
    let pipeline = pipeline(gateway, model.clone());

    let response = pipeline.answer(&NLQRequest::new("retail things")).await.unwrap();

    assert!(!response.success);
    assert_eq!(response.message, "Which retail business do you mean?");
    assert_eq!(response.needs_clarification.unwrap().options, vec!["Retail Banking"]);
    assert!(response.query_result.is_none());
    assert_eq!(model.prompts().await.len(), 1);
    assert_eq!(opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_zero_results_explain_the_near_miss() {
    let gateway = sample_gateway();
    let model = Arc::new(ScriptedModel::new([
        NO_EXPLORATION,
        r#"{"query": "MATCH (s:Sector)-[r:EXPERIENCES]->(p:PainPoint) WHERE s.name = 'Retail' RETURN s, r, p",
            "explanation": "Pain points of the Retail sector."}"#,
    ]));
    let pipeline = pipeline(gateway, model);

    let response = pipeline
        .answer(&NLQRequest::new("Which pain points does Retail have?"))
        .await
        .unwrap();

    assert!(response.success);
    assert!(response.message.to_lowercase().contains("did you mean"));
    assert!(response.message.contains("'Retail Banking' (Sector)"));
    let result = response.query_result.unwrap();
    assert!(result.graph_data.nodes.is_empty());
    assert_eq!(result.summary, "No matching entities found.");
}

#[tokio::test]
async fn test_scalar_answer_is_not_a_near_miss() {
    let gateway = sample_gateway();
    let model = Arc::new(ScriptedModel::new([
        NO_EXPLORATION,
        r#"{"query": "MATCH (s:Sector) WHERE s.name = 'Retail' RETURN count(s) AS sectors",
            "explanation": "Number of sectors named Retail."}"#,
    ]));
    let pipeline = pipeline(gateway, model);

    let response = pipeline
        .answer(&NLQRequest::new("How many sectors does Retail have?"))
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.message, "Number of sectors named Retail.");
    let result = response.query_result.unwrap();
    assert!(result.graph_data.is_empty());
    assert_eq!(result.summary, "Returned 1 row.");
}

#[tokio::test]
async fn test_sentence_initial_verb_does_not_hide_the_near_miss() {
    let gateway = sample_gateway();
    let model = Arc::new(ScriptedModel::new([
        NO_EXPLORATION,
        r#"{"query": "MATCH (s:Sector)-[r:EXPERIENCES]->(p:PainPoint) WHERE s.name = 'Retail' RETURN s, r, p",
            "explanation": "Pain points of the Retail sector."}"#,
    ]));
    let pipeline = pipeline(gateway, model);

    let response = pipeline
        .answer(&NLQRequest::new("Describe Retail pain points"))
        .await
        .unwrap();

    assert!(response.message.starts_with("Did you mean: 'Retail Banking' (Sector)?"));
    assert_eq!(response.query_result.unwrap().summary, "No matching entities found.");
}

#[tokio::test]
async fn test_store_rejection_falls_back_once() {
    let gateway = sample_gateway();
    let model = Arc::new(ScriptedModel::new([
        NO_EXPLORATION,
        r#"{"query": "MATCH (n:Industry) WHERE n.name = RETURN n", "explanation": "Industries."}"#,
    ]));
    let pipeline = pipeline(gateway, model);

    let response = pipeline
        .answer(&NLQRequest::new("Show me all industries"))
        .await
        .unwrap();

    assert!(response.success);
    assert!(response
        .message
        .starts_with("The original query had errors, so a simpler query was used."));
    let result = response.query_result.unwrap();
    assert_eq!(result.query, "MATCH (n:Industry) RETURN n LIMIT 50");
    assert_eq!(result.graph_data.nodes.len(), 3);
}

#[tokio::test]
async fn test_unusable_and_writing_candidates_are_replaced() {
    let gateway = sample_gateway();
    let model = Arc::new(ScriptedModel::new([
        NO_EXPLORATION,
        r#"{"query": "MATCH (a)-[r]->(b) RETURN a-[r]->b"}"#,
        NO_EXPLORATION,
        r#"{"query": "MATCH (n:Industry) DETACH DELETE n RETURN n"}"#,
        NO_EXPLORATION,
        "no JSON at all",
    ]));
    let pipeline = pipeline(gateway.clone(), model);
    let request = NLQRequest::new("Show me all industries");

    let invalid = pipeline.answer(&request).await.unwrap();
    assert!(invalid
        .message
        .starts_with("The generated query was not usable, so a simpler query was used."));
    assert_eq!(invalid.query_result.unwrap().graph_data.nodes.len(), 3);

    let writing = pipeline.answer(&request).await.unwrap();
    assert!(writing.message.starts_with(
        "The generated query would have modified the graph, so a read-only query was used."
    ));
    assert_eq!(count(gateway.as_ref(), "MATCH (n:Industry) RETURN n").await, 3);

    let garbage = pipeline.answer(&request).await.unwrap();
    assert!(garbage.success);
    assert_eq!(
        garbage.query_result.unwrap().query,
        "MATCH (n:Industry) RETURN n LIMIT 50"
    );
}

#[tokio::test]
async fn test_model_outage_still_answers() {
    let gateway = sample_gateway();
    let model = Arc::new(ScriptedModel::new(Vec::<String>::new()));
    let pipeline = pipeline(gateway, model);

    let response = pipeline
        .answer(&NLQRequest::new("How are things connected?"))
        .await
        .unwrap();

    assert!(response.success);
    let result = response.query_result.unwrap();
    assert!(result.reasoning.unwrap().degraded);
    assert!(!result.graph_data.nodes.is_empty());
}

#[tokio::test]
async fn test_context_and_history_reach_the_prompts() {
    let gateway = sample_gateway();
    let model = Arc::new(ScriptedModel::new([
        NO_EXPLORATION,
        r#"{"query": "MATCH (n:Sector) RETURN n LIMIT 50", "explanation": "Sectors."}"#,
    ]));
    let pipeline = pipeline(gateway, model.clone());

    let request = NLQRequest {
        query_text: "only the ones in banking".to_string(),
        context: Some(QueryContext {
            current_entity_type: Some("Sector".to_string()),
            ..Default::default()
        }),
        conversation_history: vec![ConversationTurn {
            user_request: "show sectors".to_string(),
            cypher_query: "MATCH (n:Sector) RETURN n LIMIT 50".to_string(),
            feedback: None,
        }],
    };
    let response = pipeline.answer(&request).await.unwrap();
    assert!(response.success);

    let reasoning_prompt = &model.prompts().await[0];
    assert!(reasoning_prompt.contains("- Currently displayed entity type: Sector"));
    assert!(reasoning_prompt.contains("Turn 1:"));
    assert!(reasoning_prompt.contains("User: show sectors"));
}

#[tokio::test]
async fn test_empty_question_is_rejected_without_model_calls() {
    let model = Arc::new(ScriptedModel::new(Vec::<String>::new()));
    let pipeline = pipeline(sample_gateway(), model.clone());

    let response = pipeline.answer(&NLQRequest::new("   ")).await.unwrap();
    assert!(!response.success);
    assert_eq!(response.message, "Please enter a question.");
    assert!(model.prompts().await.is_empty());
}

#[tokio::test]
async fn test_unknown_graph_version_is_a_store_failure() {
    let model = Arc::new(ScriptedModel::new([NO_EXPLORATION]));
    let pipeline = pipeline(sample_gateway(), model);

    let request = NLQRequest {
        context: Some(QueryContext {
            graph_version: Some("v9".to_string()),
            ..Default::default()
        }),
        ..NLQRequest::new("Show me all industries")
    };
    let err = pipeline.answer(&request).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Store(GatewayError::UnknownVersion(ref v)) if v == "v9"
    ));
}

#[tokio::test]
async fn test_sessions_are_closed_on_every_path() {
    let opened = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));
    let gateway = Arc::new(CountingGateway {
        inner: sample_gateway(),
        opened: opened.clone(),
        closed: closed.clone(),
        connection_lost: false,
    });
    let model = Arc::new(ScriptedModel::new([
        NO_EXPLORATION,
        r#"{"query": "MATCH (n:Industry) RETURN n LIMIT 50"}"#,
        NO_EXPLORATION,
        r#"{"query": "MATCH (n:Industry) WHERE n.name = RETURN n"}"#,
        r#"{"query": "CREATE (n:Role {name: 'Architect'})", "explanation": "Add a role."}"#,
    ]));
    let pipeline = pipeline(gateway.clone(), model);
    let request = NLQRequest::new("Show me all industries");

    pipeline.answer(&request).await.unwrap();
    pipeline.answer(&request).await.unwrap();

    let proposal = pipeline
        .propose_mutation(&NLQRequest::new("Add an Architect role"))
        .await
        .unwrap();
    pipeline
        .execute_mutation(proposal.mutation_plan.unwrap())
        .await
        .unwrap();

    let handle = gateway.resolve_store_handle("main").await.unwrap();
    let banking = handle
        .find_by_property("Industry", "name", "Banking", MatchMode::Exact, 1)
        .await
        .unwrap();
    handle.close().await;
    pipeline.expand(&banking[0].element_id, None).await.unwrap();

    assert_eq!(opened.load(Ordering::SeqCst), 6);
    assert_eq!(opened.load(Ordering::SeqCst), closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_lost_connection_still_closes_the_session() {
    let opened = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));
    let gateway = Arc::new(CountingGateway {
        inner: sample_gateway(),
        opened: opened.clone(),
        closed: closed.clone(),
        connection_lost: true,
    });
    let model = Arc::new(ScriptedModel::new([
        NO_EXPLORATION,
        r#"{"query": "MATCH (n:Industry) RETURN n LIMIT 50", "explanation": "Industries."}"#,
        r#"{"query": "CREATE (n:Role {name: 'Architect'})", "explanation": "Add a role."}"#,
    ]));
    let pipeline = pipeline(gateway, model);

    let err = pipeline
        .answer(&NLQRequest::new("Show me all industries"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Store(GatewayError::Connection(_))));
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(closed.load(Ordering::SeqCst), 1);

    let plan = pipeline
        .propose_mutation(&NLQRequest::new("Add an Architect role"))
        .await
        .unwrap()
        .mutation_plan
        .unwrap();
    let err = pipeline.expand("n:1", None).await.unwrap_err();
    assert!(matches!(err, PipelineError::Store(GatewayError::Connection(_))));
    assert!(pipeline.execute_mutation(plan).await.unwrap().success);

    assert_eq!(opened.load(Ordering::SeqCst), 4);
    assert_eq!(opened.load(Ordering::SeqCst), closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_destructive_mutation_waits_for_confirmation() {
    let gateway = sample_gateway();
    let model = Arc::new(ScriptedModel::new([
        r#"{"query": "MATCH (n:Role) DETACH DELETE n", "explanation": "Remove every role."}"#,
    ]));
    let pipeline = pipeline(gateway.clone(), model);

    let response = pipeline
        .propose_mutation(&NLQRequest::new("Delete all roles"))
        .await
        .unwrap();

    assert_eq!(response.needs_confirmation, Some(true));
    assert!(response.message.contains("HIGH risk"));
    let plan = response.mutation_plan.unwrap();
    assert_eq!(plan.risk_level, RiskLevel::High);
    assert_eq!(plan.affected_entity_types, vec!["Role"]);
    assert_eq!(plan.graph_version, "main");
    assert_eq!(count(gateway.as_ref(), "MATCH (n:Role) RETURN n").await, 3);

    let executed = pipeline.execute_mutation(plan.clone()).await.unwrap();
    assert!(executed.success);
    assert_eq!(executed.message, "The change was applied.");
    assert_eq!(count(gateway.as_ref(), "MATCH (n:Role) RETURN n").await, 0);

    let replayed = pipeline.execute_mutation(plan).await.unwrap();
    assert!(!replayed.success);
    assert_eq!(replayed.message, "This change was already confirmed or cancelled.");
}

#[tokio::test]
async fn test_cancelled_plan_never_runs() {
    let gateway = sample_gateway();
    let model = Arc::new(ScriptedModel::new([
        r#"{"query": "CREATE (n:Role {name: 'Architect'})", "explanation": "Add a role."}"#,
    ]));
    let pipeline = pipeline(gateway.clone(), model);

    let plan = pipeline
        .propose_mutation(&NLQRequest::new("Add an Architect role"))
        .await
        .unwrap()
        .mutation_plan
        .unwrap();
    assert_eq!(plan.risk_level, RiskLevel::Low);

    let cancelled = pipeline.cancel_mutation(plan.clone());
    assert!(cancelled.success);
    assert_eq!(cancelled.message, "The change was cancelled. Nothing was modified.");

    let late = pipeline.execute_mutation(plan).await.unwrap();
    assert!(!late.success);
    assert_eq!(count(gateway.as_ref(), "MATCH (n:Role) RETURN n").await, 3);
}

#[tokio::test]
async fn test_tampered_risk_is_recomputed() {
    let gateway = sample_gateway();
    let model = Arc::new(ScriptedModel::new([
        r#"{"query": "MATCH (n:Role) SET n.reviewed = true", "explanation": "Mark roles reviewed."}"#,
    ]));
    let pipeline = pipeline(gateway, model);

    let mut plan = pipeline
        .propose_mutation(&NLQRequest::new("Mark every role as reviewed"))
        .await
        .unwrap()
        .mutation_plan
        .unwrap();
    assert_eq!(plan.risk_level, RiskLevel::Medium);

    plan.risk_level = RiskLevel::Low;
    let executed = pipeline.execute_mutation(plan).await.unwrap();
    assert!(executed.success);
    assert_eq!(executed.query_result.unwrap().summary, "3 properties set");
}

#[tokio::test]
async fn test_read_only_proposal_is_refused() {
    let model = Arc::new(ScriptedModel::new([
        r#"{"query": "MATCH (n:Role) RETURN n", "explanation": "Roles."}"#,
    ]));
    let pipeline = pipeline(sample_gateway(), model);

    let response = pipeline
        .propose_mutation(&NLQRequest::new("What roles exist?"))
        .await
        .unwrap();
    assert!(!response.success);
    assert!(response.mutation_plan.is_none());
    assert_eq!(
        response.message,
        "That request does not change the graph; ask it as a question instead."
    );
}

#[tokio::test]
async fn test_expand_returns_direct_neighbourhood() {
    let gateway = sample_gateway();
    let pipeline = pipeline(gateway.clone(), Arc::new(ScriptedModel::default()));

    let handle = gateway.resolve_store_handle("main").await.unwrap();
    let banking = handle
        .find_by_property("Industry", "name", "Banking", MatchMode::Exact, 1)
        .await
        .unwrap();
    handle.close().await;

    let view = pipeline.expand(&banking[0].element_id, None).await.unwrap();
    let mut labels: Vec<&str> = view.nodes.iter().map(|n| n.label.as_str()).collect();
    labels.sort();
    assert_eq!(labels, vec!["Banking", "Investment Banking", "Retail Banking"]);
    assert_eq!(view.edges.len(), 2);

    let err = pipeline
        .expand(&banking[0].element_id, Some("v9"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Store(GatewayError::UnknownVersion(_))));
}
