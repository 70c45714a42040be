//! HTTP API tests against the router, without binding a socket

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use nlgraph::config::PipelineConfig;
use nlgraph::gateway::{
    Dataset, EmbeddedGateway, GatewayError, GatewayResult, GraphGateway, QueryParams, QueryRows,
    StoreHandle,
};
use nlgraph::graph::GraphStore;
use nlgraph::http::router;
use nlgraph::nlq::{NLQPipeline, ScriptedModel};
use nlgraph::SchemaDescriptor;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

fn app<I, S>(responses: I) -> Router
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut store = GraphStore::new();
    Dataset::sample().load_into(&mut store).unwrap();
    let gateway = Arc::new(EmbeddedGateway::default().with_graph("main", store));
    let pipeline = NLQPipeline::new(
        Arc::new(SchemaDescriptor::default_registry()),
        gateway,
        Arc::new(ScriptedModel::new(responses)),
        PipelineConfig::default(),
    );
    router(Arc::new(pipeline))
}

/// Opens sessions fine, then fails every query as if the store went away
struct UnreachableGateway {
    closed: Arc<AtomicUsize>,
}

struct UnreachableHandle {
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl GraphGateway for UnreachableGateway {
    async fn resolve_store_handle(&self, _version: &str) -> GatewayResult<Box<dyn StoreHandle>> {
        Ok(Box::new(UnreachableHandle {
            closed: Arc::clone(&self.closed),
        }))
    }

    fn describe(&self) -> String {
        "unreachable".to_string()
    }
}

#[async_trait]
impl StoreHandle for UnreachableHandle {
    fn version(&self) -> &str {
        "main"
    }

    async fn execute(&self, _query: &str, _params: QueryParams) -> GatewayResult<QueryRows> {
        Err(GatewayError::Connection("connect to 10.0.0.7:7687 refused".to_string()))
    }

    async fn execute_write(&self, _query: &str) -> GatewayResult<QueryRows> {
        Err(GatewayError::Connection("connect to 10.0.0.7:7687 refused".to_string()))
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_status_and_schema() {
    let app = app(Vec::<String>::new());

    let (status, body) = send(&app, "GET", "/api/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["defaultGraphVersion"], "main");
    assert_eq!(body["version"], nlgraph::VERSION);

    let (status, body) = send(&app, "GET", "/api/schema", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["entityTypes"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(names.contains(&"Industry"));
    assert!(names.contains(&"ProjectOpportunity"));
}

#[tokio::test]
async fn test_question_round_trip() {
    let app = app([
        r#"{"needsClarification": false, "explorationQueries": []}"#,
        r#"{"query": "MATCH (n:Industry) RETURN n LIMIT 50", "explanation": "All industries."}"#,
    ]);

    let (status, body) = send(
        &app,
        "POST",
        "/api/nlq/query",
        Some(json!({ "queryText": "Show me all industries", "conversationHistory": [] })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "All industries.");
    let result = &body["queryResult"];
    assert_eq!(result["query"], "MATCH (n:Industry) RETURN n LIMIT 50");
    assert_eq!(result["graphData"]["nodes"].as_array().unwrap().len(), 3);
    assert_eq!(result["graphData"]["nodes"][0]["group"], "Industry");
    assert!(result["executionTimeMs"].is_u64());
}

#[tokio::test]
async fn test_unknown_version_is_not_found() {
    let app = app([r#"{"needsClarification": false}"#]);

    let (status, body) = send(
        &app,
        "POST",
        "/api/nlq/query",
        Some(json!({
            "queryText": "Show me all industries",
            "context": { "graphVersion": "v9" }
        })),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Graph version 'v9' does not exist.");
}

#[tokio::test]
async fn test_mutation_propose_execute_replay() {
    let app = app([r#"{"query": "CREATE (n:Role {name: 'Architect'})", "explanation": "Add a role."}"#]);

    let (status, proposal) = send(
        &app,
        "POST",
        "/api/nlq/mutation/propose",
        Some(json!({ "queryText": "Add an Architect role" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(proposal["needsConfirmation"], true);
    assert_eq!(proposal["mutationPlan"]["riskLevel"], "LOW");
    let plan = proposal["mutationPlan"].clone();

    let decision = json!({ "mutationPlan": plan });
    let (status, executed) = send(&app, "POST", "/api/nlq/mutation/execute", Some(decision.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(executed["success"], true);
    assert_eq!(executed["queryResult"]["summary"], "1 node created, 1 property set");

    let (status, replayed) = send(&app, "POST", "/api/nlq/mutation/execute", Some(decision.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replayed["success"], false);

    let (_, cancelled) = send(&app, "POST", "/api/nlq/mutation/cancel", Some(decision)).await;
    assert_eq!(cancelled["success"], false);

    let (_, rows) = send(
        &app,
        "POST",
        "/api/query",
        Some(json!({ "query": "MATCH (n:Role) RETURN n" })),
    )
    .await;
    assert_eq!(rows["records"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_store_query_and_expand() {
    let app = app(Vec::<String>::new());

    let (status, rows) = send(
        &app,
        "POST",
        "/api/query",
        Some(json!({ "query": "MATCH (n:Industry) WHERE n.name = $name RETURN n", "params": { "name": "Banking" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let records = rows["records"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    let banking_id = records[0][0]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "POST",
        "/api/graph/expand",
        Some(json!({ "elementId": banking_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["graphData"]["nodes"].as_array().unwrap().len(), 3);
    assert_eq!(body["graphData"]["edges"].as_array().unwrap().len(), 2);

    let (status, body) = send(
        &app,
        "POST",
        "/api/query",
        Some(json!({ "query": "MATCH (n WHERE RETURN n" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = send(
        &app,
        "POST",
        "/api/query",
        Some(json!({ "query": "MATCH (n) RETURN n", "graph": "v9" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_lost_store_is_a_generic_bad_gateway() {
    let closed = Arc::new(AtomicUsize::new(0));
    let pipeline = NLQPipeline::new(
        Arc::new(SchemaDescriptor::default_registry()),
        Arc::new(UnreachableGateway {
            closed: closed.clone(),
        }),
        Arc::new(ScriptedModel::new([
            r#"{"needsClarification": false, "explorationQueries": []}"#,
            r#"{"query": "MATCH (n:Industry) RETURN n LIMIT 50", "explanation": "All industries."}"#,
        ])),
        PipelineConfig::default(),
    );
    let app = router(Arc::new(pipeline));

    let (status, body) = send(
        &app,
        "POST",
        "/api/nlq/query",
        Some(json!({ "queryText": "Show me all industries" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["success"], false);
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("technical issue"));
    assert!(!message.contains("10.0.0.7"));
    assert!(!body.to_string().contains("refused"));
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}
