//! HTTP handlers for the NLQ API

use crate::gateway::{GatewayError, QueryParams};
use crate::nlq::{
    ExpandRequest, MutationDecision, NLQPipeline, NLQRequest, NLQResponse, PipelineError,
};
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

const TECHNICAL_ISSUE: &str =
    "We ran into a technical issue while talking to the graph store. Please try again later.";

/// Generic failure body for fatal pipeline errors; details stay in the log
fn error_response(err: PipelineError) -> Response {
    error!(error = %err, "request failed");
    let (status, message) = match &err {
        PipelineError::Store(GatewayError::UnknownVersion(version)) => (
            StatusCode::NOT_FOUND,
            format!("Graph version '{}' does not exist.", version),
        ),
        PipelineError::Store(GatewayError::Connection(_) | GatewayError::Timeout(_)) => {
            (StatusCode::BAD_GATEWAY, TECHNICAL_ISSUE.to_string())
        }
        PipelineError::Store(GatewayError::Syntax(_) | GatewayError::Execution(_)) => (
            StatusCode::BAD_REQUEST,
            "The request could not be processed.".to_string(),
        ),
        PipelineError::FallbackFailed(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, TECHNICAL_ISSUE.to_string())
        }
    };
    (status, Json(NLQResponse::failure(message))).into_response()
}

fn respond(result: Result<NLQResponse, PipelineError>) -> Response {
    match result {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(e),
    }
}

/// Read path
pub async fn nlq_query_handler(
    State(pipeline): State<Arc<NLQPipeline>>,
    Json(request): Json<NLQRequest>,
) -> Response {
    respond(pipeline.answer(&request).await)
}

pub async fn mutation_propose_handler(
    State(pipeline): State<Arc<NLQPipeline>>,
    Json(request): Json<NLQRequest>,
) -> Response {
    respond(pipeline.propose_mutation(&request).await)
}

pub async fn mutation_execute_handler(
    State(pipeline): State<Arc<NLQPipeline>>,
    Json(decision): Json<MutationDecision>,
) -> Response {
    respond(pipeline.execute_mutation(decision.mutation_plan).await)
}

pub async fn mutation_cancel_handler(
    State(pipeline): State<Arc<NLQPipeline>>,
    Json(decision): Json<MutationDecision>,
) -> Response {
    Json(pipeline.cancel_mutation(decision.mutation_plan)).into_response()
}

/// Neighbourhood of one element, for the UI's expand action
pub async fn expand_handler(
    State(pipeline): State<Arc<NLQPipeline>>,
    Json(request): Json<ExpandRequest>,
) -> Response {
    match pipeline
        .expand(&request.element_id, request.graph_version.as_deref())
        .await
    {
        Ok(view) => Json(json!({ "success": true, "graphData": view })).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn schema_handler(State(pipeline): State<Arc<NLQPipeline>>) -> impl IntoResponse {
    Json(pipeline.schema().clone())
}

pub async fn status_handler(State(pipeline): State<Arc<NLQPipeline>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": crate::VERSION,
        "backend": pipeline.gateway().describe(),
        "defaultGraphVersion": pipeline.config().default_graph_version,
    }))
}

/// Request for executing a query against one graph version
#[derive(Deserialize)]
pub struct StoreQueryRequest {
    pub query: String,
    #[serde(default)]
    pub params: QueryParams,
    #[serde(default)]
    pub graph: Option<String>,
    #[serde(default)]
    pub write: bool,
}

/// Raw query execution in the gateway wire format
pub async fn store_query_handler(
    State(pipeline): State<Arc<NLQPipeline>>,
    Json(payload): Json<StoreQueryRequest>,
) -> Response {
    let version = pipeline.version_for(payload.graph.as_deref());
    let handle = match pipeline.gateway().resolve_store_handle(&version).await {
        Ok(handle) => handle,
        Err(e) => return store_error(e),
    };

    let result = if payload.write {
        handle.execute_write(&payload.query).await
    } else {
        handle.execute(&payload.query, payload.params).await
    };
    handle.close().await;

    match result {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => store_error(e),
    }
}

fn store_error(err: GatewayError) -> Response {
    let status = match &err {
        GatewayError::Syntax(_) => StatusCode::BAD_REQUEST,
        GatewayError::UnknownVersion(_) => StatusCode::NOT_FOUND,
        GatewayError::Execution(_) => StatusCode::UNPROCESSABLE_ENTITY,
        GatewayError::Connection(_) | GatewayError::Timeout(_) => StatusCode::BAD_GATEWAY,
    };
    warn!(error = %err, "store query failed");
    let message = match err {
        GatewayError::Syntax(m) | GatewayError::Execution(m) => m,
        other => other.to_string(),
    };
    (status, Json(json!({ "error": message }))).into_response()
}
