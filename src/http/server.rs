//! HTTP server for the NLQ API

use super::handler::{
    expand_handler, mutation_cancel_handler, mutation_execute_handler, mutation_propose_handler,
    nlq_query_handler, schema_handler, status_handler, store_query_handler,
};
use crate::nlq::NLQPipeline;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

/// All API routes, sharing one pipeline
pub fn router(pipeline: Arc<NLQPipeline>) -> Router {
    Router::new()
        .route("/api/nlq/query", post(nlq_query_handler))
        .route("/api/nlq/mutation/propose", post(mutation_propose_handler))
        .route("/api/nlq/mutation/execute", post(mutation_execute_handler))
        .route("/api/nlq/mutation/cancel", post(mutation_cancel_handler))
        .route("/api/graph/expand", post(expand_handler))
        .route("/api/query", post(store_query_handler))
        .route("/api/schema", get(schema_handler))
        .route("/api/status", get(status_handler))
        .layer(CorsLayer::permissive())
        .with_state(pipeline)
}

/// HTTP server managing the NLQ API
pub struct HttpServer {
    pipeline: Arc<NLQPipeline>,
    address: String,
}

impl HttpServer {
    pub fn new(pipeline: Arc<NLQPipeline>, address: impl Into<String>) -> Self {
        Self {
            pipeline,
            address: address.into(),
        }
    }

    /// Bind and serve until the process is stopped
    pub async fn start(&self) -> std::io::Result<()> {
        let app = router(Arc::clone(&self.pipeline));
        let listener = tokio::net::TcpListener::bind(&self.address).await?;

        info!(
            address = %self.address,
            backend = %self.pipeline.gateway().describe(),
            "NLQ API listening"
        );

        axum::serve(listener, app).await
    }
}
