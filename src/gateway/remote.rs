//! Remote backend: network client for a graph server
//!
//! Talks to `POST /api/query` with `{query, params, graph, write}`; the
//! version name travels in `graph` and the query text is sent untouched.
//! Opening a handle sends one check query, so an unknown version or an
//! unreachable server fails at resolution rather than on first use.

use super::{GatewayError, GatewayResult, GraphGateway, QueryParams, QueryRows, StoreHandle};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Cheapest query every version answers
const VERSION_CHECK: &str = "MATCH (n) RETURN n LIMIT 1";

/// Gateway to a graph server reachable over HTTP
pub struct RemoteGateway {
    http_base_url: String,
    http_client: Client,
    timeout: Duration,
}

impl RemoteGateway {
    /// Create a gateway for the given HTTP base URL
    pub fn new(http_base_url: &str, timeout: Duration) -> GatewayResult<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Connection(e.to_string()))?;
        Ok(Self {
            http_base_url: http_base_url.trim_end_matches('/').to_string(),
            http_client,
            timeout,
        })
    }

    fn handle(&self, version: &str) -> RemoteHandle {
        RemoteHandle {
            version: version.to_string(),
            url: format!("{}/api/query", self.http_base_url),
            http_client: self.http_client.clone(),
            timeout_ms: self.timeout.as_millis() as u64,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl GraphGateway for RemoteGateway {
    async fn resolve_store_handle(&self, version: &str) -> GatewayResult<Box<dyn StoreHandle>> {
        let handle = self.handle(version);
        match handle.execute(VERSION_CHECK, QueryParams::new()).await {
            Ok(_) => {}
            Err(e) if e.is_fatal() || matches!(e, GatewayError::Timeout(_)) => return Err(e),
            // The server knows the version but rejects the check query itself
            Err(e) => debug!(version, error = %e, "version check query rejected"),
        }
        Ok(Box::new(handle))
    }

    fn describe(&self) -> String {
        format!("remote ({})", self.http_base_url)
    }
}

#[derive(Serialize)]
struct QueryBody<'a> {
    query: &'a str,
    params: &'a QueryParams,
    graph: &'a str,
    write: bool,
}

pub struct RemoteHandle {
    version: String,
    url: String,
    http_client: Client,
    timeout_ms: u64,
    closed: AtomicBool,
}

impl RemoteHandle {
    /// Execute a POST request to /api/query
    async fn post_query(&self, query: &str, params: &QueryParams, write: bool) -> GatewayResult<QueryRows> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GatewayError::Connection(format!(
                "session on `{}` is closed",
                self.version
            )));
        }

        let body = QueryBody {
            query,
            params,
            graph: &self.version,
            write,
        };
        let response = self
            .http_client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            let rows: QueryRows = response
                .json()
                .await
                .map_err(|e| GatewayError::Connection(format!("malformed store response: {}", e)))?;
            debug!(version = %self.version, rows = rows.len(), "remote query");
            return Ok(rows);
        }

        let error_body: serde_json::Value = response
            .json()
            .await
            .unwrap_or_else(|_| serde_json::json!({"error": "Unknown error"}));
        let msg = error_body
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown error")
            .to_string();

        Err(match status {
            StatusCode::BAD_REQUEST => GatewayError::Syntax(msg),
            StatusCode::NOT_FOUND => GatewayError::UnknownVersion(self.version.clone()),
            StatusCode::UNPROCESSABLE_ENTITY | StatusCode::CONFLICT => GatewayError::Execution(msg),
            other => GatewayError::Connection(format!("store returned {}: {}", other, msg)),
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout(self.timeout_ms)
        } else {
            GatewayError::Connection(err.to_string())
        }
    }
}

#[async_trait]
impl StoreHandle for RemoteHandle {
    fn version(&self) -> &str {
        &self.version
    }

    async fn execute(&self, query: &str, params: QueryParams) -> GatewayResult<QueryRows> {
        self.post_query(query, &params, false).await
    }

    async fn execute_write(&self, query: &str) -> GatewayResult<QueryRows> {
        self.post_query(query, &QueryParams::new(), true).await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::gateway::{Dataset, EmbeddedGateway};
    use crate::graph::GraphStore;
    use crate::nlq::{NLQPipeline, ScriptedModel};
    use crate::schema::SchemaDescriptor;
    use std::sync::Arc;

    /// Serve the API over the sample graph on an ephemeral port
    async fn serve_sample() -> String {
        let mut store = GraphStore::new();
        Dataset::sample().load_into(&mut store).unwrap();
        let pipeline = NLQPipeline::new(
            Arc::new(SchemaDescriptor::default_registry()),
            Arc::new(EmbeddedGateway::default().with_graph("main", store)),
            Arc::new(ScriptedModel::default()),
            PipelineConfig::default(),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, crate::http::router(Arc::new(pipeline)))
                .await
                .unwrap();
        });
        format!("http://{}", address)
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_at_resolution() {
        let gateway = RemoteGateway::new("http://127.0.0.1:9/", Duration::from_secs(2)).unwrap();
        assert_eq!(gateway.describe(), "remote (http://127.0.0.1:9)");
        let err = match gateway.resolve_store_handle("main").await {
            Ok(_) => panic!("resolution against a closed port succeeded"),
            Err(e) => e,
        };
        assert!(err.is_fatal() || matches!(err, GatewayError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_unknown_version_fails_at_resolution() {
        let url = serve_sample().await;
        let gateway = RemoteGateway::new(&url, Duration::from_secs(5)).unwrap();

        let handle = gateway.resolve_store_handle("main").await.unwrap();
        let rows = handle
            .execute("MATCH (n:Industry) RETURN n", QueryParams::new())
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        handle.close().await;

        let err = match gateway.resolve_store_handle("v9").await {
            Ok(_) => panic!("unknown version resolved"),
            Err(e) => e,
        };
        assert!(matches!(err, GatewayError::UnknownVersion(ref v) if v == "v9"));
    }

    #[tokio::test]
    async fn test_closed_handle_short_circuits() {
        let gateway = RemoteGateway::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let handle = gateway.handle("main");
        handle.close().await;
        let err = handle.execute_write("CREATE (n:Role)").await.unwrap_err();
        assert!(matches!(err, GatewayError::Connection(ref m) if m.contains("closed")));
    }
}
