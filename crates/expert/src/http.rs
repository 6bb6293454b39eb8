use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backend::QueryExpertBackend;
use crate::error::ExpertError;
use crate::protocol::{
    permission_arguments, ExecuteRequest, ExecutionOutput, PermissionReport, QuerySearchRequest,
    SimilarQueries, TableSearch, TableSearchRequest, ToolRequest, TOOL_CHECK_PERMISSIONS,
    TOOL_EXECUTE_QUERY, TOOL_FIND_TABLE_METADATA, TOOL_QUERY_EXPERT_SEARCH,
};

pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Talks to a Query Expert bridge over `POST {base_url}/mcp`.
pub struct HttpBackend {
    client: Client,
    base_url: String,
    timeout: Duration,
    health_interval: Duration,
    last_healthy: Mutex<Option<Instant>>,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ExpertError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(5)
            .build()
            .map_err(|error| ExpertError::Setup(error.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            health_interval: HEALTH_CHECK_INTERVAL,
            last_healthy: Mutex::new(None),
        })
    }

    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn ensure_healthy(&self) -> Result<(), ExpertError> {
        let mut last_healthy = self.last_healthy.lock().await;
        let fresh = last_healthy.is_some_and(|at| at.elapsed() < self.health_interval);
        if fresh {
            return Ok(());
        }

        if !self.health_check().await {
            return Err(ExpertError::Unhealthy);
        }
        *last_healthy = Some(Instant::now());
        Ok(())
    }

    async fn call_tool<T: DeserializeOwned>(
        &self,
        tool: &str,
        arguments: Map<String, Value>,
    ) -> Result<T, ExpertError> {
        self.ensure_healthy().await?;

        let request = ToolRequest::call(tool, arguments);
        debug!(event_name = "expert.tool.call", tool, "calling Query Expert tool");

        let response = self
            .client
            .post(format!("{}/mcp", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|error| self.transport_error(tool, error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(event_name = "expert.tool.http_error", tool, status = status.as_u16());
            return Err(ExpertError::Http { status: status.as_u16(), body });
        }

        let payload: Value =
            response.json().await.map_err(|error| self.transport_error(tool, error))?;
        if let Some(error) = payload.get("error") {
            let message = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
            return Err(ExpertError::Remote(message));
        }

        let result = payload.get("result").cloned().unwrap_or(Value::Object(Map::new()));
        serde_json::from_value(result)
            .map_err(|error| ExpertError::Decode { tool: tool.to_string(), message: error.to_string() })
    }

    fn transport_error(&self, tool: &str, error: reqwest::Error) -> ExpertError {
        if error.is_timeout() {
            ExpertError::Timeout { tool: tool.to_string(), timeout_secs: self.timeout.as_secs() }
        } else {
            ExpertError::Transport(error.to_string())
        }
    }
}

#[async_trait]
impl QueryExpertBackend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn health_check(&self) -> bool {
        match self.client.get(format!("{}/health", self.base_url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                warn!(event_name = "expert.health.failed", error = %error, "health check failed");
                false
            }
        }
    }

    async fn find_table_metadata(
        &self,
        request: &TableSearchRequest,
    ) -> Result<TableSearch, ExpertError> {
        self.call_tool(TOOL_FIND_TABLE_METADATA, request.to_arguments()).await
    }

    async fn search_similar_queries(
        &self,
        request: &QuerySearchRequest,
    ) -> Result<SimilarQueries, ExpertError> {
        self.call_tool(TOOL_QUERY_EXPERT_SEARCH, request.to_arguments()).await
    }

    async fn execute_query(&self, request: &ExecuteRequest) -> Result<ExecutionOutput, ExpertError> {
        self.call_tool(TOOL_EXECUTE_QUERY, request.to_arguments()).await
    }

    async fn check_permissions(&self, tables: &[String]) -> Result<PermissionReport, ExpertError> {
        self.call_tool(TOOL_CHECK_PERMISSIONS, permission_arguments(tables)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::HttpBackend;
    use crate::backend::QueryExpertBackend;
    use crate::error::ExpertError;
    use crate::protocol::{ExecuteRequest, TableSearchRequest};

    #[derive(Clone, Default)]
    struct Counters {
        health: Arc<AtomicUsize>,
    }

    async fn health(State(counters): State<Counters>) -> Json<Value> {
        counters.health.fetch_add(1, Ordering::SeqCst);
        Json(json!({"status": "healthy"}))
    }

    async fn mcp(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        let tool = body["params"]["name"].as_str().unwrap_or_default().to_string();
        match tool.as_str() {
            "queryexpert__find_table_meta_data" => (
                StatusCode::OK,
                Json(json!({"result": {"tables": [{
                    "table_name": "ANALYTICS.SALES.REVENUE_DAILY",
                    "columns": ["date", "revenue"],
                    "search_echo": body["params"]["arguments"]["search_text"]
                }]}})),
            ),
            "queryexpert__execute_query" => {
                (StatusCode::OK, Json(json!({"error": "warehouse is asleep"})))
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "Unknown tool"}))),
        }
    }

    async fn spawn_server(counters: Counters) -> String {
        let app = Router::new()
            .route("/health", get(health))
            .route("/mcp", post(mcp))
            .with_state(counters);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn tool_result_is_decoded_and_health_is_cached() {
        let counters = Counters::default();
        let url = spawn_server(counters.clone()).await;
        let backend = HttpBackend::new(&url, Duration::from_secs(5)).expect("client");

        let request = TableSearchRequest::verified("revenue", 5);
        let first = backend.find_table_metadata(&request).await.expect("first call");
        let _second = backend.find_table_metadata(&request).await.expect("second call");

        assert_eq!(first.tables[0].table_name, "ANALYTICS.SALES.REVENUE_DAILY");
        assert_eq!(counters.health.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn error_payload_becomes_remote_error() {
        let url = spawn_server(Counters::default()).await;
        let backend = HttpBackend::new(&url, Duration::from_secs(5)).expect("client");

        let result = backend
            .execute_query(&ExecuteRequest { sql: "SELECT 1".into(), ..Default::default() })
            .await;

        assert!(matches!(result, Err(ExpertError::Remote(ref m)) if m == "warehouse is asleep"));
    }

    #[tokio::test]
    async fn non_success_status_becomes_http_error() {
        let url = spawn_server(Counters::default()).await;
        let backend = HttpBackend::new(&url, Duration::from_secs(5)).expect("client");

        let result = backend.check_permissions(&["A.B.C".to_string()]).await;

        assert!(matches!(result, Err(ExpertError::Http { status: 500, .. })));
    }

    #[tokio::test]
    async fn unreachable_server_is_reported_unhealthy() {
        let backend =
            HttpBackend::new("http://127.0.0.1:9", Duration::from_millis(500)).expect("client");

        assert!(!backend.health_check().await);
        let result = backend.find_table_metadata(&TableSearchRequest::verified("x", 1)).await;
        assert!(matches!(result, Err(ExpertError::Unhealthy)));
    }
}
