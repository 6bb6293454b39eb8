//! HTTP surface of the bridge: `GET /`, `GET /health`, `POST /mcp`.

use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{info, warn};

use goosebot_core::config::McpConfig;
use goosebot_expert::protocol::{ToolRequest, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST};

use crate::auth::{presented_key, AuthManager, AuthResult};
use crate::catalog::{tool_list, MockCatalog, ToolProvider, WarehouseUnavailable};

pub const SERVICE_NAME: &str = "goose-mcp-server";

#[derive(Clone)]
pub struct BridgeState {
    tools: Arc<dyn ToolProvider>,
    auth: Arc<AuthManager>,
    mode: String,
}

impl BridgeState {
    pub fn new(tools: Arc<dyn ToolProvider>, auth: AuthManager, mode: impl Into<String>) -> Self {
        Self { tools, auth: Arc::new(auth), mode: mode.into() }
    }

    /// Mock catalog or the warehouse-unavailable provider depending on `mcp.mock_mode`.
    pub fn from_config(config: &McpConfig) -> Self {
        let tools: Arc<dyn ToolProvider> = if config.mock_mode {
            Arc::new(MockCatalog)
        } else {
            Arc::new(WarehouseUnavailable)
        };
        Self::new(tools, AuthManager::from_config(config), config.mode_label.clone())
    }

    pub fn with_auth(mut self, auth: AuthManager) -> Self {
        self.auth = Arc::new(auth);
        self
    }
}

pub fn router(state: BridgeState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/mcp", post(handle_mcp))
        .with_state(state)
}

pub async fn serve<F>(listener: TcpListener, state: BridgeState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let address = listener.local_addr()?;
    info!(
        event_name = "bridge.started",
        address = %address,
        mode = %state.mode,
        auth_required = state.auth.is_auth_required(),
        "query expert bridge listening"
    );
    axum::serve(listener, router(state)).with_graceful_shutdown(shutdown).await
}

async fn health(State(state): State<BridgeState>) -> Json<Value> {
    Json(json!({ "status": "healthy", "service": SERVICE_NAME, "mode": state.mode }))
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn handle_mcp(State(state): State<BridgeState>, headers: HeaderMap, body: String) -> Response {
    if let AuthResult::Denied { reason, retry_after } =
        state.auth.validate_request(presented_key(&headers))
    {
        let Some(retry_after) = retry_after else {
            return error_response(StatusCode::UNAUTHORIZED, reason);
        };
        let mut response = error_response(StatusCode::TOO_MANY_REQUESTS, reason);
        if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().max(1).to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        return response;
    }

    let request: ToolRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(error) => {
            warn!(error = %error, "malformed bridge request");
            return error_response(StatusCode::BAD_REQUEST, format!("invalid request body: {error}"));
        }
    };

    match request.method.as_str() {
        METHOD_TOOLS_LIST => Json(json!({ "result": tool_list() })).into_response(),
        METHOD_TOOLS_CALL => {
            let Some(tool) = request.params.name.as_deref().filter(|name| !name.is_empty()) else {
                return error_response(StatusCode::BAD_REQUEST, "Missing tool name");
            };
            info!(event_name = "bridge.tool.called", tool, "bridge tool call");
            match state.tools.call(tool, &request.params.arguments) {
                Ok(result) => Json(json!({ "result": result })).into_response(),
                Err(error) => {
                    warn!(event_name = "bridge.tool.failed", tool, error = %error, "bridge tool failed");
                    error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
                }
            }
        }
        other => error_response(StatusCode::BAD_REQUEST, format!("Unsupported method: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use secrecy::SecretString;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{router, BridgeState};
    use crate::auth::{ApiKeyEntry, AuthManager};
    use crate::catalog::{MockCatalog, WarehouseUnavailable};

    fn mock_state() -> BridgeState {
        BridgeState::new(Arc::new(MockCatalog), AuthManager::no_auth(), "heroku")
    }

    async fn send(state: BridgeState, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(state).oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn post_mcp(body: Value) -> Request<Body> {
        Request::post("/mcp")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn health_reports_service_and_mode() {
        for path in ["/", "/health"] {
            let (status, body) =
                send(mock_state(), Request::get(path).body(Body::empty()).expect("request")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, json!({"status": "healthy", "service": "goose-mcp-server", "mode": "heroku"}));
        }
    }

    #[tokio::test]
    async fn tool_call_returns_result_envelope() {
        let (status, body) = send(
            mock_state(),
            post_mcp(json!({
                "method": "tools/call",
                "params": {"name": "queryexpert__find_table_meta_data", "arguments": {"search_text": "revenue"}}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["tables"][0]["table_name"], "ANALYTICS.SALES.REVENUE_DAILY");
    }

    #[tokio::test]
    async fn missing_tool_name_is_bad_request() {
        let (status, body) =
            send(mock_state(), post_mcp(json!({"method": "tools/call", "params": {}}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing tool name");
    }

    #[tokio::test]
    async fn unknown_tool_is_server_error() {
        let (status, body) =
            send(mock_state(), post_mcp(json!({"params": {"name": "queryexpert__nope"}}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Unknown tool: queryexpert__nope");
    }

    #[tokio::test]
    async fn tools_list_names_all_four_tools() {
        let (status, body) = send(mock_state(), post_mcp(json!({"method": "tools/list"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"]["tools"].as_array().map(Vec::len), Some(4));
    }

    #[tokio::test]
    async fn live_mode_reports_unavailable_warehouse() {
        let state = BridgeState::new(Arc::new(WarehouseUnavailable), AuthManager::no_auth(), "live");
        let (status, body) = send(
            state,
            post_mcp(json!({"params": {"name": "queryexpert__execute_query", "arguments": {"query": "SELECT 1"}}})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap_or_default().contains("warehouse"));
    }

    #[tokio::test]
    async fn api_key_is_required_when_configured() {
        let state = mock_state().with_auth(AuthManager::with_keys(vec![ApiKeyEntry::new(
            SecretString::from("secret-key".to_string()),
            "agent",
            1,
        )]));

        let (status, _) = send(state.clone(), post_mcp(json!({"method": "tools/list"}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let authorised = || {
            Request::post("/mcp")
                .header("x-api-key", "secret-key")
                .body(Body::from(json!({"method": "tools/list"}).to_string()))
                .expect("request")
        };
        let (status, _) = send(state.clone(), authorised()).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(state, authorised()).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }
}
