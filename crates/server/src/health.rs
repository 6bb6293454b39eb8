use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use goosebot_db::{ping, DbPool};
use goosebot_slack::SocketStatus;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    socket: Arc<SocketStatus>,
}

impl HealthState {
    pub fn new(db_pool: DbPool, socket: Arc<SocketStatus>) -> Self {
        Self { db_pool, socket }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub database: HealthCheck,
    pub slack: HealthCheck,
    pub envelopes_received: u64,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/live", get(live))
        .with_state(state)
}

pub async fn spawn(listener: TcpListener, state: HealthState) -> std::io::Result<()> {
    let address = listener.local_addr()?;
    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(state)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

/// Answers 200 while degraded; 503 only once the socket runner has given up.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let slack = slack_check(&state.socket);
    let healthy = database.status == "ready" && slack.status == "ready";
    let (code, status) = if slack.status == "failed" {
        (StatusCode::SERVICE_UNAVAILABLE, "failed")
    } else if healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::OK, "degraded")
    };

    let response = HealthResponse {
        status,
        service: "goosebot",
        database,
        slack,
        envelopes_received: state.socket.envelopes_received(),
        checked_at: Utc::now().to_rfc3339(),
    };
    (code, Json(response))
}

pub async fn ready(State(state): State<HealthState>) -> (StatusCode, Json<HealthCheck>) {
    let database = database_check(&state.db_pool).await;
    if database.status != "ready" {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(database));
    }
    let slack = slack_check(&state.socket);
    let code = if slack.status == "ready" { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(slack))
}

pub async fn live() -> Json<HealthCheck> {
    Json(HealthCheck { status: "alive", detail: "process is running".to_string() })
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match ping(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

fn slack_check(socket: &SocketStatus) -> HealthCheck {
    if socket.is_exhausted() {
        HealthCheck {
            status: "failed",
            detail: format!("socket mode gave up after {} reconnects", socket.reconnects()),
        }
    } else if socket.is_connected() {
        HealthCheck { status: "ready", detail: "socket mode connected".to_string() }
    } else {
        HealthCheck {
            status: "degraded",
            detail: format!("socket mode disconnected after {} reconnects", socket.reconnects()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use goosebot_db::connect_with_settings;
    use goosebot_slack::SocketStatus;

    use crate::health::{router, HealthState};

    async fn get(state: HealthState, path: &str) -> (StatusCode, Value) {
        let response = router(state)
            .oneshot(Request::get(path).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("json"))
    }

    #[tokio::test]
    async fn health_reports_degraded_slack_but_stays_up() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        let state = HealthState::new(pool.clone(), Arc::new(SocketStatus::default()));

        for path in ["/", "/health"] {
            let (status, body) = get(state.clone(), path).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "degraded");
            assert_eq!(body["database"]["status"], "ready");
            assert_eq!(body["slack"]["status"], "degraded");
        }

        pool.close().await;
    }

    #[tokio::test]
    async fn health_fails_once_socket_reconnects_are_exhausted() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        let socket = Arc::new(SocketStatus::default());
        socket.mark_exhausted();
        let state = HealthState::new(pool.clone(), socket);

        let (status, body) = get(state.clone(), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "failed");
        assert_eq!(body["slack"]["status"], "failed");

        let (status, _) = get(state, "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        pool.close().await;
    }

    #[tokio::test]
    async fn ready_requires_a_socket_connection() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        let state = HealthState::new(pool.clone(), Arc::new(SocketStatus::default()));

        let (status, body) = get(state, "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");

        pool.close().await;
    }

    #[tokio::test]
    async fn ready_fails_when_database_is_closed() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        pool.close().await;
        let state = HealthState::new(pool, Arc::new(SocketStatus::default()));

        let (status, body) = get(state, "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["detail"].as_str().unwrap_or_default().starts_with("database query failed"));
    }

    #[tokio::test]
    async fn live_is_always_ok() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        let (status, body) =
            get(HealthState::new(pool.clone(), Arc::new(SocketStatus::default())), "/live").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "alive");
        pool.close().await;
    }
}
