use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;

use goosebot_core::domain::user::{Role, UserContext};
use goosebot_core::QueryStatus;
use goosebot_expert::pipeline::NoProgress;
use goosebot_expert::{HttpBackend, QueryExpertBackend, QueryPipeline};
use goosebot_mcp::{serve, AuthManager, BridgeState, MockCatalog, WarehouseUnavailable};

struct RunningBridge {
    base_url: String,
    stop: Option<oneshot::Sender<()>>,
}

impl Drop for RunningBridge {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn start(state: BridgeState) -> RunningBridge {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("address");
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(serve(listener, state, async move {
        let _ = stopped.await;
    }));
    RunningBridge { base_url: format!("http://{address}"), stop: Some(stop) }
}

#[tokio::test]
async fn http_backend_answers_through_the_bridge() {
    let bridge = start(BridgeState::new(Arc::new(MockCatalog), AuthManager::no_auth(), "test")).await;
    let backend = HttpBackend::new(&bridge.base_url, Duration::from_secs(5)).expect("backend");
    assert!(backend.health_check().await);

    let pipeline = QueryPipeline::with_limits(Arc::new(backend), 2, Some("COMPUTE_WH".into()));
    let user = UserContext::unmapped("U1", Role::Analyst);
    let result = pipeline.run("What was revenue last month?", &user, &NoProgress).await;

    assert_eq!(result.status, QueryStatus::Completed, "error: {:?}", result.error_message);
    assert!(result.sql.contains("SUM(revenue)"));
    assert_eq!(result.columns[0], "period");
    assert_eq!(result.row_count, 3);
    assert!(result.experts.iter().any(|expert| expert.user_name == "john.doe"));
}

#[tokio::test]
async fn live_mode_failures_become_failed_results() {
    let bridge =
        start(BridgeState::new(Arc::new(WarehouseUnavailable), AuthManager::no_auth(), "live")).await;
    let backend = HttpBackend::new(&bridge.base_url, Duration::from_secs(5)).expect("backend");

    let pipeline = QueryPipeline::with_limits(Arc::new(backend), 1, None);
    let user = UserContext::unmapped("U1", Role::Analyst);
    let result = pipeline.run("How many customers churned?", &user, &NoProgress).await;

    assert_eq!(result.status, QueryStatus::Failed);
    assert!(result.error_message.unwrap_or_default().contains("warehouse"));
}
