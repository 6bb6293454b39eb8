use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use goosebot_core::config::AppConfig;
use goosebot_db::repositories::{
    SessionRepository, SqlAuditLogRepository, SqlQueryHistoryRepository, SqlSessionRepository,
    SqlUserMappingRepository,
};
use goosebot_db::{connect_from_config, migrations, DbPool};
use goosebot_expert::{build_backend, ExpertError, QueryPipeline};
use goosebot_slack::web::SlackApiError;
use goosebot_slack::{
    bot_dispatcher, BotRepositories, BotService, ReconnectPolicy, SlackWebClient,
    SocketModeRunner, WebSocketTransport,
};

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub bot: Arc<BotService>,
    pub slack_runner: SocketModeRunner,
    pub sessions: Arc<dyn SessionRepository>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("slack client setup failed: {0}")]
    Slack(#[from] SlackApiError),
    #[error("query expert setup failed: {0}")]
    Expert(#[from] ExpertError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        role = %config.app.role,
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let web = SlackWebClient::from_config(&config.slack)?;
    let backend = build_backend(&config.expert)?;
    info!(
        event_name = "system.bootstrap.expert_backend",
        correlation_id = "bootstrap",
        backend = backend.name(),
        "query expert backend selected"
    );
    let pipeline = Arc::new(QueryPipeline::new(backend, &config.expert));

    let sessions: Arc<dyn SessionRepository> = Arc::new(SqlSessionRepository::new(db_pool.clone()));
    let repositories = BotRepositories {
        sessions: sessions.clone(),
        history: Arc::new(SqlQueryHistoryRepository::new(db_pool.clone())),
        mappings: Arc::new(SqlUserMappingRepository::new(db_pool.clone())),
        audit: Arc::new(SqlAuditLogRepository::new(db_pool.clone())),
    };

    let bot = Arc::new(BotService::new(
        Arc::new(web.clone()),
        pipeline,
        repositories,
        config.bot.clone(),
        config.slack.admin_channel.clone(),
    ));
    let transport = WebSocketTransport::new(web).with_timeouts(
        Duration::from_secs(config.slack.request_timeout_secs),
        Duration::from_secs(config.slack.socket_idle_timeout_secs),
    );
    let slack_runner = SocketModeRunner::new(
        Arc::new(transport),
        bot_dispatcher(bot.clone()),
        ReconnectPolicy::from(&config.slack.reconnect),
    );

    Ok(Application { config, db_pool, bot, slack_runner, sessions })
}

/// Periodically deactivates sessions idle for longer than `bot.session_idle_hours`.
pub fn spawn_session_sweeper(
    sessions: Arc<dyn SessionRepository>,
    idle_hours: u32,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => return,
            }
            let cutoff = Utc::now() - chrono::Duration::hours(i64::from(idle_hours));
            match sessions.expire_idle(cutoff).await {
                Ok(0) => {}
                Ok(expired) => info!(
                    event_name = "system.sessions.expired",
                    expired,
                    "expired idle sessions"
                ),
                Err(error) => warn!(error = %error, "session sweep failed"),
            }
        }
    })
}
