mod bootstrap;
mod health;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use goosebot_core::config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};
use goosebot_core::ProcessRole;
use goosebot_mcp::BridgeState;
use goosebot_slack::RunnerExit;

#[derive(Debug, Parser)]
#[command(name = "goosebot-server", about = "Goose data bot: Slack socket bot or Query Expert bridge")]
struct Args {
    /// Process role; falls back to `app.role` / `GOOSEBOT_APP_ROLE` / `APP_TYPE`.
    #[arg(long)]
    role: Option<ProcessRole>,
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(LoadOptions {
        config_path: args.config,
        overrides: ConfigOverrides { app_role: args.role, ..ConfigOverrides::default() },
        ..LoadOptions::default()
    })?;
    init_logging(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(error) = wait_for_shutdown().await {
            tracing::warn!(error = %error, "signal handler failed; shutting down");
        }
        let _ = shutdown_tx.send(true);
    });

    match config.app.role {
        ProcessRole::Slackbot => run_slackbot(config, shutdown_rx).await,
        ProcessRole::Mcp => run_bridge(config, shutdown_rx).await,
    }
}

async fn run_slackbot(config: AppConfig, shutdown: watch::Receiver<bool>) -> Result<()> {
    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener =
        TcpListener::bind(&address).await.with_context(|| format!("binding {address}"))?;
    health::spawn(listener, health::HealthState::new(app.db_pool.clone(), app.slack_runner.status()))
        .await?;

    let sweeper = bootstrap::spawn_session_sweeper(
        Arc::clone(&app.sessions),
        app.config.bot.session_idle_hours,
        shutdown.clone(),
    );

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        role = "slackbot",
        backend = app.bot.pipeline().backend().name(),
        "goosebot started"
    );
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let runner = app.slack_runner;
    let runner_shutdown = shutdown.clone();
    let runner_task = tokio::spawn(async move { runner.start(runner_shutdown).await });

    let outcome = supervise_runner(runner_task, shutdown, grace).await;
    sweeper.abort();
    app.db_pool.close().await;
    outcome
}

/// Waits for a shutdown signal or for the runner to stop on its own.
///
/// A runner that gives up reconnecting is an error, so the process exits non-zero and the
/// platform restarts it.
async fn supervise_runner(
    mut runner_task: JoinHandle<RunnerExit>,
    mut shutdown: watch::Receiver<bool>,
    grace: Duration,
) -> Result<()> {
    let signalled = async {
        let _ = shutdown.wait_for(|stop| *stop).await;
    };
    let joined = tokio::select! {
        () = signalled => {
            tracing::info!(
                event_name = "system.server.stopping",
                correlation_id = "shutdown",
                "goosebot stopping"
            );
            match tokio::time::timeout(grace, &mut runner_task).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::warn!(
                        grace_secs = grace.as_secs(),
                        "socket runner did not stop within grace period"
                    );
                    runner_task.abort();
                    return Ok(());
                }
            }
        }
        joined = &mut runner_task => joined,
    };

    match joined.context("socket runner task failed")? {
        RunnerExit::Shutdown => Ok(()),
        RunnerExit::RetriesExhausted => {
            tracing::error!(
                event_name = "system.server.socket_exhausted",
                correlation_id = "shutdown",
                "slack socket mode gave up reconnecting"
            );
            bail!("slack socket mode retries exhausted")
        }
    }
}

async fn run_bridge(config: AppConfig, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let address = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener =
        TcpListener::bind(&address).await.with_context(|| format!("binding {address}"))?;

    let mut state = BridgeState::from_config(&config.mcp);
    if let Ok(raw) = std::env::var("GOOSEBOT_MCP_API_KEYS") {
        let keys: Vec<goosebot_mcp::ApiKeyConfig> =
            serde_json::from_str(&raw).context("parsing GOOSEBOT_MCP_API_KEYS")?;
        state = state.with_auth(goosebot_mcp::AuthManager::from_key_configs(keys));
    }

    goosebot_mcp::serve(listener, state, async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
    })
    .await?;
    tracing::info!(event_name = "system.bridge.stopped", correlation_id = "shutdown", "bridge stopped");
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use goosebot_slack::RunnerExit;
    use tokio::sync::watch;

    use crate::supervise_runner;

    #[tokio::test]
    async fn exhausted_runner_fails_the_process_without_a_shutdown_signal() {
        let (_tx, rx) = watch::channel(false);
        let runner = tokio::spawn(async { RunnerExit::RetriesExhausted });

        let supervised = supervise_runner(runner, rx, Duration::from_secs(1));
        let result = tokio::time::timeout(Duration::from_secs(5), supervised)
            .await
            .expect("supervisor must return when the runner stops");

        let message = result.expect_err("exhaustion is an error").to_string();
        assert!(message.contains("retries exhausted"));
    }

    #[tokio::test]
    async fn shutdown_signal_waits_for_the_runner_and_succeeds() {
        let (tx, rx) = watch::channel(false);
        let mut runner_rx = rx.clone();
        let runner = tokio::spawn(async move {
            let _ = runner_rx.wait_for(|stop| *stop).await;
            RunnerExit::Shutdown
        });
        tx.send(true).expect("send shutdown");

        supervise_runner(runner, rx, Duration::from_secs(1)).await.expect("clean shutdown");
    }
}
