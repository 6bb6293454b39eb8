use goosebot_core::config::{AppConfig, LoadOptions};
use goosebot_core::manifest::{missing_scopes, BOT_SCOPES};
use goosebot_core::signing::RequestSignatureVerifier;
use goosebot_core::ProcessRole;
use goosebot_db::{connect_from_config, ping};
use goosebot_slack::SlackWebClient;
use serde::Serialize;

use crate::commands::CommandResult;

const SELF_TEST_UNIX: i64 = 1_531_420_618;
const SELF_TEST_BODY: &[u8] = b"token=doctor&command=%2Fgoose-query&text=self-test";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

/// Exit code 0 when every check passes or is skipped, 1 otherwise.
pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                format!("configuration loaded and validated for role `{}`", config.app.role),
            ));
            if config.app.role == ProcessRole::Slackbot {
                checks.push(check_request_signing(&config));
                checks.push(with_runtime("slack_scopes", check_slack_scopes(&config)));
            } else {
                checks.push(DoctorCheck::skipped("request_signing", "not used by the mcp role"));
                checks.push(DoctorCheck::skipped("slack_scopes", "not used by the mcp role"));
            }
            checks.push(with_runtime("database_connectivity", check_database_connectivity(&config)));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in ["request_signing", "slack_scopes", "database_connectivity"] {
                checks.push(DoctorCheck::skipped(
                    name,
                    "skipped because configuration did not load",
                ));
            }
        }
    }

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Signs and verifies a fixed request with the configured secret.
fn check_request_signing(config: &AppConfig) -> DoctorCheck {
    let verifier = RequestSignatureVerifier::new(config.slack.signing_secret.clone());
    let timestamp = SELF_TEST_UNIX.to_string();

    let outcome = verifier.sign(&timestamp, SELF_TEST_BODY).and_then(|signature| {
        verifier.verify_at(&timestamp, SELF_TEST_BODY, &signature, SELF_TEST_UNIX)
    });
    match outcome {
        Ok(()) => DoctorCheck::pass("request_signing", "signing secret round-trips a v0 signature"),
        Err(error) => DoctorCheck::fail("request_signing", error.to_string()),
    }
}

fn with_runtime(
    name: &'static str,
    check: impl std::future::Future<Output = DoctorCheck>,
) -> DoctorCheck {
    match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime.block_on(check),
        Err(error) => DoctorCheck::fail(name, format!("failed to initialize async runtime: {error}")),
    }
}

async fn check_slack_scopes(config: &AppConfig) -> DoctorCheck {
    let client = match SlackWebClient::from_config(&config.slack) {
        Ok(client) => client,
        Err(error) => return DoctorCheck::fail("slack_scopes", error.to_string()),
    };

    match client.auth_test().await {
        Ok(auth) => {
            let missing = missing_scopes(&auth.scopes);
            if missing.is_empty() {
                DoctorCheck::pass(
                    "slack_scopes",
                    format!("bot `{}` holds all {} manifest scopes", auth.user_id, BOT_SCOPES.len()),
                )
            } else {
                DoctorCheck::fail(
                    "slack_scopes",
                    format!("missing scopes (reinstall the app): {}", missing.join(", ")),
                )
            }
        }
        Err(error) => DoctorCheck::fail("slack_scopes", error.to_string()),
    }
}

async fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let pool = match connect_from_config(&config.database).await {
        Ok(pool) => pool,
        Err(error) => {
            return DoctorCheck::fail(
                "database_connectivity",
                format!("failed to connect to database: {error}"),
            );
        }
    };
    let pinged = ping(&pool).await;
    pool.close().await;

    match pinged {
        Ok(()) => DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        ),
        Err(error) => {
            DoctorCheck::fail("database_connectivity", format!("database ping failed: {error}"))
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
