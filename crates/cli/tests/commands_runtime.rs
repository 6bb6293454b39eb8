use std::env;
use std::fs;
use std::sync::{Mutex, OnceLock};

use goosebot_cli::commands::{config, doctor, manifest, migrate, procfile, start, user};
use serde_json::Value;

const SLACKBOT_ENV: &[(&str, &str)] = &[
    ("GOOSEBOT_SLACK_APP_TOKEN", "xapp-test"),
    ("GOOSEBOT_SLACK_BOT_TOKEN", "xoxb-test"),
    ("GOOSEBOT_SLACK_SIGNING_SECRET", "signing-secret"),
    ("GOOSEBOT_DATABASE_URL", "sqlite::memory:"),
    ("GOOSEBOT_EXPERT_MOCK_MODE", "true"),
];

#[test]
fn start_returns_success_with_valid_env() {
    with_env(SLACKBOT_ENV, || {
        let result = start::run();
        assert_eq!(result.exit_code, 0, "expected successful start preflight");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "start");
        assert_eq!(payload["status"], "ok");
        assert!(payload["message"].as_str().unwrap_or_default().contains("`slackbot`"));
    });
}

#[test]
fn start_returns_config_failure_without_tokens() {
    with_env(&[], || {
        let result = start::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "start");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn start_for_the_bridge_role_needs_no_slack_tokens() {
    with_env(&[("GOOSEBOT_APP_ROLE", "mcp"), ("GOOSEBOT_DATABASE_URL", "sqlite::memory:")], || {
        let result = start::run();
        assert_eq!(result.exit_code, 0);
        assert!(parse_payload(&result.output)["message"]
            .as_str()
            .unwrap_or_default()
            .contains("`mcp`"));
    });
}

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(SLACKBOT_ENV, || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn config_redacts_secrets_and_attributes_env_sources() {
    with_env(SLACKBOT_ENV, || {
        let output = config::run();

        assert!(output.contains(
            "- slack.bot_token = xoxb-*** (source: env (GOOSEBOT_SLACK_BOT_TOKEN))"
        ));
        assert!(output.contains("- slack.signing_secret = <redacted>"));
        assert!(output.contains("- expert.mock_mode = true (source: env (GOOSEBOT_EXPERT_MOCK_MODE))"));
        assert!(!output.contains("signing-secret"));
    });
}

#[test]
fn manifest_lists_fifteen_scopes_and_five_events() {
    let result = manifest::run();
    assert_eq!(result.exit_code, 0);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["oauth_config"]["scopes"]["bot"].as_array().map(Vec::len), Some(15));
    assert_eq!(payload["settings"]["event_subscriptions"]["bot_events"].as_array().map(Vec::len), Some(5));
    assert_eq!(payload["settings"]["socket_mode_enabled"], true);
}

#[test]
fn procfile_without_path_prints_the_recommended_layout() {
    let result = procfile::run(None);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.output, "web: goosebot-server\nworker: goosebot-server --role mcp\n");
}

#[test]
fn procfile_validation_resolves_roles_and_rejects_missing_web() {
    let dir = tempfile::tempdir().expect("tempdir");
    let good = dir.path().join("Procfile");
    fs::write(&good, "web: goosebot-server\nworker: goosebot-server --role mcp\n").expect("write");
    let result = procfile::run(Some(&good));
    assert_eq!(result.exit_code, 0);
    let message = parse_payload(&result.output)["message"].as_str().unwrap_or_default().to_string();
    assert!(message.ends_with("web -> slackbot, worker -> mcp"));

    let worker_only = dir.path().join("Procfile.worker");
    fs::write(&worker_only, "worker: goosebot-server --role mcp\n").expect("write");
    let result = procfile::run(Some(&worker_only));
    assert_eq!(result.exit_code, 2);
    assert_eq!(parse_payload(&result.output)["error_class"], "procfile_web");
}

#[test]
fn user_grant_list_and_revoke_share_one_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("goosebot.db").display());
    let mut vars = SLACKBOT_ENV.to_vec();
    vars.retain(|(key, _)| *key != "GOOSEBOT_DATABASE_URL");
    vars.push(("GOOSEBOT_DATABASE_URL", url.as_str()));

    with_env(&vars, || {
        let granted = user::grant("U123", "jane.doe", &["analyst".to_string()], None);
        assert_eq!(granted.exit_code, 0, "{}", granted.output);

        let listed = parse_payload(&user::list().output);
        assert_eq!(listed["message"], "1 active user mappings: U123 -> jane.doe (analyst)");

        let revoked = user::revoke("U123");
        assert_eq!(revoked.exit_code, 0);
        let again = user::revoke("U123");
        assert_eq!(again.exit_code, 6);
        assert_eq!(parse_payload(&again.output)["error_class"], "not_found");

        assert_eq!(parse_payload(&user::list().output)["message"], "no active user mappings");
    });
}

#[test]
fn user_grant_rejects_unknown_roles() {
    with_env(SLACKBOT_ENV, || {
        let result = user::grant("U1", "someone", &["owner".to_string()], None);
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_role");
    });
}

#[test]
fn doctor_skips_slack_checks_for_the_bridge_role() {
    with_env(&[("GOOSEBOT_APP_ROLE", "mcp"), ("GOOSEBOT_DATABASE_URL", "sqlite::memory:")], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 0);

        let report = parse_payload(&result.output);
        assert_eq!(report["overall_status"], "pass");
        assert_eq!(report["checks"][1]["name"], "request_signing");
        assert_eq!(report["checks"][1]["status"], "skipped");
        assert_eq!(report["checks"][3]["status"], "pass");
    });
}

#[test]
fn doctor_fails_when_slack_is_unreachable() {
    let mut vars = SLACKBOT_ENV.to_vec();
    vars.push(("GOOSEBOT_SLACK_API_BASE_URL", "http://127.0.0.1:9/api"));

    with_env(&vars, || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1);

        let report = parse_payload(&result.output);
        assert_eq!(report["overall_status"], "fail");
        assert_eq!(report["checks"][1]["status"], "pass");
        assert_eq!(report["checks"][2]["name"], "slack_scopes");
        assert_eq!(report["checks"][2]["status"], "fail");
    });
}

#[test]
fn doctor_reports_config_failure_and_skips_the_rest() {
    with_env(&[], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 1);
        assert!(result.output.starts_with("doctor: one or more readiness checks failed"));
        assert!(result.output.contains("- [skip] database_connectivity"));
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "GOOSEBOT_APP_ROLE",
        "APP_TYPE",
        "GOOSEBOT_DATABASE_URL",
        "GOOSEBOT_SLACK_APP_TOKEN",
        "GOOSEBOT_SLACK_BOT_TOKEN",
        "GOOSEBOT_SLACK_SIGNING_SECRET",
        "GOOSEBOT_SLACK_API_BASE_URL",
        "SLACK_APP_TOKEN",
        "SLACK_BOT_TOKEN",
        "SLACK_SIGNING_SECRET",
        "GOOSEBOT_EXPERT_MOCK_MODE",
        "MOCK_MODE",
        "GOOSEBOT_SERVER_PORT",
        "PORT",
        "GOOSEBOT_LOGGING_LEVEL",
        "GOOSEBOT_LOG_LEVEL",
        "LOG_LEVEL",
        "GOOSEBOT_LOGGING_FORMAT",
        "GOOSEBOT_LOG_FORMAT",
        "LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
