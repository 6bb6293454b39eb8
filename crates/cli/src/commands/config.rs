use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use goosebot_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_FILE, NESTED_CONFIG_FILE};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

fn field(key: &'static str, value: impl ToString, env_keys: &'static [&'static str]) -> Field {
    Field { key, value: value.to_string(), env_keys }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    vec![
        field("app.role", config.app.role, &["GOOSEBOT_APP_ROLE", "APP_TYPE"]),
        field("database.url", &config.database.url, &["GOOSEBOT_DATABASE_URL"]),
        field(
            "database.max_connections",
            config.database.max_connections,
            &["GOOSEBOT_DATABASE_MAX_CONNECTIONS"],
        ),
        field(
            "database.timeout_secs",
            config.database.timeout_secs,
            &["GOOSEBOT_DATABASE_TIMEOUT_SECS"],
        ),
        field(
            "slack.app_token",
            redact_token(config.slack.app_token.expose_secret()),
            &["GOOSEBOT_SLACK_APP_TOKEN", "SLACK_APP_TOKEN"],
        ),
        field(
            "slack.bot_token",
            redact_token(config.slack.bot_token.expose_secret()),
            &["GOOSEBOT_SLACK_BOT_TOKEN", "SLACK_BOT_TOKEN"],
        ),
        field(
            "slack.signing_secret",
            redact_secret(Some(&config.slack.signing_secret)),
            &["GOOSEBOT_SLACK_SIGNING_SECRET", "SLACK_SIGNING_SECRET"],
        ),
        field(
            "slack.admin_channel",
            config.slack.admin_channel.as_deref().unwrap_or("<unset>"),
            &["GOOSEBOT_SLACK_ADMIN_CHANNEL", "SLACK_ADMIN_CHANNEL"],
        ),
        field("slack.api_base_url", &config.slack.api_base_url, &["GOOSEBOT_SLACK_API_BASE_URL"]),
        field(
            "slack.request_timeout_secs",
            config.slack.request_timeout_secs,
            &["GOOSEBOT_SLACK_REQUEST_TIMEOUT_SECS"],
        ),
        field(
            "slack.socket_idle_timeout_secs",
            config.slack.socket_idle_timeout_secs,
            &["GOOSEBOT_SLACK_SOCKET_IDLE_TIMEOUT_SECS"],
        ),
        field(
            "slack.reconnect.max_retries",
            config.slack.reconnect.max_retries,
            &["GOOSEBOT_SLACK_RECONNECT_MAX_RETRIES"],
        ),
        field(
            "slack.reconnect.base_delay_ms",
            config.slack.reconnect.base_delay_ms,
            &["GOOSEBOT_SLACK_RECONNECT_BASE_DELAY_MS"],
        ),
        field(
            "slack.reconnect.max_delay_ms",
            config.slack.reconnect.max_delay_ms,
            &["GOOSEBOT_SLACK_RECONNECT_MAX_DELAY_MS"],
        ),
        field(
            "expert.mcp_url",
            &config.expert.mcp_url,
            &["GOOSEBOT_EXPERT_MCP_URL", "GOOSE_MCP_SERVER_URL"],
        ),
        field(
            "expert.timeout_secs",
            config.expert.timeout_secs,
            &["GOOSEBOT_EXPERT_TIMEOUT_SECS", "GOOSE_MCP_TIMEOUT"],
        ),
        field(
            "expert.max_concurrent_queries",
            config.expert.max_concurrent_queries,
            &["GOOSEBOT_EXPERT_MAX_CONCURRENT_QUERIES"],
        ),
        field("expert.mock_mode", config.expert.mock_mode, &["GOOSEBOT_EXPERT_MOCK_MODE", "MOCK_MODE"]),
        field(
            "expert.warehouse",
            config.expert.warehouse.as_deref().unwrap_or("<unset>"),
            &["GOOSEBOT_EXPERT_WAREHOUSE", "SNOWFLAKE_WAREHOUSE"],
        ),
        field("bot.max_inline_rows", config.bot.max_inline_rows, &["GOOSEBOT_BOT_MAX_INLINE_ROWS"]),
        field(
            "bot.rate_limit_per_user_per_minute",
            config.bot.rate_limit_per_user_per_minute,
            &["GOOSEBOT_BOT_RATE_LIMIT_PER_USER_PER_MINUTE"],
        ),
        field(
            "bot.allow_unmapped_users",
            config.bot.allow_unmapped_users,
            &["GOOSEBOT_BOT_ALLOW_UNMAPPED_USERS"],
        ),
        field("mcp.mock_mode", config.mcp.mock_mode, &["GOOSEBOT_MCP_MOCK_MODE"]),
        field(
            "mcp.api_key",
            redact_secret(config.mcp.api_key.as_ref()),
            &["GOOSEBOT_MCP_API_KEY", "MCP_API_KEY"],
        ),
        field(
            "mcp.requests_per_minute",
            config.mcp.requests_per_minute,
            &["GOOSEBOT_MCP_REQUESTS_PER_MINUTE"],
        ),
        field("server.bind_address", &config.server.bind_address, &["GOOSEBOT_SERVER_BIND_ADDRESS"]),
        field("server.port", config.server.port, &["GOOSEBOT_SERVER_PORT", "PORT"]),
        field(
            "logging.level",
            &config.logging.level,
            &["GOOSEBOT_LOGGING_LEVEL", "GOOSEBOT_LOG_LEVEL", "LOG_LEVEL"],
        ),
        field(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["GOOSEBOT_LOGGING_FORMAT", "GOOSEBOT_LOG_FORMAT", "LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from(NESTED_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: Option<&SecretString>) -> &'static str {
    match secret {
        Some(secret) if !secret.expose_secret().trim().is_empty() => "<redacted>",
        _ => "<unset>",
    }
}

/// Keeps the Slack token family prefix (`xoxb`, `xapp`) and hides the rest.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{redact_secret, redact_token};

    #[test]
    fn tokens_keep_only_their_family_prefix() {
        assert_eq!(redact_token("xoxb-123-abc"), "xoxb-***");
        assert_eq!(redact_token("  "), "<empty>");
        assert_eq!(redact_token("opaque"), "<redacted>");
    }

    #[test]
    fn blank_secrets_read_as_unset() {
        let blank = SecretString::from(String::new());
        let real = SecretString::from("shh".to_string());
        assert_eq!(redact_secret(None), "<unset>");
        assert_eq!(redact_secret(Some(&blank)), "<unset>");
        assert_eq!(redact_secret(Some(&real)), "<redacted>");
    }
}
