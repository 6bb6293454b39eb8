use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::process::{ProcessRole, UnknownRole};

pub const DEFAULT_CONFIG_FILE: &str = "goosebot.toml";
pub const NESTED_CONFIG_FILE: &str = "config/goosebot.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub app: AppSection,
    pub database: DatabaseConfig,
    pub slack: SlackConfig,
    pub expert: ExpertConfig,
    pub bot: BotConfig,
    pub mcp: McpConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct AppSection {
    pub role: ProcessRole,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub app_token: SecretString,
    pub bot_token: SecretString,
    pub signing_secret: SecretString,
    pub admin_channel: Option<String>,
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub socket_idle_timeout_secs: u64,
    pub reconnect: ReconnectConfig,
}

/// Socket Mode reconnect backoff; the runner gives up after `max_retries` consecutive failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ExpertConfig {
    pub mcp_url: String,
    pub timeout_secs: u64,
    pub max_concurrent_queries: usize,
    pub mock_mode: bool,
    pub mock_delay_ms: u64,
    pub warehouse: Option<String>,
}

#[derive(Clone, Debug)]
pub struct BotConfig {
    pub max_inline_rows: usize,
    pub max_result_rows: usize,
    pub rate_limit_per_user_per_minute: u32,
    pub rate_limit_global_per_minute: u32,
    pub enable_interactive_buttons: bool,
    pub enable_file_uploads: bool,
    pub allow_unmapped_users: bool,
    pub session_idle_hours: u32,
}

#[derive(Clone, Debug)]
pub struct McpConfig {
    pub mock_mode: bool,
    pub api_key: Option<SecretString>,
    pub requests_per_minute: u32,
    pub mode_label: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub app_role: Option<ProcessRole>,
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub slack_app_token: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_signing_secret: Option<String>,
    pub expert_mcp_url: Option<String>,
    pub expert_mock_mode: Option<bool>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection { role: ProcessRole::Slackbot },
            database: DatabaseConfig {
                url: "sqlite://goosebot.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            slack: SlackConfig {
                app_token: String::new().into(),
                bot_token: String::new().into(),
                signing_secret: String::new().into(),
                admin_channel: None,
                api_base_url: "https://slack.com/api".to_string(),
                request_timeout_secs: 30,
                socket_idle_timeout_secs: 60,
                reconnect: ReconnectConfig {
                    max_retries: 10,
                    base_delay_ms: 500,
                    max_delay_ms: 30_000,
                },
            },
            expert: ExpertConfig {
                mcp_url: "http://localhost:8000".to_string(),
                timeout_secs: 300,
                max_concurrent_queries: 10,
                mock_mode: false,
                mock_delay_ms: 2_000,
                warehouse: Some("COMPUTE_WH".to_string()),
            },
            bot: BotConfig {
                max_inline_rows: 10,
                max_result_rows: 10_000,
                rate_limit_per_user_per_minute: 10,
                rate_limit_global_per_minute: 100,
                enable_interactive_buttons: true,
                enable_file_uploads: true,
                allow_unmapped_users: false,
                session_idle_hours: 24,
            },
            mcp: McpConfig {
                mock_mode: true,
                api_key: None,
                requests_per_minute: 60,
                mode_label: "heroku".to_string(),
            },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.trim().to_string().into()
}

impl From<UnknownRole> for ConfigError {
    fn from(value: UnknownRole) -> Self {
        Self::Validation(value.to_string())
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides(options.overrides.app_role.is_some())?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(app) = patch.app {
            if let Some(role) = app.role {
                self.app.role = role.parse()?;
            }
        }

        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(slack) = patch.slack {
            if let Some(app_token) = slack.app_token {
                self.slack.app_token = secret_value(app_token);
            }
            if let Some(bot_token) = slack.bot_token {
                self.slack.bot_token = secret_value(bot_token);
            }
            if let Some(signing_secret) = slack.signing_secret {
                self.slack.signing_secret = secret_value(signing_secret);
            }
            if let Some(admin_channel) = slack.admin_channel {
                self.slack.admin_channel = Some(admin_channel);
            }
            if let Some(api_base_url) = slack.api_base_url {
                self.slack.api_base_url = api_base_url;
            }
            if let Some(timeout_secs) = slack.request_timeout_secs {
                self.slack.request_timeout_secs = timeout_secs;
            }
            if let Some(timeout_secs) = slack.socket_idle_timeout_secs {
                self.slack.socket_idle_timeout_secs = timeout_secs;
            }
            if let Some(reconnect) = slack.reconnect {
                if let Some(max_retries) = reconnect.max_retries {
                    self.slack.reconnect.max_retries = max_retries;
                }
                if let Some(base_delay_ms) = reconnect.base_delay_ms {
                    self.slack.reconnect.base_delay_ms = base_delay_ms;
                }
                if let Some(max_delay_ms) = reconnect.max_delay_ms {
                    self.slack.reconnect.max_delay_ms = max_delay_ms;
                }
            }
        }

        if let Some(expert) = patch.expert {
            if let Some(mcp_url) = expert.mcp_url {
                self.expert.mcp_url = mcp_url;
            }
            if let Some(timeout_secs) = expert.timeout_secs {
                self.expert.timeout_secs = timeout_secs;
            }
            if let Some(max_concurrent_queries) = expert.max_concurrent_queries {
                self.expert.max_concurrent_queries = max_concurrent_queries;
            }
            if let Some(mock_mode) = expert.mock_mode {
                self.expert.mock_mode = mock_mode;
            }
            if let Some(mock_delay_ms) = expert.mock_delay_ms {
                self.expert.mock_delay_ms = mock_delay_ms;
            }
            if let Some(warehouse) = expert.warehouse {
                self.expert.warehouse = Some(warehouse);
            }
        }

        if let Some(bot) = patch.bot {
            if let Some(max_inline_rows) = bot.max_inline_rows {
                self.bot.max_inline_rows = max_inline_rows;
            }
            if let Some(max_result_rows) = bot.max_result_rows {
                self.bot.max_result_rows = max_result_rows;
            }
            if let Some(limit) = bot.rate_limit_per_user_per_minute {
                self.bot.rate_limit_per_user_per_minute = limit;
            }
            if let Some(limit) = bot.rate_limit_global_per_minute {
                self.bot.rate_limit_global_per_minute = limit;
            }
            if let Some(enabled) = bot.enable_interactive_buttons {
                self.bot.enable_interactive_buttons = enabled;
            }
            if let Some(enabled) = bot.enable_file_uploads {
                self.bot.enable_file_uploads = enabled;
            }
            if let Some(allow) = bot.allow_unmapped_users {
                self.bot.allow_unmapped_users = allow;
            }
            if let Some(hours) = bot.session_idle_hours {
                self.bot.session_idle_hours = hours;
            }
        }

        if let Some(mcp) = patch.mcp {
            if let Some(mock_mode) = mcp.mock_mode {
                self.mcp.mock_mode = mock_mode;
            }
            if let Some(api_key) = mcp.api_key {
                self.mcp.api_key = Some(secret_value(api_key));
            }
            if let Some(requests_per_minute) = mcp.requests_per_minute {
                self.mcp.requests_per_minute = requests_per_minute;
            }
            if let Some(mode_label) = mcp.mode_label {
                self.mcp.mode_label = mode_label;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    /// An explicit role override makes the role variables irrelevant, so they are not parsed.
    fn apply_env_overrides(&mut self, role_overridden: bool) -> Result<(), ConfigError> {
        if !role_overridden {
            if let Some((_, value)) = read_env_any(&["GOOSEBOT_APP_ROLE", "APP_TYPE"]) {
                self.app.role = value.parse()?;
            }
        }

        if let Some(value) = read_env("GOOSEBOT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("GOOSEBOT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("GOOSEBOT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("GOOSEBOT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("GOOSEBOT_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some((_, value)) = read_env_any(&["GOOSEBOT_SLACK_APP_TOKEN", "SLACK_APP_TOKEN"]) {
            self.slack.app_token = secret_value(value);
        }
        if let Some((_, value)) = read_env_any(&["GOOSEBOT_SLACK_BOT_TOKEN", "SLACK_BOT_TOKEN"]) {
            self.slack.bot_token = secret_value(value);
        }
        if let Some((_, value)) =
            read_env_any(&["GOOSEBOT_SLACK_SIGNING_SECRET", "SLACK_SIGNING_SECRET"])
        {
            self.slack.signing_secret = secret_value(value);
        }
        if let Some((_, value)) =
            read_env_any(&["GOOSEBOT_SLACK_ADMIN_CHANNEL", "SLACK_ADMIN_CHANNEL"])
        {
            self.slack.admin_channel = Some(value);
        }
        if let Some(value) = read_env("GOOSEBOT_SLACK_API_BASE_URL") {
            self.slack.api_base_url = value;
        }
        if let Some(value) = read_env("GOOSEBOT_SLACK_REQUEST_TIMEOUT_SECS") {
            self.slack.request_timeout_secs =
                parse_u64("GOOSEBOT_SLACK_REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("GOOSEBOT_SLACK_SOCKET_IDLE_TIMEOUT_SECS") {
            self.slack.socket_idle_timeout_secs =
                parse_u64("GOOSEBOT_SLACK_SOCKET_IDLE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("GOOSEBOT_SLACK_RECONNECT_MAX_RETRIES") {
            self.slack.reconnect.max_retries =
                parse_u32("GOOSEBOT_SLACK_RECONNECT_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("GOOSEBOT_SLACK_RECONNECT_BASE_DELAY_MS") {
            self.slack.reconnect.base_delay_ms =
                parse_u64("GOOSEBOT_SLACK_RECONNECT_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("GOOSEBOT_SLACK_RECONNECT_MAX_DELAY_MS") {
            self.slack.reconnect.max_delay_ms =
                parse_u64("GOOSEBOT_SLACK_RECONNECT_MAX_DELAY_MS", &value)?;
        }

        if let Some((_, value)) =
            read_env_any(&["GOOSEBOT_EXPERT_MCP_URL", "GOOSE_MCP_SERVER_URL"])
        {
            self.expert.mcp_url = value;
        }
        if let Some((key, value)) =
            read_env_any(&["GOOSEBOT_EXPERT_TIMEOUT_SECS", "GOOSE_MCP_TIMEOUT"])
        {
            self.expert.timeout_secs = parse_u64(key, &value)?;
        }
        if let Some((key, value)) = read_env_any(&[
            "GOOSEBOT_EXPERT_MAX_CONCURRENT_QUERIES",
            "GOOSE_MAX_CONCURRENT_QUERIES",
        ]) {
            self.expert.max_concurrent_queries = parse_usize(key, &value)?;
        }
        if let Some((key, value)) = read_env_any(&["GOOSEBOT_EXPERT_MOCK_MODE", "MOCK_MODE"]) {
            self.expert.mock_mode = parse_bool(key, &value)?;
        }
        if let Some(value) = read_env("GOOSEBOT_EXPERT_MOCK_DELAY_MS") {
            self.expert.mock_delay_ms = parse_u64("GOOSEBOT_EXPERT_MOCK_DELAY_MS", &value)?;
        }
        if let Some((_, value)) =
            read_env_any(&["GOOSEBOT_EXPERT_WAREHOUSE", "SNOWFLAKE_WAREHOUSE"])
        {
            self.expert.warehouse = Some(value);
        }

        if let Some(value) = read_env("GOOSEBOT_BOT_MAX_INLINE_ROWS") {
            self.bot.max_inline_rows = parse_usize("GOOSEBOT_BOT_MAX_INLINE_ROWS", &value)?;
        }
        if let Some(value) = read_env("GOOSEBOT_BOT_MAX_RESULT_ROWS") {
            self.bot.max_result_rows = parse_usize("GOOSEBOT_BOT_MAX_RESULT_ROWS", &value)?;
        }
        if let Some(value) = read_env("GOOSEBOT_BOT_RATE_LIMIT_PER_USER_PER_MINUTE") {
            self.bot.rate_limit_per_user_per_minute =
                parse_u32("GOOSEBOT_BOT_RATE_LIMIT_PER_USER_PER_MINUTE", &value)?;
        }
        if let Some(value) = read_env("GOOSEBOT_BOT_RATE_LIMIT_GLOBAL_PER_MINUTE") {
            self.bot.rate_limit_global_per_minute =
                parse_u32("GOOSEBOT_BOT_RATE_LIMIT_GLOBAL_PER_MINUTE", &value)?;
        }
        if let Some(value) = read_env("GOOSEBOT_BOT_ENABLE_INTERACTIVE_BUTTONS") {
            self.bot.enable_interactive_buttons =
                parse_bool("GOOSEBOT_BOT_ENABLE_INTERACTIVE_BUTTONS", &value)?;
        }
        if let Some(value) = read_env("GOOSEBOT_BOT_ENABLE_FILE_UPLOADS") {
            self.bot.enable_file_uploads = parse_bool("GOOSEBOT_BOT_ENABLE_FILE_UPLOADS", &value)?;
        }
        if let Some(value) = read_env("GOOSEBOT_BOT_ALLOW_UNMAPPED_USERS") {
            self.bot.allow_unmapped_users =
                parse_bool("GOOSEBOT_BOT_ALLOW_UNMAPPED_USERS", &value)?;
        }
        if let Some(value) = read_env("GOOSEBOT_BOT_SESSION_IDLE_HOURS") {
            self.bot.session_idle_hours = parse_u32("GOOSEBOT_BOT_SESSION_IDLE_HOURS", &value)?;
        }

        if let Some(value) = read_env("GOOSEBOT_MCP_MOCK_MODE") {
            self.mcp.mock_mode = parse_bool("GOOSEBOT_MCP_MOCK_MODE", &value)?;
        }
        if let Some((_, value)) = read_env_any(&["GOOSEBOT_MCP_API_KEY", "MCP_API_KEY"]) {
            self.mcp.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("GOOSEBOT_MCP_REQUESTS_PER_MINUTE") {
            self.mcp.requests_per_minute = parse_u32("GOOSEBOT_MCP_REQUESTS_PER_MINUTE", &value)?;
        }
        if let Some((_, value)) = read_env_any(&["GOOSEBOT_MCP_MODE_LABEL", "MODE"]) {
            self.mcp.mode_label = value;
        }

        if let Some(value) = read_env("GOOSEBOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some((key, value)) = read_env_any(&["GOOSEBOT_SERVER_PORT", "PORT"]) {
            self.server.port = parse_u16(key, &value)?;
        }
        if let Some(value) = read_env("GOOSEBOT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("GOOSEBOT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env_any(&["GOOSEBOT_LOGGING_LEVEL", "GOOSEBOT_LOG_LEVEL", "LOG_LEVEL"]);
        if let Some((_, value)) = log_level {
            self.logging.level = value.to_ascii_lowercase();
        }
        let log_format =
            read_env_any(&["GOOSEBOT_LOGGING_FORMAT", "GOOSEBOT_LOG_FORMAT", "LOG_FORMAT"]);
        if let Some((_, value)) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(role) = overrides.app_role {
            self.app.role = role;
        }
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(slack_app_token) = overrides.slack_app_token {
            self.slack.app_token = secret_value(slack_app_token);
        }
        if let Some(slack_bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = secret_value(slack_bot_token);
        }
        if let Some(signing_secret) = overrides.slack_signing_secret {
            self.slack.signing_secret = secret_value(signing_secret);
        }
        if let Some(mcp_url) = overrides.expert_mcp_url {
            self.expert.mcp_url = mcp_url;
        }
        if let Some(mock_mode) = overrides.expert_mock_mode {
            self.expert.mock_mode = mock_mode;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        match self.app.role {
            ProcessRole::Slackbot => {
                validate_slack(&self.slack)?;
                validate_expert(&self.expert)?;
                validate_bot(&self.bot)?;
            }
            ProcessRole::Mcp => validate_mcp(&self.mcp)?,
        }
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from(NESTED_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let bot_token = slack.bot_token.expose_secret();
    if bot_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.bot_token is required (SLACK_BOT_TOKEN). Get it from https://api.slack.com/apps > Your App > OAuth & Permissions > Bot User OAuth Token".to_string()
        ));
    }
    if !bot_token.starts_with("xoxb-") {
        let hint = if bot_token.starts_with("xapp-") {
            " (hint: you may have used the app token instead of the bot token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.bot_token must start with `xoxb-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    let app_token = slack.app_token.expose_secret();
    if app_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.app_token is required (SLACK_APP_TOKEN). Get it from https://api.slack.com/apps > Your App > Basic Information > App-Level Tokens with the `connections:write` scope".to_string()
        ));
    }
    if !app_token.starts_with("xapp-") {
        let hint = if app_token.starts_with("xoxb-") {
            " (hint: you may have used the bot token instead of the app token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.app_token must start with `xapp-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    if slack.signing_secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "slack.signing_secret is required (SLACK_SIGNING_SECRET). Get it from https://api.slack.com/apps > Your App > Basic Information > App Credentials".to_string()
        ));
    }

    if let Some(channel) = &slack.admin_channel {
        if channel.trim().is_empty() {
            return Err(ConfigError::Validation(
                "slack.admin_channel must not be blank when set".to_string(),
            ));
        }
    }

    if !is_http_url(&slack.api_base_url) {
        return Err(ConfigError::Validation(
            "slack.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    if slack.request_timeout_secs == 0 || slack.request_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "slack.request_timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if slack.socket_idle_timeout_secs == 0 || slack.socket_idle_timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "slack.socket_idle_timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    validate_reconnect(&slack.reconnect)
}

fn validate_reconnect(reconnect: &ReconnectConfig) -> Result<(), ConfigError> {
    if reconnect.max_delay_ms > 300_000 {
        return Err(ConfigError::Validation(
            "slack.reconnect.max_delay_ms must not exceed 300000".to_string(),
        ));
    }
    if reconnect.base_delay_ms > reconnect.max_delay_ms {
        return Err(ConfigError::Validation(
            "slack.reconnect.base_delay_ms must not exceed slack.reconnect.max_delay_ms"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_expert(expert: &ExpertConfig) -> Result<(), ConfigError> {
    if !expert.mock_mode && !is_http_url(&expert.mcp_url) {
        return Err(ConfigError::Validation(
            "expert.mcp_url must start with http:// or https://".to_string(),
        ));
    }

    if expert.timeout_secs == 0 || expert.timeout_secs > 900 {
        return Err(ConfigError::Validation(
            "expert.timeout_secs must be in range 1..=900".to_string(),
        ));
    }

    if expert.max_concurrent_queries == 0 {
        return Err(ConfigError::Validation(
            "expert.max_concurrent_queries must be greater than zero".to_string(),
        ));
    }

    if expert.mock_delay_ms > 60_000 {
        return Err(ConfigError::Validation(
            "expert.mock_delay_ms must not exceed 60000".to_string(),
        ));
    }

    Ok(())
}

fn validate_bot(bot: &BotConfig) -> Result<(), ConfigError> {
    if bot.max_inline_rows == 0 {
        return Err(ConfigError::Validation(
            "bot.max_inline_rows must be greater than zero".to_string(),
        ));
    }

    if bot.max_inline_rows > bot.max_result_rows {
        return Err(ConfigError::Validation(
            "bot.max_inline_rows must not exceed bot.max_result_rows".to_string(),
        ));
    }

    if bot.rate_limit_per_user_per_minute == 0 || bot.rate_limit_global_per_minute == 0 {
        return Err(ConfigError::Validation(
            "bot rate limits must be greater than zero".to_string(),
        ));
    }

    if bot.rate_limit_per_user_per_minute > bot.rate_limit_global_per_minute {
        return Err(ConfigError::Validation(
            "bot.rate_limit_per_user_per_minute must not exceed bot.rate_limit_global_per_minute"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_mcp(mcp: &McpConfig) -> Result<(), ConfigError> {
    if mcp.requests_per_minute == 0 {
        return Err(ConfigError::Validation(
            "mcp.requests_per_minute must be greater than zero".to_string(),
        ));
    }

    if let Some(api_key) = &mcp.api_key {
        if api_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "mcp.api_key must not be blank when set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// First non-blank variable among `keys`, with the name that supplied it.
fn read_env_any<'a>(keys: &[&'a str]) -> Option<(&'a str, String)> {
    keys.iter().find_map(|key| read_env(key).map(|value| (*key, value)))
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| invalid(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    app: Option<AppPatch>,
    database: Option<DatabasePatch>,
    slack: Option<SlackPatch>,
    expert: Option<ExpertPatch>,
    bot: Option<BotPatch>,
    mcp: Option<McpPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct AppPatch {
    role: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    app_token: Option<String>,
    bot_token: Option<String>,
    signing_secret: Option<String>,
    admin_channel: Option<String>,
    api_base_url: Option<String>,
    request_timeout_secs: Option<u64>,
    socket_idle_timeout_secs: Option<u64>,
    reconnect: Option<ReconnectPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ReconnectPatch {
    max_retries: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ExpertPatch {
    mcp_url: Option<String>,
    timeout_secs: Option<u64>,
    max_concurrent_queries: Option<usize>,
    mock_mode: Option<bool>,
    mock_delay_ms: Option<u64>,
    warehouse: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BotPatch {
    max_inline_rows: Option<usize>,
    max_result_rows: Option<usize>,
    rate_limit_per_user_per_minute: Option<u32>,
    rate_limit_global_per_minute: Option<u32>,
    enable_interactive_buttons: Option<bool>,
    enable_file_uploads: Option<bool>,
    allow_unmapped_users: Option<bool>,
    session_idle_hours: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct McpPatch {
    mock_mode: Option<bool>,
    api_key: Option<String>,
    requests_per_minute: Option<u32>,
    mode_label: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
