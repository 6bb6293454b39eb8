//! Slack app manifest for the bot: the scopes, events and features an installation must grant.

use serde::Serialize;

pub const APP_NAME: &str = "Goose Query Expert";
pub const SLASH_COMMAND: &str = "/goose-query";

pub const BOT_SCOPES: [&str; 15] = [
    "app_mentions:read",
    "channels:history",
    "channels:read",
    "chat:write",
    "chat:write.public",
    "commands",
    "files:write",
    "groups:history",
    "groups:read",
    "im:history",
    "im:read",
    "im:write",
    "mpim:history",
    "reactions:write",
    "users:read",
];

pub const BOT_EVENTS: [&str; 5] =
    ["app_mention", "message.channels", "message.groups", "message.im", "message.mpim"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AppManifest {
    pub display_information: DisplayInformation,
    pub features: Features,
    pub oauth_config: OauthConfig,
    pub settings: Settings,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DisplayInformation {
    pub name: String,
    pub description: String,
    pub background_color: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Features {
    pub bot_user: BotUser,
    pub slash_commands: Vec<SlashCommand>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BotUser {
    pub display_name: String,
    pub always_online: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SlashCommand {
    pub command: String,
    pub description: String,
    pub usage_hint: String,
    pub should_escape: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OauthConfig {
    pub scopes: Scopes,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Scopes {
    pub bot: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub event_subscriptions: EventSubscriptions,
    pub interactivity: Interactivity,
    pub org_deploy_enabled: bool,
    pub socket_mode_enabled: bool,
    pub token_rotation_enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EventSubscriptions {
    pub bot_events: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Interactivity {
    pub is_enabled: bool,
}

impl AppManifest {
    pub fn goosebot() -> Self {
        Self {
            display_information: DisplayInformation {
                name: APP_NAME.to_string(),
                description: "Ask data questions in plain English and get SQL-backed answers"
                    .to_string(),
                background_color: "#2c2d30".to_string(),
            },
            features: Features {
                bot_user: BotUser { display_name: "goose".to_string(), always_online: true },
                slash_commands: vec![SlashCommand {
                    command: SLASH_COMMAND.to_string(),
                    description: "Ask the Query Expert a data question".to_string(),
                    usage_hint: "What was our revenue last month?".to_string(),
                    should_escape: false,
                }],
            },
            oauth_config: OauthConfig {
                scopes: Scopes { bot: BOT_SCOPES.iter().map(|s| s.to_string()).collect() },
            },
            settings: Settings {
                event_subscriptions: EventSubscriptions {
                    bot_events: BOT_EVENTS.iter().map(|s| s.to_string()).collect(),
                },
                interactivity: Interactivity { is_enabled: true },
                org_deploy_enabled: false,
                socket_mode_enabled: true,
                token_rotation_enabled: false,
            },
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Splits an `x-oauth-scopes` header value into scope names.
pub fn parse_scope_header(header: &str) -> Vec<String> {
    header
        .split(',')
        .map(str::trim)
        .filter(|scope| !scope.is_empty())
        .map(str::to_string)
        .collect()
}

/// Required bot scopes absent from `granted`, in manifest order.
pub fn missing_scopes<S: AsRef<str>>(granted: &[S]) -> Vec<&'static str> {
    BOT_SCOPES
        .iter()
        .copied()
        .filter(|required| !granted.iter().any(|scope| scope.as_ref() == *required))
        .collect()
}
