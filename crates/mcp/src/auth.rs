//! API key authentication and per-key rate limiting for bridge requests.

use std::time::Duration;

use axum::http::{header, HeaderMap};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use goosebot_core::config::McpConfig;
use goosebot_core::throttle::{SlidingWindow, ThrottleDecision};

#[derive(Debug)]
pub struct ApiKeyEntry {
    pub key: SecretString,
    pub name: String,
    pub active: bool,
    window: SlidingWindow,
}

impl ApiKeyEntry {
    pub fn new(key: SecretString, name: impl Into<String>, requests_per_minute: u32) -> Self {
        Self {
            key,
            name: name.into(),
            active: true,
            window: SlidingWindow::per_minute(requests_per_minute),
        }
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.window.limit()
    }
}

/// One entry of the `GOOSEBOT_MCP_API_KEYS` JSON array.
#[derive(Deserialize)]
pub struct ApiKeyConfig {
    pub key: String,
    pub name: String,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

fn default_requests_per_minute() -> u32 {
    60
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthResult {
    Allowed { key_name: String, remaining_requests: u32 },
    Denied { reason: String, retry_after: Option<Duration> },
}

impl AuthResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthResult::Allowed { .. })
    }

    pub fn denial_reason(&self) -> Option<&str> {
        match self {
            AuthResult::Denied { reason, .. } => Some(reason),
            AuthResult::Allowed { .. } => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AuthResult::Denied { retry_after, .. } => *retry_after,
            AuthResult::Allowed { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct AuthManager {
    keys: Vec<ApiKeyEntry>,
}

impl AuthManager {
    pub fn no_auth() -> Self {
        Self::default()
    }

    pub fn with_keys(keys: Vec<ApiKeyEntry>) -> Self {
        Self { keys }
    }

    pub fn from_key_configs(configs: Vec<ApiKeyConfig>) -> Self {
        Self::with_keys(
            configs
                .into_iter()
                .map(|config| {
                    ApiKeyEntry::new(config.key.into(), config.name, config.requests_per_minute)
                })
                .collect(),
        )
    }

    /// A single `default` key when `mcp.api_key` is set, otherwise open access.
    pub fn from_config(config: &McpConfig) -> Self {
        match &config.api_key {
            Some(key) if !key.expose_secret().is_empty() => Self::with_keys(vec![ApiKeyEntry::new(
                key.clone(),
                "default",
                config.requests_per_minute,
            )]),
            _ => Self::no_auth(),
        }
    }

    pub fn is_auth_required(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn validate_request(&self, api_key: Option<&str>) -> AuthResult {
        if !self.is_auth_required() {
            return AuthResult::Allowed {
                key_name: "anonymous".to_string(),
                remaining_requests: u32::MAX,
            };
        }

        let Some(presented) = api_key else {
            return denied("API key required");
        };
        let Some(entry) = self.keys.iter().find(|entry| entry.key.expose_secret() == presented)
        else {
            return denied("Invalid API key");
        };
        if !entry.active {
            return denied("API key deactivated");
        }

        match entry.window.check(&entry.name) {
            ThrottleDecision::Allowed { remaining } => {
                debug!(key_name = %entry.name, remaining, "bridge request allowed");
                AuthResult::Allowed { key_name: entry.name.clone(), remaining_requests: remaining }
            }
            ThrottleDecision::Limited { retry_after } => {
                warn!(key_name = %entry.name, limit = entry.window.limit(), "bridge rate limit exceeded");
                AuthResult::Denied {
                    reason: "Rate limit exceeded".to_string(),
                    retry_after: Some(retry_after),
                }
            }
        }
    }
}

fn denied(reason: &str) -> AuthResult {
    AuthResult::Denied { reason: reason.to_string(), retry_after: None }
}

/// Reads `x-api-key`, falling back to `Authorization: Bearer <key>`.
pub fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get("x-api-key").and_then(|value| value.to_str().ok()) {
        return Some(key.trim());
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}
