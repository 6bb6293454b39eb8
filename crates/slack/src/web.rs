//! Minimal Slack Web API client: the handful of methods the bot and Socket Mode need.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use goosebot_core::config::SlackConfig;
use goosebot_core::manifest::parse_scope_header;

use crate::blocks::MessageTemplate;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlackApiError {
    #[error("slack request to `{method}` failed: {message}")]
    Transport { method: String, message: String },
    #[error("slack returned HTTP {status} for `{method}`")]
    Http { method: String, status: u16 },
    #[error("slack `{method}` returned error `{error}`")]
    Api { method: String, error: String },
    #[error("could not decode slack `{method}` response: {message}")]
    Decode { method: String, message: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthTest {
    pub user_id: String,
    pub bot_id: Option<String>,
    pub team: Option<String>,
    pub scopes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileUpload {
    pub channel_id: String,
    pub thread_ts: Option<String>,
    pub filename: String,
    pub title: String,
    pub content: String,
}

/// Outbound side of the bot; the web client implements it and tests record through it.
#[async_trait]
pub trait SlackResponder: Send + Sync {
    /// Returns the `ts` of the posted message.
    async fn post_message(
        &self,
        channel_id: &str,
        message: &MessageTemplate,
        thread_ts: Option<&str>,
    ) -> Result<String, SlackApiError>;

    async fn update_message(
        &self,
        channel_id: &str,
        ts: &str,
        message: &MessageTemplate,
    ) -> Result<(), SlackApiError>;

    async fn post_ephemeral(
        &self,
        channel_id: &str,
        user_id: &str,
        message: &MessageTemplate,
    ) -> Result<(), SlackApiError>;

    async fn open_view(&self, trigger_id: &str, view: Value) -> Result<(), SlackApiError>;

    async fn upload_file(&self, upload: FileUpload) -> Result<(), SlackApiError>;
}

#[derive(Deserialize)]
struct Envelope {
    ok: bool,
    error: Option<String>,
    #[serde(flatten)]
    rest: Value,
}

#[derive(Deserialize)]
struct PostedMessage {
    ts: String,
}

#[derive(Deserialize)]
struct ConnectionUrl {
    url: String,
}

#[derive(Deserialize)]
struct AuthTestBody {
    user_id: String,
    bot_id: Option<String>,
    team: Option<String>,
}

#[derive(Deserialize)]
struct UploadTarget {
    upload_url: String,
    file_id: String,
}

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct SlackWebClient {
    http: Client,
    api_base_url: String,
    bot_token: SecretString,
    app_token: SecretString,
}

impl SlackWebClient {
    pub fn new(
        api_base_url: &str,
        bot_token: SecretString,
        app_token: SecretString,
    ) -> Result<Self, SlackApiError> {
        Self::with_request_timeout(api_base_url, bot_token, app_token, DEFAULT_REQUEST_TIMEOUT)
    }

    /// `request_timeout` bounds every call end to end, including file uploads.
    pub fn with_request_timeout(
        api_base_url: &str,
        bot_token: SecretString,
        app_token: SecretString,
        request_timeout: Duration,
    ) -> Result<Self, SlackApiError> {
        let http = Client::builder()
            .connect_timeout(request_timeout.min(Duration::from_secs(10)))
            .timeout(request_timeout)
            .build()
            .map_err(|error| SlackApiError::Transport {
                method: "client.build".into(),
                message: error.to_string(),
            })?;
        Ok(Self {
            http,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            bot_token,
            app_token,
        })
    }

    pub fn from_config(config: &SlackConfig) -> Result<Self, SlackApiError> {
        Self::with_request_timeout(
            &config.api_base_url,
            config.bot_token.clone(),
            config.app_token.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base_url)
    }

    async fn read_envelope<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> Result<T, SlackApiError> {
        let status = response.status();
        if !status.is_success() {
            return Err(SlackApiError::Http { method: method.into(), status: status.as_u16() });
        }
        let envelope: Envelope = response.json().await.map_err(|error| SlackApiError::Decode {
            method: method.into(),
            message: error.to_string(),
        })?;
        if !envelope.ok {
            return Err(SlackApiError::Api {
                method: method.into(),
                error: envelope.error.unwrap_or_else(|| "unknown_error".into()),
            });
        }
        serde_json::from_value(envelope.rest).map_err(|error| SlackApiError::Decode {
            method: method.into(),
            message: error.to_string(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        token: &SecretString,
        body: Value,
    ) -> Result<T, SlackApiError> {
        debug!(event_name = "egress.slack.api_call", method, "calling slack web api");
        let response = self
            .http
            .post(self.url(method))
            .bearer_auth(token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|error| transport(method, error))?;
        Self::read_envelope(method, response).await
    }

    /// `apps.connections.open`: trades the app-level token for a Socket Mode WebSocket URL.
    pub async fn open_socket_url(&self) -> Result<String, SlackApiError> {
        let opened: ConnectionUrl =
            self.call("apps.connections.open", &self.app_token, json!({})).await?;
        Ok(opened.url)
    }

    /// `auth.test` with the bot token, including the granted scopes header.
    pub async fn auth_test(&self) -> Result<AuthTest, SlackApiError> {
        let method = "auth.test";
        let response = self
            .http
            .post(self.url(method))
            .bearer_auth(self.bot_token.expose_secret())
            .send()
            .await
            .map_err(|error| transport(method, error))?;
        let scopes = response
            .headers()
            .get("x-oauth-scopes")
            .and_then(|value| value.to_str().ok())
            .map(parse_scope_header)
            .unwrap_or_default();
        let body: AuthTestBody = Self::read_envelope(method, response).await?;
        Ok(AuthTest { user_id: body.user_id, bot_id: body.bot_id, team: body.team, scopes })
    }
}

fn transport(method: &str, error: reqwest::Error) -> SlackApiError {
    SlackApiError::Transport { method: method.into(), message: error.to_string() }
}

fn message_body(channel_id: &str, message: &MessageTemplate) -> Value {
    let mut body = serde_json::to_value(message).unwrap_or_else(|_| json!({}));
    body["channel"] = Value::String(channel_id.to_string());
    body
}

#[async_trait]
impl SlackResponder for SlackWebClient {
    async fn post_message(
        &self,
        channel_id: &str,
        message: &MessageTemplate,
        thread_ts: Option<&str>,
    ) -> Result<String, SlackApiError> {
        let mut body = message_body(channel_id, message);
        if let Some(thread_ts) = thread_ts {
            body["thread_ts"] = Value::String(thread_ts.to_string());
        }
        let posted: PostedMessage = self.call("chat.postMessage", &self.bot_token, body).await?;
        Ok(posted.ts)
    }

    async fn update_message(
        &self,
        channel_id: &str,
        ts: &str,
        message: &MessageTemplate,
    ) -> Result<(), SlackApiError> {
        let mut body = message_body(channel_id, message);
        body["ts"] = Value::String(ts.to_string());
        if message.blocks.is_empty() {
            body["blocks"] = json!([]);
        }
        let _: Value = self.call("chat.update", &self.bot_token, body).await?;
        Ok(())
    }

    async fn post_ephemeral(
        &self,
        channel_id: &str,
        user_id: &str,
        message: &MessageTemplate,
    ) -> Result<(), SlackApiError> {
        let mut body = message_body(channel_id, message);
        body["user"] = Value::String(user_id.to_string());
        let _: Value = self.call("chat.postEphemeral", &self.bot_token, body).await?;
        Ok(())
    }

    async fn open_view(&self, trigger_id: &str, view: Value) -> Result<(), SlackApiError> {
        let _: Value = self
            .call("views.open", &self.bot_token, json!({"trigger_id": trigger_id, "view": view}))
            .await?;
        Ok(())
    }

    async fn upload_file(&self, upload: FileUpload) -> Result<(), SlackApiError> {
        let method = "files.getUploadURLExternal";
        let response = self
            .http
            .get(self.url(method))
            .bearer_auth(self.bot_token.expose_secret())
            .query(&[
                ("filename", upload.filename.clone()),
                ("length", upload.content.len().to_string()),
            ])
            .send()
            .await
            .map_err(|error| transport(method, error))?;
        let target: UploadTarget = Self::read_envelope(method, response).await?;

        let method = "files.upload";
        let response = self
            .http
            .post(&target.upload_url)
            .body(upload.content.into_bytes())
            .send()
            .await
            .map_err(|error| transport(method, error))?;
        if !response.status().is_success() {
            return Err(SlackApiError::Http {
                method: method.into(),
                status: response.status().as_u16(),
            });
        }

        let mut complete = json!({
            "files": [{"id": target.file_id, "title": upload.title}],
            "channel_id": upload.channel_id,
        });
        if let Some(thread_ts) = upload.thread_ts {
            complete["thread_ts"] = Value::String(thread_ts);
        }
        let _: Value =
            self.call("files.completeUploadExternal", &self.bot_token, complete).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap, HeaderValue};
    use axum::routing::post;
    use axum::{Json, Router};
    use secrecy::SecretString;
    use serde_json::{json, Value};

    use super::{SlackApiError, SlackResponder, SlackWebClient};
    use crate::blocks::MessageTemplate;

    type Seen = Arc<Mutex<Vec<(String, Value)>>>;

    async fn post_message(
        State(seen): State<Seen>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let auth = headers.get("authorization").and_then(|v| v.to_str().ok()).unwrap_or_default();
        seen.lock().expect("seen").push((auth.to_string(), body.clone()));
        if body["channel"] == "C-missing" {
            return Json(json!({"ok": false, "error": "channel_not_found"}));
        }
        Json(json!({"ok": true, "ts": "1730000000.000200", "channel": body["channel"]}))
    }

    async fn auth_test() -> (HeaderMap, Json<Value>) {
        let mut headers = HeaderMap::new();
        headers.insert("x-oauth-scopes", HeaderValue::from_static("chat:write, commands"));
        (headers, Json(json!({"ok": true, "user_id": "UBOT", "team": "Acme"})))
    }

    async fn connections_open(headers: HeaderMap) -> Json<Value> {
        let auth = headers.get("authorization").and_then(|v| v.to_str().ok()).unwrap_or_default();
        Json(json!({"ok": auth == "Bearer xapp-test", "url": "wss://example.test/link"}))
    }

    async fn slow_update() -> Json<Value> {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        Json(json!({"ok": true}))
    }

    async fn spawn(seen: Seen) -> SlackWebClient {
        spawn_with_timeout(seen, std::time::Duration::from_secs(30)).await
    }

    async fn spawn_with_timeout(seen: Seen, timeout: std::time::Duration) -> SlackWebClient {
        let app = Router::new()
            .route("/chat.postMessage", post(post_message))
            .route("/chat.update", post(slow_update))
            .route("/auth.test", post(auth_test))
            .route("/apps.connections.open", post(connections_open))
            .with_state(seen);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        SlackWebClient::with_request_timeout(
            &format!("http://{addr}"),
            SecretString::from("xoxb-test".to_string()),
            SecretString::from("xapp-test".to_string()),
            timeout,
        )
        .expect("client")
    }

    #[tokio::test]
    async fn post_message_sends_bot_token_and_thread() {
        let seen = Seen::default();
        let client = spawn(seen.clone()).await;

        let ts = client
            .post_message("C1", &MessageTemplate::text("hello"), Some("1.1"))
            .await
            .expect("post");

        assert_eq!(ts, "1730000000.000200");
        let seen = seen.lock().expect("seen");
        assert_eq!(seen[0].0, "Bearer xoxb-test");
        assert_eq!(seen[0].1, json!({"channel": "C1", "text": "hello", "thread_ts": "1.1"}));
    }

    #[tokio::test]
    async fn api_errors_are_surfaced() {
        let client = spawn(Seen::default()).await;

        let error = client
            .post_message("C-missing", &MessageTemplate::text("x"), None)
            .await
            .expect_err("should fail");

        assert_eq!(
            error,
            SlackApiError::Api { method: "chat.postMessage".into(), error: "channel_not_found".into() }
        );
    }

    #[tokio::test]
    async fn auth_test_reads_scope_header() {
        let client = spawn(Seen::default()).await;

        let auth = client.auth_test().await.expect("auth.test");

        assert_eq!(auth.user_id, "UBOT");
        assert_eq!(auth.scopes, vec!["chat:write".to_string(), "commands".to_string()]);
    }

    #[tokio::test]
    async fn socket_url_uses_app_token() {
        let client = spawn(Seen::default()).await;
        assert_eq!(client.open_socket_url().await.expect("open"), "wss://example.test/link");
    }

    #[tokio::test]
    async fn stalled_slack_calls_time_out() {
        let client =
            spawn_with_timeout(Seen::default(), std::time::Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        let error = client
            .update_message("C1", "1.1", &MessageTemplate::text("x"))
            .await
            .expect_err("should time out");

        assert!(started.elapsed() < std::time::Duration::from_secs(3));
        assert!(matches!(
            error,
            SlackApiError::Transport { ref method, .. } if method == "chat.update"
        ));
    }
}
