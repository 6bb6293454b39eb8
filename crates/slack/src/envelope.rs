//! Socket Mode wire frames.
//!
//! Slack sends `hello` once per connection, `disconnect` when it wants the client to move to a
//! fresh URL, and envelopes (`events_api`, `slash_commands`, `interactive`) that must be
//! acknowledged by `envelope_id` within a few seconds.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::commands::SlashCommandPayload;
use crate::events::{BlockActionEvent, MessageEvent, SlackEnvelope, SlackEvent};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketFrame {
    Hello { num_connections: Option<u32> },
    Disconnect { reason: String },
    Envelope(SlackEnvelope),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed socket mode frame: {0}")]
    Malformed(String),
    #[error("socket mode frame is missing `{0}`")]
    MissingField(&'static str),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    frame_type: String,
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Value,
    reason: Option<String>,
    num_connections: Option<u32>,
    #[serde(default)]
    retry_attempt: u32,
}

#[derive(Deserialize)]
struct RawMessageEvent {
    #[serde(rename = "type")]
    event_type: String,
    user: Option<String>,
    #[serde(default)]
    channel: String,
    channel_type: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    ts: String,
    thread_ts: Option<String>,
    bot_id: Option<String>,
    subtype: Option<String>,
}

#[derive(Deserialize)]
struct RawSlashCommand {
    command: String,
    #[serde(default)]
    text: String,
    user_id: String,
    channel_id: String,
    trigger_id: Option<String>,
    response_url: Option<String>,
}

#[derive(Deserialize)]
struct RawInteractive {
    #[serde(rename = "type")]
    interaction_type: String,
    user: RawId,
    channel: Option<RawId>,
    trigger_id: Option<String>,
    message: Option<RawMessageRef>,
    #[serde(default)]
    actions: Vec<RawAction>,
}

#[derive(Deserialize)]
struct RawId {
    id: String,
}

#[derive(Deserialize)]
struct RawMessageRef {
    ts: Option<String>,
    thread_ts: Option<String>,
}

#[derive(Deserialize)]
struct RawAction {
    action_id: String,
    value: Option<String>,
}

pub fn parse_frame(text: &str) -> Result<SocketFrame, FrameError> {
    let raw: RawFrame =
        serde_json::from_str(text).map_err(|error| FrameError::Malformed(error.to_string()))?;

    match raw.frame_type.as_str() {
        "hello" => return Ok(SocketFrame::Hello { num_connections: raw.num_connections }),
        "disconnect" => {
            return Ok(SocketFrame::Disconnect {
                reason: raw.reason.unwrap_or_else(|| "unspecified".to_string()),
            })
        }
        _ => {}
    }

    let envelope_id = raw.envelope_id.ok_or(FrameError::MissingField("envelope_id"))?;
    let parsed = match raw.frame_type.as_str() {
        "events_api" => parse_events_api(raw.payload),
        "slash_commands" => parse_slash_command(raw.payload),
        "interactive" => parse_interactive(raw.payload),
        other => Ok(SlackEvent::Unsupported { event_type: other.to_string() }),
    };
    // An envelope with an id must still be acked, so a bad payload only loses the event.
    let event = parsed.unwrap_or_else(|error| {
        warn!(
            envelope_id = %envelope_id,
            correlation_id = %envelope_id,
            frame_type = %raw.frame_type,
            error = %error,
            "malformed socket mode payload; acknowledging as unsupported"
        );
        SlackEvent::Unsupported { event_type: format!("malformed_{}", raw.frame_type) }
    });

    Ok(SocketFrame::Envelope(SlackEnvelope {
        envelope_id,
        retry_attempt: raw.retry_attempt,
        event,
    }))
}

/// `envelope_id` of a frame [`parse_frame`] rejected, so it can still be acknowledged.
pub fn envelope_id_of(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get("envelope_id")?.as_str().map(str::to_string)
}

fn parse_events_api(mut payload: Value) -> Result<SlackEvent, FrameError> {
    let event = payload.get_mut("event").map(Value::take).ok_or(FrameError::MissingField("event"))?;
    let event_type = event
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingField("event.type"))?
        .to_string();

    if event_type != "app_mention" && event_type != "message" {
        return Ok(SlackEvent::Unsupported { event_type });
    }

    let raw: RawMessageEvent =
        serde_json::from_value(event).map_err(|error| FrameError::Malformed(error.to_string()))?;
    let message = MessageEvent {
        user_id: raw.user,
        channel_id: raw.channel,
        channel_type: raw.channel_type,
        text: raw.text,
        ts: raw.ts,
        thread_ts: raw.thread_ts,
        bot_id: raw.bot_id,
        subtype: raw.subtype,
    };

    Ok(match raw.event_type.as_str() {
        "app_mention" => SlackEvent::AppMention(message),
        _ => SlackEvent::Message(message),
    })
}

fn parse_slash_command(payload: Value) -> Result<SlackEvent, FrameError> {
    let raw: RawSlashCommand =
        serde_json::from_value(payload).map_err(|error| FrameError::Malformed(error.to_string()))?;
    Ok(SlackEvent::SlashCommand(SlashCommandPayload {
        command: raw.command,
        text: raw.text,
        channel_id: raw.channel_id,
        user_id: raw.user_id,
        trigger_id: raw.trigger_id,
        response_url: raw.response_url,
    }))
}

fn parse_interactive(payload: Value) -> Result<SlackEvent, FrameError> {
    let raw: RawInteractive =
        serde_json::from_value(payload).map_err(|error| FrameError::Malformed(error.to_string()))?;
    if raw.interaction_type != "block_actions" {
        return Ok(SlackEvent::Unsupported { event_type: raw.interaction_type });
    }

    let action = raw.actions.into_iter().next().ok_or(FrameError::MissingField("actions"))?;
    let (message_ts, thread_ts) =
        raw.message.map(|message| (message.ts, message.thread_ts)).unwrap_or_default();

    Ok(SlackEvent::BlockAction(BlockActionEvent {
        user_id: raw.user.id,
        channel_id: raw.channel.map(|channel| channel.id),
        trigger_id: raw.trigger_id,
        message_ts,
        thread_ts,
        action_id: action.action_id,
        value: action.value,
    }))
}

#[cfg(test)]
mod tests {
    use super::{envelope_id_of, parse_frame, FrameError, SocketFrame};
    use crate::events::SlackEvent;

    #[test]
    fn parses_hello_and_disconnect() {
        assert_eq!(
            parse_frame(r#"{"type":"hello","num_connections":1,"connection_info":{"app_id":"A1"}}"#),
            Ok(SocketFrame::Hello { num_connections: Some(1) })
        );
        assert_eq!(
            parse_frame(r#"{"type":"disconnect","reason":"refresh_requested"}"#),
            Ok(SocketFrame::Disconnect { reason: "refresh_requested".into() })
        );
    }

    #[test]
    fn parses_app_mention_envelope() {
        let frame = parse_frame(
            r#"{"envelope_id":"env-1","type":"events_api","retry_attempt":1,
                "payload":{"event":{"type":"app_mention","user":"U1","channel":"C1",
                "text":"<@UBOT> revenue by month","ts":"1730000000.000100"}}}"#,
        )
        .expect("frame");

        let SocketFrame::Envelope(envelope) = frame else { panic!("expected envelope") };
        assert_eq!(envelope.envelope_id, "env-1");
        assert_eq!(envelope.retry_attempt, 1);
        let SlackEvent::AppMention(message) = envelope.event else { panic!("expected mention") };
        assert_eq!(message.user_id.as_deref(), Some("U1"));
        assert_eq!(message.text, "<@UBOT> revenue by month");
    }

    #[test]
    fn parses_slash_command_envelope() {
        let frame = parse_frame(
            r#"{"envelope_id":"env-2","type":"slash_commands","payload":{"command":"/goose-query",
                "text":"top customers","user_id":"U2","channel_id":"C2","trigger_id":"T2"}}"#,
        )
        .expect("frame");

        let SocketFrame::Envelope(envelope) = frame else { panic!("expected envelope") };
        let SlackEvent::SlashCommand(payload) = envelope.event else { panic!("expected command") };
        assert_eq!(payload.command, "/goose-query");
        assert_eq!(payload.trigger_id.as_deref(), Some("T2"));
    }

    #[test]
    fn parses_block_action_envelope() {
        let frame = parse_frame(
            r#"{"envelope_id":"env-3","type":"interactive","payload":{"type":"block_actions",
                "user":{"id":"U3"},"channel":{"id":"C3"},"trigger_id":"trig",
                "message":{"ts":"1.2"},"actions":[{"action_id":"share_query","value":"query_1_1"}]}}"#,
        )
        .expect("frame");

        let SocketFrame::Envelope(envelope) = frame else { panic!("expected envelope") };
        let SlackEvent::BlockAction(action) = envelope.event else { panic!("expected action") };
        assert_eq!(action.action_id, "share_query");
        assert_eq!(action.value.as_deref(), Some("query_1_1"));
        assert_eq!(action.channel_id.as_deref(), Some("C3"));
        assert_eq!(action.message_ts.as_deref(), Some("1.2"));
    }

    #[test]
    fn unknown_envelope_types_are_unsupported_not_errors() {
        let frame = parse_frame(r#"{"envelope_id":"env-4","type":"options","payload":{}}"#)
            .expect("frame");
        let SocketFrame::Envelope(envelope) = frame else { panic!("expected envelope") };
        assert_eq!(envelope.event, SlackEvent::Unsupported { event_type: "options".into() });

        let frame = parse_frame(
            r#"{"envelope_id":"env-5","type":"events_api","payload":{"event":{"type":"reaction_added"}}}"#,
        )
        .expect("frame");
        let SocketFrame::Envelope(envelope) = frame else { panic!("expected envelope") };
        assert_eq!(envelope.event, SlackEvent::Unsupported { event_type: "reaction_added".into() });
    }

    #[test]
    fn malformed_payload_with_envelope_id_degrades_to_unsupported() {
        let frame = parse_frame(
            r#"{"envelope_id":"env-x","type":"events_api","payload":{"event":{"type":"message",
                "user":"U1","channel":"C1","text":null,"ts":"1.0"}}}"#,
        )
        .expect("frame");
        let SocketFrame::Envelope(envelope) = frame else { panic!("expected envelope") };
        assert_eq!(envelope.envelope_id, "env-x");
        assert_eq!(
            envelope.event,
            SlackEvent::Unsupported { event_type: "malformed_events_api".into() }
        );

        let frame = parse_frame(
            r#"{"envelope_id":"env-y","type":"interactive","payload":{"type":"block_actions",
                "user":{"id":"U3"},"actions":[]}}"#,
        )
        .expect("frame");
        let SocketFrame::Envelope(envelope) = frame else { panic!("expected envelope") };
        assert_eq!(envelope.envelope_id, "env-y");
        assert_eq!(
            envelope.event,
            SlackEvent::Unsupported { event_type: "malformed_interactive".into() }
        );
    }

    #[test]
    fn envelope_without_id_is_rejected() {
        assert_eq!(
            parse_frame(r#"{"type":"events_api","payload":{}}"#),
            Err(FrameError::MissingField("envelope_id"))
        );
        assert!(matches!(parse_frame("not json"), Err(FrameError::Malformed(_))));
    }

    #[test]
    fn rejected_frames_still_expose_their_envelope_id() {
        let text = r#"{"envelope_id":"env-z","type":"events_api","retry_attempt":"first"}"#;
        assert!(matches!(parse_frame(text), Err(FrameError::Malformed(_))));
        assert_eq!(envelope_id_of(text).as_deref(), Some("env-z"));
        assert_eq!(envelope_id_of(r#"{"type":"hello"}"#), None);
        assert_eq!(envelope_id_of("not json"), None);
    }
}
