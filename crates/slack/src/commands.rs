use thiserror::Error;

use goosebot_core::manifest::SLASH_COMMAND;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlashCommandPayload {
    pub command: String,
    pub text: String,
    pub channel_id: String,
    pub user_id: String,
    pub trigger_id: Option<String>,
    pub response_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GooseCommand {
    Ask { question: String },
    Usage,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("unsupported slash command: {0}")]
    UnsupportedCommand(String),
}

pub const USAGE_HINT: &str = "Usage: `/goose-query What was our revenue last month?`";

pub fn parse_goose_command(payload: &SlashCommandPayload) -> Result<GooseCommand, CommandParseError> {
    if payload.command != SLASH_COMMAND {
        return Err(CommandParseError::UnsupportedCommand(payload.command.clone()));
    }

    let question = payload.text.trim();
    if question.is_empty() || question.eq_ignore_ascii_case("help") {
        return Ok(GooseCommand::Usage);
    }

    Ok(GooseCommand::Ask { question: question.to_string() })
}

/// Removes every `<@U…>` user mention and collapses the remaining whitespace.
pub fn strip_mentions(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<@") {
        cleaned.push_str(&rest[..start]);
        match rest[start..].find('>') {
            Some(end) => rest = &rest[start + end + 1..],
            None => {
                rest = &rest[start..];
                break;
            }
        }
    }
    cleaned.push_str(rest);
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}
