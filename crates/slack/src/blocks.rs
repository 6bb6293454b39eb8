use std::time::Duration;

use goosebot_core::errors::InterfaceError;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    #[serde(rename = "plain_text")]
    Plain { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Plain { text } | Self::Mrkdwn { text } => text,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Danger,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "button")]
pub struct ButtonElement {
    pub action_id: String,
    pub text: TextObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<ButtonStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ButtonElement {
    pub fn new(action_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            text: TextObject::plain(label),
            style: None,
            value: None,
        }
    }

    pub fn style(mut self, style: ButtonStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { block_id: String, text: TextObject },
    Actions { block_id: String, elements: Vec<ButtonElement> },
    Context { block_id: String, elements: Vec<TextObject> },
}

impl Block {
    pub fn block_id(&self) -> &str {
        match self {
            Self::Section { block_id, .. }
            | Self::Actions { block_id, .. }
            | Self::Context { block_id, .. } => block_id,
        }
    }
}

/// A Slack message: `text` is the notification fallback, `blocks` the rich body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    #[serde(rename = "text")]
    pub fallback_text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<Block>,
}

impl MessageTemplate {
    pub fn text(text: impl Into<String>) -> Self {
        Self { fallback_text: text.into(), blocks: Vec::new() }
    }

    pub fn find_block(&self, block_id: &str) -> Option<&Block> {
        self.blocks.iter().find(|block| block.block_id() == block_id)
    }

    pub fn has_actions(&self) -> bool {
        self.blocks.iter().any(|block| matches!(block, Block::Actions { .. }))
    }
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn section<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut SectionBuilder),
    {
        let mut builder = SectionBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Section { block_id: block_id.into(), text: builder.build() });
        self
    }

    pub fn actions<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ActionsBuilder),
    {
        let mut builder = ActionsBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Actions { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn context<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ContextBuilder),
    {
        let mut builder = ContextBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Context { block_id: block_id.into(), elements: builder.build() });
        self
    }

    /// Applies `build` only when `condition` holds, keeping call chains flat.
    pub fn when<F>(self, condition: bool, build: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        if condition {
            build(self)
        } else {
            self
        }
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[derive(Default)]
pub struct SectionBuilder {
    text: Option<TextObject>,
}

impl SectionBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> TextObject {
        self.text.unwrap_or_else(|| TextObject::plain(""))
    }
}

#[derive(Default)]
pub struct ActionsBuilder {
    elements: Vec<ButtonElement>,
}

impl ActionsBuilder {
    pub fn button(&mut self, button: ButtonElement) -> &mut Self {
        self.elements.push(button);
        self
    }

    fn build(self) -> Vec<ButtonElement> {
        self.elements
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    elements: Vec<TextObject>,
}

impl ContextBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> Vec<TextObject> {
        self.elements
    }
}

pub const ACTION_REFINE_QUERY: &str = "refine_query";
pub const ACTION_SHARE_QUERY: &str = "share_query";

pub fn help_message() -> MessageTemplate {
    MessageTemplate::text(
        "👋 Hi! I can help you analyze data. Ask me a question like:\n\
         • What was our revenue last month?\n\
         • Show me top customers by sales\n\
         • How many users signed up this week?",
    )
}

pub fn auth_required_message() -> MessageTemplate {
    MessageTemplate::text(
        "🔒 You need to be authenticated to use this bot. Please contact your admin to set up access.",
    )
}

pub fn permission_denied_message() -> MessageTemplate {
    MessageTemplate::text(
        "🔒 You don't have permission to execute queries. Contact your admin for access.",
    )
}

pub fn rate_limited_message(retry_after: Duration) -> MessageTemplate {
    let seconds = retry_after.as_secs().max(1);
    MessageTemplate::text(format!(
        "⏳ You're asking questions faster than I can answer them. Try again in {seconds}s."
    ))
}

/// User-safe apology; internal detail stays in logs and the admin report.
pub fn error_message(error: &InterfaceError) -> MessageTemplate {
    let summary = format!("🚨 {}", error.user_message());
    MessageBuilder::new(summary.clone())
        .section("goose.error.summary.v1", |section| {
            section.mrkdwn(summary);
        })
        .context("goose.error.meta.v1", |context| {
            context.mrkdwn(format!("Reference: `{}`", error.correlation_id()));
        })
        .build()
}

pub fn upload_failed_message() -> MessageTemplate {
    MessageTemplate::text("📎 Note: Could not upload CSV file due to size or permission limits.")
}

pub fn share_message(query_id: &str, user_id: &str, channel_id: &str) -> MessageTemplate {
    MessageBuilder::new(format!("📊 Query shared by <@{user_id}> from <#{channel_id}>"))
        .section("goose.share.summary.v1", |section| {
            section.mrkdwn(format!("Query ID: `{query_id}` has been shared for team reference."));
        })
        .build()
}

pub fn admin_error_report(error: &str, correlation_id: &str) -> MessageTemplate {
    let clipped: String = error.chars().take(500).collect();
    MessageTemplate::text(format!("🚨 Bot error: {clipped} (correlation `{correlation_id}`)"))
}

/// Modal opened by the Refine Query button; `private_metadata` carries the query id back.
pub fn refine_query_modal(query_id: &str) -> Value {
    json!({
        "type": "modal",
        "callback_id": "refine_query_modal",
        "title": {"type": "plain_text", "text": "Refine Query"},
        "blocks": [{
            "type": "input",
            "block_id": "refined_question",
            "element": {
                "type": "plain_text_input",
                "action_id": "refined_question_input",
                "multiline": true,
                "placeholder": {
                    "type": "plain_text",
                    "text": "How would you like to modify your question?"
                }
            },
            "label": {"type": "plain_text", "text": "Refined Question"}
        }],
        "submit": {"type": "plain_text", "text": "Submit"},
        "private_metadata": query_id
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{refine_query_modal, share_message, ButtonElement, ButtonStyle, MessageBuilder};

    #[test]
    fn builder_serialises_block_kit_shapes() {
        let message = MessageBuilder::new("fallback")
            .section("s", |section| {
                section.mrkdwn("*bold*");
            })
            .context("c", |context| {
                context.plain("meta");
            })
            .actions("a", |actions| {
                actions.button(
                    ButtonElement::new("refine_query", "Refine Query")
                        .style(ButtonStyle::Primary)
                        .value("query_1_1"),
                );
            })
            .build();

        assert_eq!(
            serde_json::to_value(&message).expect("serialise"),
            json!({
                "text": "fallback",
                "blocks": [
                    {"type": "section", "block_id": "s", "text": {"type": "mrkdwn", "text": "*bold*"}},
                    {"type": "context", "block_id": "c", "elements": [{"type": "plain_text", "text": "meta"}]},
                    {"type": "actions", "block_id": "a", "elements": [{
                        "type": "button",
                        "action_id": "refine_query",
                        "text": {"type": "plain_text", "text": "Refine Query"},
                        "style": "primary",
                        "value": "query_1_1"
                    }]}
                ]
            })
        );
    }

    #[test]
    fn when_skips_blocks_for_false_conditions() {
        let message = MessageBuilder::new("x")
            .when(false, |builder| builder.section("hidden", |s| {
                s.plain("no");
            }))
            .build();
        assert!(message.blocks.is_empty());
        assert_eq!(serde_json::to_value(&message).expect("serialise"), json!({"text": "x"}));
    }

    #[test]
    fn share_message_names_user_channel_and_query() {
        let message = share_message("query_9_9", "U1", "C1");
        assert_eq!(message.fallback_text, "📊 Query shared by <@U1> from <#C1>");
        assert!(message.find_block("goose.share.summary.v1").is_some());
    }

    #[test]
    fn refine_modal_carries_query_id() {
        let modal = refine_query_modal("query_5_5");
        assert_eq!(modal["private_metadata"], "query_5_5");
        assert_eq!(modal["title"]["text"], "Refine Query");
    }
}
