use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use goosebot_core::errors::{ApplicationError, DomainError};
use thiserror::Error;

use crate::commands::{parse_goose_command, strip_mentions, CommandParseError, GooseCommand, SlashCommandPayload};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub retry_attempt: u32,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    AppMention(MessageEvent),
    Message(MessageEvent),
    SlashCommand(SlashCommandPayload),
    BlockAction(BlockActionEvent),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::AppMention(_) => SlackEventType::AppMention,
            Self::Message(_) => SlackEventType::Message,
            Self::SlashCommand(_) => SlackEventType::SlashCommand,
            Self::BlockAction(_) => SlackEventType::BlockAction,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }

    pub fn channel_id(&self) -> Option<&str> {
        match self {
            Self::AppMention(event) | Self::Message(event) => Some(&event.channel_id),
            Self::SlashCommand(payload) => Some(&payload.channel_id),
            Self::BlockAction(event) => event.channel_id.as_deref(),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    AppMention,
    Message,
    SlashCommand,
    BlockAction,
    Unsupported,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageEvent {
    pub user_id: Option<String>,
    pub channel_id: String,
    pub channel_type: Option<String>,
    pub text: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub bot_id: Option<String>,
    pub subtype: Option<String>,
}

impl MessageEvent {
    pub fn is_direct_message(&self) -> bool {
        self.channel_type.as_deref() == Some("im")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockActionEvent {
    pub user_id: String,
    pub channel_id: Option<String>,
    pub trigger_id: Option<String>,
    pub message_ts: Option<String>,
    pub thread_ts: Option<String>,
    pub action_id: String,
    pub value: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuestionSource {
    Mention,
    DirectMessage,
    ChannelMessage,
    SlashCommand,
}

/// A question lifted out of a mention, message or `/goose-query` invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuestionRequest {
    pub user_id: String,
    pub channel_id: String,
    pub text: String,
    pub thread_ts: Option<String>,
    pub source: QuestionSource,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Processed,
    Ignored,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error(transparent)]
    Parse(#[from] CommandParseError),
    #[error("slack api call failed: {0}")]
    Slack(String),
    #[error("query handling failed: {0}")]
    Query(String),
    #[error("block action failed: {0}")]
    BlockAction(String),
}

impl From<EventHandlerError> for ApplicationError {
    fn from(value: EventHandlerError) -> Self {
        match value {
            EventHandlerError::Parse(error) => {
                Self::Domain(DomainError::InvariantViolation(error.to_string()))
            }
            EventHandlerError::Slack(message) | EventHandlerError::BlockAction(message) => {
                Self::Integration(message)
            }
            EventHandlerError::Query(message) => Self::Persistence(message),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait]
pub trait QuestionService: Send + Sync {
    async fn answer_question(
        &self,
        request: QuestionRequest,
        ctx: &EventContext,
    ) -> Result<(), EventHandlerError>;

    async fn send_usage_hint(
        &self,
        channel_id: &str,
        user_id: &str,
        ctx: &EventContext,
    ) -> Result<(), EventHandlerError>;
}

#[async_trait]
pub trait BlockActionService: Send + Sync {
    async fn handle_block_action(
        &self,
        event: &BlockActionEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

/// Registers the mention, message, slash command and block action handlers.
pub fn bot_dispatcher<S>(service: Arc<S>) -> EventDispatcher
where
    S: QuestionService + BlockActionService + 'static,
{
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(AppMentionHandler::new(service.clone()));
    dispatcher.register(MessageHandler::new(service.clone()));
    dispatcher.register(SlashCommandHandler::new(service.clone()));
    dispatcher.register(BlockActionHandler::new(service));
    dispatcher
}

pub struct AppMentionHandler<S: ?Sized> {
    service: Arc<S>,
}

impl<S: ?Sized> AppMentionHandler<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for AppMentionHandler<S>
where
    S: QuestionService + ?Sized + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::AppMention
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::AppMention(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        let Some(user_id) = event.user_id.clone() else {
            return Ok(HandlerResult::Ignored);
        };

        let request = QuestionRequest {
            user_id,
            channel_id: event.channel_id.clone(),
            text: strip_mentions(&event.text),
            thread_ts: Some(event.ts.clone()),
            source: QuestionSource::Mention,
        };
        self.service.answer_question(request, ctx).await?;
        Ok(HandlerResult::Processed)
    }
}

pub struct MessageHandler<S: ?Sized> {
    service: Arc<S>,
}

impl<S: ?Sized> MessageHandler<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

/// Decides whether a plain channel or DM message is a question for the bot.
pub fn message_question(event: &MessageEvent) -> Option<QuestionRequest> {
    if event.bot_id.is_some() || event.subtype.is_some() {
        return None;
    }
    if event.thread_ts.is_some() && !event.is_direct_message() {
        return None;
    }
    let user_id = event.user_id.clone()?;

    let lowered = event.text.to_lowercase();
    let source = if event.is_direct_message() {
        QuestionSource::DirectMessage
    } else if lowered.contains("query") || lowered.contains("data") {
        QuestionSource::ChannelMessage
    } else {
        return None;
    };

    Some(QuestionRequest {
        user_id,
        channel_id: event.channel_id.clone(),
        text: strip_mentions(&event.text),
        thread_ts: Some(event.ts.clone()),
        source,
    })
}

#[async_trait]
impl<S> EventHandler for MessageHandler<S>
where
    S: QuestionService + ?Sized + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::Message
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::Message(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        let Some(request) = message_question(event) else {
            return Ok(HandlerResult::Ignored);
        };

        self.service.answer_question(request, ctx).await?;
        Ok(HandlerResult::Processed)
    }
}

pub struct SlashCommandHandler<S: ?Sized> {
    service: Arc<S>,
}

impl<S: ?Sized> SlashCommandHandler<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for SlashCommandHandler<S>
where
    S: QuestionService + ?Sized + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::SlashCommand
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::SlashCommand(payload) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        match parse_goose_command(payload)? {
            GooseCommand::Usage => {
                self.service.send_usage_hint(&payload.channel_id, &payload.user_id, ctx).await?;
            }
            GooseCommand::Ask { question } => {
                let request = QuestionRequest {
                    user_id: payload.user_id.clone(),
                    channel_id: payload.channel_id.clone(),
                    text: question,
                    thread_ts: None,
                    source: QuestionSource::SlashCommand,
                };
                self.service.answer_question(request, ctx).await?;
            }
        }
        Ok(HandlerResult::Processed)
    }
}

pub struct BlockActionHandler<S: ?Sized> {
    service: Arc<S>,
}

impl<S: ?Sized> BlockActionHandler<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for BlockActionHandler<S>
where
    S: BlockActionService + ?Sized + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::BlockAction
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::BlockAction(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        self.service.handle_block_action(event, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::{
        bot_dispatcher, message_question, BlockActionEvent, BlockActionService, EventContext,
        EventDispatcher, EventHandlerError, HandlerResult, MessageEvent, QuestionRequest,
        QuestionService, QuestionSource, SlackEnvelope, SlackEvent,
    };
    use crate::commands::{CommandParseError, SlashCommandPayload};
    use crate::events::DispatchError;

    #[derive(Default)]
    struct RecordingService {
        questions: Mutex<Vec<QuestionRequest>>,
        usage_hints: Mutex<Vec<(String, String)>>,
        actions: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QuestionService for RecordingService {
        async fn answer_question(
            &self,
            request: QuestionRequest,
            _ctx: &EventContext,
        ) -> Result<(), EventHandlerError> {
            self.questions.lock().expect("lock").push(request);
            Ok(())
        }

        async fn send_usage_hint(
            &self,
            channel_id: &str,
            user_id: &str,
            _ctx: &EventContext,
        ) -> Result<(), EventHandlerError> {
            self.usage_hints.lock().expect("lock").push((channel_id.into(), user_id.into()));
            Ok(())
        }
    }

    #[async_trait]
    impl BlockActionService for RecordingService {
        async fn handle_block_action(
            &self,
            event: &BlockActionEvent,
            _ctx: &EventContext,
        ) -> Result<HandlerResult, EventHandlerError> {
            self.actions.lock().expect("lock").push(event.action_id.clone());
            Ok(HandlerResult::Processed)
        }
    }

    fn envelope(event: SlackEvent) -> SlackEnvelope {
        SlackEnvelope { envelope_id: "env-1".to_owned(), retry_attempt: 0, event }
    }

    fn channel_message(text: &str) -> MessageEvent {
        MessageEvent {
            user_id: Some("U1".to_owned()),
            channel_id: "C1".to_owned(),
            channel_type: Some("channel".to_owned()),
            text: text.to_owned(),
            ts: "1730000000.000100".to_owned(),
            ..MessageEvent::default()
        }
    }

    fn slash(text: &str) -> SlackEvent {
        SlackEvent::SlashCommand(SlashCommandPayload {
            command: "/goose-query".to_owned(),
            text: text.to_owned(),
            channel_id: "C9".to_owned(),
            user_id: "U9".to_owned(),
            trigger_id: None,
            response_url: None,
        })
    }

    #[test]
    fn bot_dispatcher_registers_four_handlers() {
        assert_eq!(bot_dispatcher(Arc::new(RecordingService::default())).handler_count(), 4);
    }

    #[tokio::test]
    async fn mention_text_is_stripped_and_threaded() {
        let service = Arc::new(RecordingService::default());
        let dispatcher = bot_dispatcher(service.clone());
        let mut event = channel_message("<@UBOT>  show revenue by month");
        event.ts = "42.1".to_owned();

        let result = dispatcher
            .dispatch(&envelope(SlackEvent::AppMention(event)), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(result, HandlerResult::Processed);
        let questions = service.questions.lock().expect("lock");
        assert_eq!(questions[0].text, "show revenue by month");
        assert_eq!(questions[0].thread_ts.as_deref(), Some("42.1"));
        assert_eq!(questions[0].source, QuestionSource::Mention);
    }

    #[test]
    fn message_rules_filter_noise() {
        assert!(message_question(&channel_message("lunch anyone?")).is_none());
        assert_eq!(
            message_question(&channel_message("can someone pull DATA on churn")).map(|q| q.source),
            Some(QuestionSource::ChannelMessage)
        );

        let mut bot = channel_message("query results");
        bot.bot_id = Some("B1".to_owned());
        assert!(message_question(&bot).is_none());

        let mut edited = channel_message("query results");
        edited.subtype = Some("message_changed".to_owned());
        assert!(message_question(&edited).is_none());

        let mut reply = channel_message("query in thread");
        reply.thread_ts = Some("1.0".to_owned());
        assert!(message_question(&reply).is_none());

        let mut dm_reply = channel_message("anything at all");
        dm_reply.channel_type = Some("im".to_owned());
        dm_reply.thread_ts = Some("1.0".to_owned());
        assert_eq!(
            message_question(&dm_reply).map(|q| q.source),
            Some(QuestionSource::DirectMessage)
        );
    }

    #[tokio::test]
    async fn empty_slash_command_sends_usage_hint() {
        let service = Arc::new(RecordingService::default());
        let dispatcher = bot_dispatcher(service.clone());

        dispatcher.dispatch(&envelope(slash("")), &EventContext::default()).await.expect("dispatch");
        dispatcher
            .dispatch(&envelope(slash("top 5 customers")), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(*service.usage_hints.lock().expect("lock"), vec![("C9".into(), "U9".into())]);
        let questions = service.questions.lock().expect("lock");
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].source, QuestionSource::SlashCommand);
        assert_eq!(questions[0].thread_ts, None);
    }

    #[tokio::test]
    async fn foreign_slash_command_is_a_dispatch_error() {
        let dispatcher = bot_dispatcher(Arc::new(RecordingService::default()));
        let mut event = slash("x");
        if let SlackEvent::SlashCommand(payload) = &mut event {
            payload.command = "/other".to_owned();
        }

        let result = dispatcher.dispatch(&envelope(event), &EventContext::default()).await;

        assert_eq!(
            result,
            Err(DispatchError::Handler(EventHandlerError::Parse(
                CommandParseError::UnsupportedCommand("/other".to_owned())
            )))
        );
    }

    #[tokio::test]
    async fn block_actions_reach_the_service() {
        let service = Arc::new(RecordingService::default());
        let dispatcher = bot_dispatcher(service.clone());
        let event = SlackEvent::BlockAction(BlockActionEvent {
            user_id: "U1".to_owned(),
            channel_id: Some("C1".to_owned()),
            trigger_id: Some("T1".to_owned()),
            message_ts: None,
            thread_ts: None,
            action_id: "refine_query".to_owned(),
            value: Some("query_1_1".to_owned()),
        });

        dispatcher.dispatch(&envelope(event), &EventContext::default()).await.expect("dispatch");

        assert_eq!(*service.actions.lock().expect("lock"), vec!["refine_query".to_owned()]);
    }

    #[tokio::test]
    async fn unsupported_events_are_ignored() {
        let dispatcher = EventDispatcher::new();
        let result = dispatcher
            .dispatch(
                &envelope(SlackEvent::Unsupported { event_type: "reaction_added".to_owned() }),
                &EventContext::default(),
            )
            .await
            .expect("dispatch");

        assert_eq!(result, HandlerResult::Ignored);
    }

    #[test]
    fn handler_errors_map_to_user_safe_interface_errors() {
        use goosebot_core::errors::{ApplicationError, InterfaceError};

        let slack = ApplicationError::from(EventHandlerError::Slack("timeout".into()))
            .into_interface("env-7");
        assert!(matches!(slack, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(slack.correlation_id(), "env-7");

        let parse = ApplicationError::from(EventHandlerError::Parse(
            CommandParseError::UnsupportedCommand("/deploy".into()),
        ))
        .into_interface("env-8");
        assert!(matches!(parse, InterfaceError::BadRequest { .. }));
    }
}
