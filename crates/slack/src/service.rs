//! Question answering flow behind the event handlers.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use goosebot_core::audit::{clip, AuditEvent, AuditOutcome};
use goosebot_core::config::BotConfig;
use goosebot_core::errors::ApplicationError;
use goosebot_core::domain::query::{QueryId, QueryResult, QueryStatus};
use goosebot_core::domain::user::{Permission, Role, UserContext};
use goosebot_core::throttle::{QueryThrottle, ThrottleScope};
use goosebot_db::repositories::{
    AuditLogRepository, QueryHistoryRecord, QueryHistoryRepository, RepositoryError,
    SessionRepository, UserMappingRepository,
};
use goosebot_expert::{ProgressSink, QueryPipeline};

use crate::blocks::{
    admin_error_report, auth_required_message, error_message, help_message,
    permission_denied_message, rate_limited_message, refine_query_modal, share_message,
    upload_failed_message, MessageTemplate, ACTION_REFINE_QUERY, ACTION_SHARE_QUERY,
};
use crate::commands::USAGE_HINT;
use crate::events::{
    BlockActionEvent, BlockActionService, EventContext, EventHandlerError, HandlerResult,
    QuestionRequest, QuestionService,
};
use crate::format::ResultFormatter;
use crate::web::{FileUpload, SlackApiError, SlackResponder};

const MIN_QUESTION_CHARS: usize = 5;
const AUDIT_QUESTION_CHARS: usize = 500;

pub struct BotRepositories {
    pub sessions: Arc<dyn SessionRepository>,
    pub history: Arc<dyn QueryHistoryRepository>,
    pub mappings: Arc<dyn UserMappingRepository>,
    pub audit: Arc<dyn AuditLogRepository>,
}

pub struct BotService {
    responder: Arc<dyn SlackResponder>,
    pipeline: Arc<QueryPipeline>,
    repositories: BotRepositories,
    throttle: QueryThrottle,
    formatter: ResultFormatter,
    config: BotConfig,
    admin_channel: Option<String>,
}

impl BotService {
    pub fn new(
        responder: Arc<dyn SlackResponder>,
        pipeline: Arc<QueryPipeline>,
        repositories: BotRepositories,
        config: BotConfig,
        admin_channel: Option<String>,
    ) -> Self {
        Self {
            responder,
            pipeline,
            repositories,
            throttle: QueryThrottle::new(
                config.rate_limit_per_user_per_minute,
                config.rate_limit_global_per_minute,
            ),
            formatter: ResultFormatter::from_config(&config),
            config,
            admin_channel,
        }
    }

    pub fn pipeline(&self) -> &Arc<QueryPipeline> {
        &self.pipeline
    }

    /// Mapped and active users get their stored grants; others only when unmapped access is on.
    pub async fn resolve_user(
        &self,
        slack_user_id: &str,
    ) -> Result<Option<UserContext>, RepositoryError> {
        match self.repositories.mappings.find_by_slack_id(slack_user_id).await? {
            Some(mapping) if mapping.is_active => Ok(Some(mapping.to_context())),
            Some(_) => Ok(None),
            None if self.config.allow_unmapped_users => {
                Ok(Some(UserContext::unmapped(slack_user_id, Role::Analyst)))
            }
            None => Ok(None),
        }
    }

    async fn reply(
        &self,
        request: &QuestionRequest,
        message: &MessageTemplate,
    ) -> Result<String, EventHandlerError> {
        self.responder
            .post_message(&request.channel_id, message, request.thread_ts.as_deref())
            .await
            .map_err(slack_failure)
    }

    async fn audit(&self, event: AuditEvent) {
        let event_type = event.event_type.clone();
        if let Err(error) = self.repositories.audit.record(event).await {
            warn!(event_type = %event_type, error = %error, "failed to record audit event");
        }
    }

    async fn process_question(
        &self,
        request: &QuestionRequest,
        ctx: &EventContext,
    ) -> Result<(), EventHandlerError> {
        let question = request.text.trim();
        if question.chars().count() < MIN_QUESTION_CHARS {
            self.reply(request, &help_message()).await?;
            return Ok(());
        }

        let Some(user) = self.resolve_user(&request.user_id).await.map_err(query_failure)? else {
            info!(
                event_name = "bot.question.unauthenticated",
                correlation_id = %ctx.correlation_id,
                slack_user_id = %request.user_id,
                "question from unmapped user"
            );
            self.audit(
                AuditEvent::new("authentication", "resolve_user", AuditOutcome::Denied)
                    .actor(request.user_id.clone(), request.user_id.clone())
                    .channel(request.channel_id.clone()),
            )
            .await;
            self.reply(request, &auth_required_message()).await?;
            return Ok(());
        };

        if let Err(denied) = user.require(Permission::QueryExecute) {
            self.audit(
                AuditEvent::new("query_request", "ask_question", AuditOutcome::Denied)
                    .actor(user.user_id.clone(), user.slack_user_id.clone())
                    .channel(request.channel_id.clone())
                    .error(Some(denied.to_string())),
            )
            .await;
            self.reply(request, &permission_denied_message()).await?;
            return Ok(());
        }

        if let Err((scope, retry_after)) = self.throttle.check(&user.slack_user_id) {
            info!(
                event_name = "bot.question.rate_limited",
                correlation_id = %ctx.correlation_id,
                scope = match scope {
                    ThrottleScope::User => "user",
                    ThrottleScope::Global => "global",
                },
                retry_after_secs = retry_after.as_secs(),
                "question rejected by rate limit"
            );
            self.reply(request, &rate_limited_message(retry_after)).await?;
            return Ok(());
        }

        self.audit(
            AuditEvent::new("query_request", "ask_question", AuditOutcome::Success)
                .actor(user.user_id.clone(), user.slack_user_id.clone())
                .channel(request.channel_id.clone())
                .with_data("question", clip(question, AUDIT_QUESTION_CHARS)),
        )
        .await;

        let thinking_ts =
            self.reply(request, &MessageTemplate::text(QueryStatus::Pending.progress_message())).await?;

        let session_id = match self
            .repositories
            .sessions
            .open_or_touch(&user.user_id, &user.slack_user_id, &request.channel_id)
            .await
        {
            Ok(id) => Some(id),
            Err(error) => {
                warn!(correlation_id = %ctx.correlation_id, error = %error, "session bookkeeping failed");
                None
            }
        };

        let progress = ThinkingMessage {
            responder: self.responder.as_ref(),
            channel_id: &request.channel_id,
            ts: &thinking_ts,
        };
        let result = self.pipeline.run(question, &user, &progress).await;

        info!(
            event_name = "bot.question.answered",
            correlation_id = %ctx.correlation_id,
            channel_id = %request.channel_id,
            query_id = %result.query_id,
            success = result.success(),
            row_count = result.row_count,
            "question answered"
        );

        let record = QueryHistoryRecord::from_result(
            session_id,
            &user,
            &request.channel_id,
            question,
            &result,
        );
        if let Err(error) = self.repositories.history.save(record).await {
            warn!(query_id = %result.query_id, error = %error, "failed to save query history");
        }

        let rendered = self.formatter.format(&result);
        self.responder
            .update_message(&request.channel_id, &thinking_ts, &rendered)
            .await
            .map_err(slack_failure)?;

        if result.success() && !self.formatter.is_inline(&result) && self.config.enable_file_uploads {
            self.upload_csv(request, question, &result).await?;
        }

        self.audit(
            AuditEvent::new(
                "query_complete",
                "execute_query",
                if result.success() { AuditOutcome::Success } else { AuditOutcome::Failure },
            )
            .actor(user.user_id.clone(), user.slack_user_id.clone())
            .channel(request.channel_id.clone())
            .resource(result.query_id.as_str())
            .with_data("question", clip(question, AUDIT_QUESTION_CHARS))
            .with_data("execution_time_ms", result.execution_time_ms)
            .with_data("row_count", result.row_count)
            .error(result.error_message.clone()),
        )
        .await;

        Ok(())
    }

    async fn upload_csv(
        &self,
        request: &QuestionRequest,
        question: &str,
        result: &QueryResult,
    ) -> Result<(), EventHandlerError> {
        let upload = FileUpload {
            channel_id: request.channel_id.clone(),
            thread_ts: request.thread_ts.clone(),
            filename: format!("query_results_{}.csv", result.query_id),
            title: format!("Query Results - {}...", clip(question, 50)),
            content: self.formatter.csv(result),
        };

        if let Err(error) = self.responder.upload_file(upload).await {
            warn!(query_id = %result.query_id, error = %error, "csv upload failed");
            self.reply(request, &upload_failed_message()).await?;
        }
        Ok(())
    }

    async fn report_handler_failure(
        &self,
        operation: &'static str,
        failure: &EventHandlerError,
        ctx: &EventContext,
    ) {
        error!(
            event_name = "bot.handler.failed",
            correlation_id = %ctx.correlation_id,
            operation,
            error = %failure,
            "event handling failed"
        );
        self.report_error(&failure.to_string(), ctx).await;
    }

    async fn process_block_action(
        &self,
        event: &BlockActionEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let query_id = event.value.as_deref().unwrap_or_default();
        match event.action_id.as_str() {
            ACTION_REFINE_QUERY => {
                let trigger_id = event.trigger_id.as_deref().ok_or_else(|| {
                    EventHandlerError::BlockAction("refine_query requires a trigger_id".into())
                })?;
                self.responder
                    .open_view(trigger_id, refine_query_modal(query_id))
                    .await
                    .map_err(slack_failure)?;
                Ok(HandlerResult::Processed)
            }
            ACTION_SHARE_QUERY => {
                let Some(admin_channel) = self.admin_channel.as_deref() else {
                    debug!(correlation_id = %ctx.correlation_id, "no admin channel; share skipped");
                    return Ok(HandlerResult::Ignored);
                };
                let source_channel = event.channel_id.as_deref().unwrap_or("unknown");
                let message = share_message(query_id, &event.user_id, source_channel);
                self.responder
                    .post_message(admin_channel, &message, None)
                    .await
                    .map_err(slack_failure)?;
                self.audit(
                    AuditEvent::new("query_share", "share_query", AuditOutcome::Success)
                        .actor(event.user_id.clone(), event.user_id.clone())
                        .channel(source_channel)
                        .resource(query_id),
                )
                .await;
                Ok(HandlerResult::Processed)
            }
            other => {
                debug!(action_id = other, "unhandled block action");
                Ok(HandlerResult::Ignored)
            }
        }
    }

    /// Posts a short report to the admin channel when one is configured.
    pub async fn report_error(&self, error: &str, ctx: &EventContext) {
        let Some(channel) = self.admin_channel.as_deref() else {
            return;
        };
        let report = admin_error_report(error, &ctx.correlation_id);
        if let Err(post_error) = self.responder.post_message(channel, &report, None).await {
            warn!(
                correlation_id = %ctx.correlation_id,
                error = %post_error,
                "failed to report error to admin channel"
            );
        }
    }
}

#[async_trait]
impl QuestionService for BotService {
    async fn answer_question(
        &self,
        request: QuestionRequest,
        ctx: &EventContext,
    ) -> Result<(), EventHandlerError> {
        let outcome = self.process_question(&request, ctx).await;
        if let Err(failure) = &outcome {
            error!(
                event_name = "bot.question.failed",
                correlation_id = %ctx.correlation_id,
                channel_id = %request.channel_id,
                error = %failure,
                "question handling failed"
            );
            let interface = ApplicationError::from(failure.clone())
                .into_interface(ctx.correlation_id.clone());
            let apology = error_message(&interface);
            if let Err(post_error) = self.reply(&request, &apology).await {
                debug!(error = %post_error, "could not post apology");
            }
            self.report_error(&failure.to_string(), ctx).await;
        }
        outcome
    }

    async fn send_usage_hint(
        &self,
        channel_id: &str,
        user_id: &str,
        ctx: &EventContext,
    ) -> Result<(), EventHandlerError> {
        let outcome = self
            .responder
            .post_ephemeral(channel_id, user_id, &MessageTemplate::text(USAGE_HINT))
            .await
            .map_err(slack_failure);
        if let Err(failure) = &outcome {
            self.report_handler_failure("usage_hint", failure, ctx).await;
        }
        outcome
    }
}

#[async_trait]
impl BlockActionService for BotService {
    async fn handle_block_action(
        &self,
        event: &BlockActionEvent,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let outcome = self.process_block_action(event, ctx).await;
        if let Err(failure) = &outcome {
            self.report_handler_failure("block_action", failure, ctx).await;
        }
        outcome
    }
}

/// Rewrites the "thinking" message as the pipeline advances.
struct ThinkingMessage<'a> {
    responder: &'a dyn SlackResponder,
    channel_id: &'a str,
    ts: &'a str,
}

#[async_trait]
impl ProgressSink for ThinkingMessage<'_> {
    async fn on_status(&self, query_id: &QueryId, status: QueryStatus) {
        if status.is_terminal() {
            return;
        }
        let message = MessageTemplate::text(status.progress_message());
        if let Err(error) = self.responder.update_message(self.channel_id, self.ts, &message).await {
            debug!(query_id = %query_id, error = %error, "progress update failed");
        }
    }
}

fn slack_failure(error: SlackApiError) -> EventHandlerError {
    EventHandlerError::Slack(error.to_string())
}

fn query_failure(error: RepositoryError) -> EventHandlerError {
    EventHandlerError::Query(error.to_string())
}
