use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use goosebot_core::audit::AuditEvent;
use goosebot_core::domain::query::QueryResult;
use goosebot_core::domain::user::{UserContext, UserMapping};

pub mod audit_log;
pub mod memory;
pub mod query_history;
pub mod session;
pub mod user_mapping;

pub use audit_log::SqlAuditLogRepository;
pub use memory::{
    InMemoryAuditLogRepository, InMemoryQueryHistoryRepository, InMemorySessionRepository,
    InMemoryUserMappingRepository,
};
pub use query_history::SqlQueryHistoryRepository;
pub use session::SqlSessionRepository;
pub use user_mapping::SqlUserMappingRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct UserSession {
    pub id: String,
    pub user_id: String,
    pub slack_user_id: String,
    pub channel_id: String,
    pub context: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
}

impl UserSession {
    pub fn open(user_id: &str, slack_user_id: &str, channel_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            slack_user_id: slack_user_id.to_string(),
            channel_id: channel_id.to_string(),
            context: Value::Object(Default::default()),
            created_at: now,
            updated_at: now,
            last_activity: now,
            is_active: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryHistoryRecord {
    pub id: String,
    pub session_id: Option<String>,
    pub user_id: String,
    pub slack_user_id: String,
    pub channel_id: String,
    pub query_id: String,
    pub original_question: String,
    pub generated_sql: Option<String>,
    pub query_result: Option<Value>,
    pub execution_time_ms: i64,
    pub row_count: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl QueryHistoryRecord {
    /// Full result payload is only kept for successful queries.
    pub fn from_result(
        session_id: Option<String>,
        user: &UserContext,
        channel_id: &str,
        question: &str,
        result: &QueryResult,
    ) -> Self {
        let success = result.success();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id,
            user_id: user.user_id.clone(),
            slack_user_id: user.slack_user_id.clone(),
            channel_id: channel_id.to_string(),
            query_id: result.query_id.0.clone(),
            original_question: question.to_string(),
            generated_sql: (!result.sql.is_empty()).then(|| result.sql.clone()),
            query_result: if success { serde_json::to_value(result).ok() } else { None },
            execution_time_ms: i64::try_from(result.execution_time_ms).unwrap_or(i64::MAX),
            row_count: i64::try_from(result.row_count).unwrap_or(i64::MAX),
            success,
            error_message: result.error_message.clone(),
            metadata: result.metadata.clone(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_active(
        &self,
        user_id: &str,
        channel_id: &str,
    ) -> Result<Option<UserSession>, RepositoryError>;

    async fn save(&self, session: UserSession) -> Result<(), RepositoryError>;

    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), RepositoryError>;

    /// Marks sessions idle since before `cutoff` inactive; returns how many changed.
    async fn expire_idle(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;

    /// Returns the active session for the pair, opening one when none exists.
    async fn open_or_touch(
        &self,
        user_id: &str,
        slack_user_id: &str,
        channel_id: &str,
    ) -> Result<String, RepositoryError> {
        if let Some(session) = self.find_active(user_id, channel_id).await? {
            self.touch(&session.id, Utc::now()).await?;
            return Ok(session.id);
        }

        let session = UserSession::open(user_id, slack_user_id, channel_id);
        let id = session.id.clone();
        self.save(session).await?;
        Ok(id)
    }
}

#[async_trait]
pub trait QueryHistoryRepository: Send + Sync {
    async fn save(&self, record: QueryHistoryRecord) -> Result<(), RepositoryError>;
    async fn find_by_query_id(
        &self,
        query_id: &str,
    ) -> Result<Option<QueryHistoryRecord>, RepositoryError>;
    async fn list_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<QueryHistoryRecord>, RepositoryError>;
}

#[async_trait]
pub trait UserMappingRepository: Send + Sync {
    async fn find_by_slack_id(
        &self,
        slack_user_id: &str,
    ) -> Result<Option<UserMapping>, RepositoryError>;
    async fn save(&self, mapping: UserMapping) -> Result<(), RepositoryError>;
    async fn list(&self) -> Result<Vec<UserMapping>, RepositoryError>;
    async fn deactivate(&self, slack_user_id: &str) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<(), RepositoryError>;
    async fn list_recent(&self, limit: u32) -> Result<Vec<AuditEvent>, RepositoryError>;
}

pub(crate) fn decode_err(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)).map_err(decode_err)
}

pub(crate) fn parse_json(raw: &str) -> Result<Value, RepositoryError> {
    serde_json::from_str(raw).map_err(decode_err)
}
