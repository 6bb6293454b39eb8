use std::collections::BTreeMap;

use serde_json::Value;
use sqlx::Row;

use goosebot_core::audit::{AuditEvent, AuditOutcome};

use super::{decode_err, parse_timestamp, AuditLogRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAuditLogRepository {
    pool: DbPool,
}

impl SqlAuditLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let result: String = row.try_get("result").map_err(decode_err)?;
    let event_data: String = row.try_get("event_data").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;

    let outcome = AuditOutcome::parse(&result)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown audit result `{result}`")))?;
    let event_data: BTreeMap<String, Value> =
        serde_json::from_str(&event_data).map_err(decode_err)?;

    Ok(AuditEvent {
        event_id: row.try_get("id").map_err(decode_err)?,
        event_type: row.try_get("event_type").map_err(decode_err)?,
        action: row.try_get("action").map_err(decode_err)?,
        user_id: row.try_get("user_id").map_err(decode_err)?,
        slack_user_id: row.try_get("slack_user_id").map_err(decode_err)?,
        channel_id: row.try_get("channel_id").map_err(decode_err)?,
        resource: row.try_get("resource").map_err(decode_err)?,
        outcome,
        event_data,
        error_message: row.try_get("error_message").map_err(decode_err)?,
        occurred_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait::async_trait]
impl AuditLogRepository for SqlAuditLogRepository {
    async fn record(&self, event: AuditEvent) -> Result<(), RepositoryError> {
        let event_data = serde_json::to_string(&event.event_data).map_err(decode_err)?;

        sqlx::query(
            "INSERT INTO audit_logs (id, event_type, user_id, slack_user_id, channel_id, action,
                                     resource, result, event_data, error_message, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(&event.user_id)
        .bind(&event.slack_user_id)
        .bind(&event.channel_id)
        .bind(&event.action)
        .bind(&event.resource)
        .bind(event.outcome.as_str())
        .bind(event_data)
        .bind(&event.error_message)
        .bind(event.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, event_type, user_id, slack_user_id, channel_id, action, resource,
                    result, event_data, error_message, created_at
             FROM audit_logs ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }
}

#[cfg(test)]
mod tests {
    use goosebot_core::audit::{AuditEvent, AuditOutcome};
    use serde_json::json;

    use super::SqlAuditLogRepository;
    use crate::repositories::AuditLogRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn records_and_lists_events_newest_first() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlAuditLogRepository::new(pool);

        let request = AuditEvent::new("query_request", "query_request", AuditOutcome::Success)
            .actor("alice", "U1")
            .channel("C1")
            .with_data("question", "revenue last month?");
        let mut complete = AuditEvent::new("query_execute", "query_complete", AuditOutcome::Failure)
            .actor("alice", "U1")
            .resource("query_1_1")
            .error(Some("timeout".to_string()));
        complete.occurred_at = request.occurred_at + chrono::Duration::seconds(1);

        repo.record(request).await.expect("record request");
        repo.record(complete).await.expect("record complete");

        let events = repo.list_recent(10).await.expect("list");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, "query_complete");
        assert_eq!(events[0].outcome, AuditOutcome::Failure);
        assert_eq!(events[0].error_message.as_deref(), Some("timeout"));
        assert_eq!(events[1].event_data.get("question"), Some(&json!("revenue last month?")));
    }
}
