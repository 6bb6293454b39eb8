use chrono::{DateTime, Utc};
use sqlx::Row;

use super::{decode_err, parse_json, parse_timestamp, RepositoryError, SessionRepository, UserSession};
use crate::DbPool;

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<UserSession, RepositoryError> {
    let context: String = row.try_get("context").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_err)?;
    let last_activity: String = row.try_get("last_activity").map_err(decode_err)?;

    Ok(UserSession {
        id: row.try_get("id").map_err(decode_err)?,
        user_id: row.try_get("user_id").map_err(decode_err)?,
        slack_user_id: row.try_get("slack_user_id").map_err(decode_err)?,
        channel_id: row.try_get("channel_id").map_err(decode_err)?,
        context: parse_json(&context)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        last_activity: parse_timestamp(&last_activity)?,
        is_active: row.try_get::<i64, _>("is_active").map_err(decode_err)? != 0,
    })
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn find_active(
        &self,
        user_id: &str,
        channel_id: &str,
    ) -> Result<Option<UserSession>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, user_id, slack_user_id, channel_id, context, created_at, updated_at,
                    last_activity, is_active
             FROM user_sessions
             WHERE user_id = ? AND channel_id = ? AND is_active = 1
             ORDER BY last_activity DESC
             LIMIT 1",
        )
        .bind(user_id)
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_session).transpose()
    }

    async fn save(&self, session: UserSession) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO user_sessions (id, user_id, slack_user_id, channel_id, context,
                                        created_at, updated_at, last_activity, is_active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 context = excluded.context,
                 updated_at = excluded.updated_at,
                 last_activity = excluded.last_activity,
                 is_active = excluded.is_active",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.slack_user_id)
        .bind(&session.channel_id)
        .bind(session.context.to_string())
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .bind(session.last_activity.to_rfc3339())
        .bind(i64::from(session.is_active))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let stamp = at.to_rfc3339();
        sqlx::query("UPDATE user_sessions SET last_activity = ?, updated_at = ? WHERE id = ?")
            .bind(&stamp)
            .bind(&stamp)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn expire_idle(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        // rfc3339 strings in UTC sort chronologically
        let result = sqlx::query(
            "UPDATE user_sessions SET is_active = 0, updated_at = ?
             WHERE is_active = 1 AND last_activity < ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::SqlSessionRepository;
    use crate::repositories::{SessionRepository, UserSession};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlSessionRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlSessionRepository::new(pool)
    }

    #[tokio::test]
    async fn open_or_touch_reuses_the_active_session() {
        let repo = setup().await;

        let first = repo.open_or_touch("alice", "U1", "C1").await.expect("open");
        let second = repo.open_or_touch("alice", "U1", "C1").await.expect("touch");
        let other_channel = repo.open_or_touch("alice", "U1", "C2").await.expect("open c2");

        assert_eq!(first, second);
        assert_ne!(first, other_channel);
    }

    #[tokio::test]
    async fn expire_idle_deactivates_old_sessions_only() {
        let repo = setup().await;

        let mut stale = UserSession::open("bob", "U2", "C1");
        stale.last_activity = Utc::now() - Duration::hours(48);
        repo.save(stale.clone()).await.expect("save stale");
        repo.save(UserSession::open("carol", "U3", "C1")).await.expect("save fresh");

        let expired = repo.expire_idle(Utc::now() - Duration::hours(24)).await.expect("expire");

        assert_eq!(expired, 1);
        assert!(repo.find_active("bob", "C1").await.expect("find bob").is_none());
        assert!(repo.find_active("carol", "C1").await.expect("find carol").is_some());
    }
}
