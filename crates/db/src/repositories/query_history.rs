use sqlx::Row;

use super::{
    decode_err, parse_json, parse_timestamp, QueryHistoryRecord, QueryHistoryRepository,
    RepositoryError,
};
use crate::DbPool;

const SELECT_COLUMNS: &str = "SELECT id, session_id, user_id, slack_user_id, channel_id, query_id,
        original_question, generated_sql, query_result, execution_time_ms, row_count, success,
        error_message, metadata, created_at
 FROM query_history";

pub struct SqlQueryHistoryRepository {
    pool: DbPool,
}

impl SqlQueryHistoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<QueryHistoryRecord, RepositoryError> {
    let query_result: Option<String> = row.try_get("query_result").map_err(decode_err)?;
    let metadata: String = row.try_get("metadata").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;

    Ok(QueryHistoryRecord {
        id: row.try_get("id").map_err(decode_err)?,
        session_id: row.try_get("session_id").map_err(decode_err)?,
        user_id: row.try_get("user_id").map_err(decode_err)?,
        slack_user_id: row.try_get("slack_user_id").map_err(decode_err)?,
        channel_id: row.try_get("channel_id").map_err(decode_err)?,
        query_id: row.try_get("query_id").map_err(decode_err)?,
        original_question: row.try_get("original_question").map_err(decode_err)?,
        generated_sql: row.try_get("generated_sql").map_err(decode_err)?,
        query_result: query_result.as_deref().map(parse_json).transpose()?,
        execution_time_ms: row.try_get("execution_time_ms").map_err(decode_err)?,
        row_count: row.try_get("row_count").map_err(decode_err)?,
        success: row.try_get::<i64, _>("success").map_err(decode_err)? != 0,
        error_message: row.try_get("error_message").map_err(decode_err)?,
        metadata: parse_json(&metadata)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait::async_trait]
impl QueryHistoryRepository for SqlQueryHistoryRepository {
    async fn save(&self, record: QueryHistoryRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO query_history (id, session_id, user_id, slack_user_id, channel_id,
                                        query_id, original_question, generated_sql, query_result,
                                        execution_time_ms, row_count, success, error_message,
                                        metadata, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(query_id) DO UPDATE SET
                 generated_sql = excluded.generated_sql,
                 query_result = excluded.query_result,
                 execution_time_ms = excluded.execution_time_ms,
                 row_count = excluded.row_count,
                 success = excluded.success,
                 error_message = excluded.error_message,
                 metadata = excluded.metadata",
        )
        .bind(&record.id)
        .bind(&record.session_id)
        .bind(&record.user_id)
        .bind(&record.slack_user_id)
        .bind(&record.channel_id)
        .bind(&record.query_id)
        .bind(&record.original_question)
        .bind(&record.generated_sql)
        .bind(record.query_result.as_ref().map(|value| value.to_string()))
        .bind(record.execution_time_ms)
        .bind(record.row_count)
        .bind(i64::from(record.success))
        .bind(&record.error_message)
        .bind(record.metadata.to_string())
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_query_id(
        &self,
        query_id: &str,
    ) -> Result<Option<QueryHistoryRecord>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE query_id = ?"))
            .bind(query_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<QueryHistoryRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE user_id = ? ORDER BY created_at DESC LIMIT ?"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }
}
