use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryId(pub String);

impl QueryId {
    /// Builds the `query_<unix seconds>_<sequence>` identifier used in history and buttons.
    pub fn from_parts(unix_secs: i64, sequence: u64) -> Self {
        Self(format!("query_{unix_secs}_{sequence}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Pending,
    SearchingTables,
    SearchingQueries,
    GeneratingSql,
    Executing,
    Completed,
    Failed,
}

impl QueryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::SearchingTables => "searching_tables",
            Self::SearchingQueries => "searching_queries",
            Self::GeneratingSql => "generating_sql",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Progress line shown while a question is being answered.
    pub fn progress_message(self) -> &'static str {
        match self {
            Self::Pending => "🤔 Let me search for the best way to answer that...",
            Self::SearchingTables => "🔍 Searching for relevant data tables...",
            Self::SearchingQueries => "📊 Looking for similar queries from your team...",
            Self::GeneratingSql => "⚡ Generating optimized SQL query...",
            Self::Executing => "🏃 Executing query against the warehouse...",
            Self::Completed => "✅ Query completed successfully!",
            Self::Failed => "❌ Query execution failed",
        }
    }

    pub fn can_transition_to(self, next: QueryStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::SearchingTables)
                | (Self::SearchingTables, Self::SearchingQueries)
                | (Self::SearchingQueries, Self::GeneratingSql)
                | (Self::GeneratingSql, Self::Executing)
                | (Self::Executing, Self::Completed)
        ) || (!self.is_terminal() && next == Self::Failed)
    }

    pub fn transition_to(&mut self, next: QueryStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            *self = next;
            return Ok(());
        }

        Err(DomainError::InvalidStatusTransition { from: *self, to: next })
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "searching_tables" => Ok(Self::SearchingTables),
            "searching_queries" => Ok(Self::SearchingQueries),
            "generating_sql" => Ok(Self::GeneratingSql),
            "executing" => Ok(Self::Executing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(DomainError::InvariantViolation(format!("unknown query status `{other}`"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataExpert {
    pub user_name: String,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimilarTable {
    pub table_name: String,
    pub description: String,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub query_id: QueryId,
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub execution_time_ms: u64,
    pub status: QueryStatus,
    pub error_message: Option<String>,
    #[serde(default)]
    pub experts: Vec<DataExpert>,
    #[serde(default)]
    pub similar_tables: Vec<SimilarTable>,
    #[serde(default)]
    pub metadata: Value,
}

impl QueryResult {
    pub fn failed(query_id: QueryId, execution_time_ms: u64, error: impl Into<String>) -> Self {
        Self {
            query_id,
            sql: String::new(),
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            execution_time_ms,
            status: QueryStatus::Failed,
            error_message: Some(error.into()),
            experts: Vec::new(),
            similar_tables: Vec::new(),
            metadata: Value::Null,
        }
    }

    pub fn success(&self) -> bool {
        self.status == QueryStatus::Completed && self.error_message.is_none()
    }

    pub fn execution_secs(&self) -> f64 {
        self.execution_time_ms as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{QueryId, QueryResult, QueryStatus};

    #[test]
    fn query_id_has_unix_and_sequence_parts() {
        assert_eq!(QueryId::from_parts(1_730_000_000, 7).as_str(), "query_1730000000_7");
    }

    #[test]
    fn status_round_trips_through_wire_names() {
        for status in [
            QueryStatus::Pending,
            QueryStatus::SearchingTables,
            QueryStatus::SearchingQueries,
            QueryStatus::GeneratingSql,
            QueryStatus::Executing,
            QueryStatus::Completed,
            QueryStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<QueryStatus>(), Ok(status));
        }
        assert_eq!(serde_json::to_value(QueryStatus::GeneratingSql).ok(), Some(json!("generating_sql")));
    }

    #[test]
    fn pipeline_order_is_enforced() {
        let mut status = QueryStatus::Pending;
        assert!(status.transition_to(QueryStatus::SearchingTables).is_ok());
        assert!(status.transition_to(QueryStatus::Executing).is_err());
        assert!(status.transition_to(QueryStatus::Failed).is_ok());
        assert!(status.transition_to(QueryStatus::Pending).is_err());
    }

    #[test]
    fn failed_result_is_not_successful() {
        let result = QueryResult::failed(QueryId::from_parts(1, 1), 12, "timeout");
        assert!(!result.success());
        assert_eq!(result.status, QueryStatus::Failed);
        assert_eq!(result.error_message.as_deref(), Some("timeout"));
    }

    #[test]
    fn completed_result_with_error_is_not_successful() {
        let mut result = QueryResult::failed(QueryId::from_parts(1, 2), 0, "boom");
        result.status = QueryStatus::Completed;
        assert!(!result.success());
        result.error_message = None;
        assert!(result.success());
    }
}
