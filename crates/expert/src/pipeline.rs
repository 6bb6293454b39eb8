use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use goosebot_core::config::ExpertConfig;
use goosebot_core::{DataExpert, QueryId, QueryResult, QueryStatus, SimilarTable, UserContext};

use crate::backend::QueryExpertBackend;
use crate::error::ExpertError;
use crate::protocol::{
    ExecuteRequest, QuerySearchRequest, SimilarQueries, TableSearch, TableSearchRequest,
};

const TABLE_SEARCH_LIMIT: u32 = 5;
const QUERY_SEARCH_LIMIT: u32 = 3;
const MAX_EXPERTS: usize = 5;
const FALLBACK_COLUMNS: usize = 5;

/// Receives every status a query passes through, in order.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn on_status(&self, query_id: &QueryId, status: QueryStatus);
}

pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn on_status(&self, _query_id: &QueryId, _status: QueryStatus) {}
}

struct ActiveQuery {
    status: QueryStatus,
    cancel: watch::Sender<bool>,
}

pub struct QueryPipeline {
    backend: Arc<dyn QueryExpertBackend>,
    permits: Arc<Semaphore>,
    sequence: AtomicU64,
    active: Mutex<HashMap<QueryId, ActiveQuery>>,
    warehouse: Option<String>,
}

impl QueryPipeline {
    pub fn new(backend: Arc<dyn QueryExpertBackend>, config: &ExpertConfig) -> Self {
        Self::with_limits(backend, config.max_concurrent_queries, config.warehouse.clone())
    }

    pub fn with_limits(
        backend: Arc<dyn QueryExpertBackend>,
        max_concurrent: usize,
        warehouse: Option<String>,
    ) -> Self {
        Self {
            backend,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            sequence: AtomicU64::new(0),
            active: Mutex::new(HashMap::new()),
            warehouse,
        }
    }

    pub fn backend(&self) -> &Arc<dyn QueryExpertBackend> {
        &self.backend
    }

    pub fn status(&self, query_id: &QueryId) -> Option<QueryStatus> {
        self.active.lock().ok()?.get(query_id).map(|active| active.status)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().map(|active| active.len()).unwrap_or(0)
    }

    /// Signals a running query to stop. Returns false when the id is not active.
    pub fn cancel(&self, query_id: &QueryId) -> bool {
        let Ok(active) = self.active.lock() else {
            return false;
        };
        match active.get(query_id) {
            Some(query) => query.cancel.send(true).is_ok(),
            None => false,
        }
    }

    fn next_query_id(&self) -> QueryId {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        QueryId::from_parts(Utc::now().timestamp(), sequence)
    }

    /// Answers `question` end to end. Failures come back as a failed [`QueryResult`].
    pub async fn run(
        &self,
        question: &str,
        user: &UserContext,
        progress: &dyn ProgressSink,
    ) -> QueryResult {
        let query_id = self.next_query_id();
        let started = Instant::now();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        if let Ok(mut active) = self.active.lock() {
            active.insert(
                query_id.clone(),
                ActiveQuery { status: QueryStatus::Pending, cancel: cancel_tx },
            );
        }

        info!(
            event_name = "expert.query.started",
            query_id = %query_id,
            user_id = %user.user_id,
            question = %question.chars().take(100).collect::<String>(),
        );

        let outcome = tokio::select! {
            outcome = self.answer(&query_id, question, user, progress) => outcome,
            _ = wait_for_cancel(cancel_rx) => Err(ExpertError::Cancelled),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(mut result) => {
                result.execution_time_ms = elapsed_ms;
                self.advance(&query_id, QueryStatus::Completed, progress).await;
                info!(
                    event_name = "expert.query.completed",
                    query_id = %query_id,
                    row_count = result.row_count,
                    execution_time_ms = elapsed_ms,
                );
                result
            }
            Err(err) => {
                error!(
                    event_name = "expert.query.failed",
                    query_id = %query_id,
                    error = %err,
                    execution_time_ms = elapsed_ms,
                );
                self.advance(&query_id, QueryStatus::Failed, progress).await;
                QueryResult::failed(query_id.clone(), elapsed_ms, err.to_string())
            }
        };

        if let Ok(mut active) = self.active.lock() {
            active.remove(&query_id);
        }
        result
    }

    async fn answer(
        &self,
        query_id: &QueryId,
        question: &str,
        user: &UserContext,
        progress: &dyn ProgressSink,
    ) -> Result<QueryResult, ExpertError> {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ExpertError::Setup("query pipeline is shut down".into()))?;

        self.advance(query_id, QueryStatus::SearchingTables, progress).await;
        let tables = self
            .backend
            .find_table_metadata(&TableSearchRequest::verified(question, TABLE_SEARCH_LIMIT))
            .await?;

        self.advance(query_id, QueryStatus::SearchingQueries, progress).await;
        let similar = self
            .backend
            .search_similar_queries(&QuerySearchRequest {
                search_text: question.to_string(),
                limit: QUERY_SEARCH_LIMIT,
                user_name: user.ldap_id.clone(),
            })
            .await?;

        self.advance(query_id, QueryStatus::GeneratingSql, progress).await;
        let sql = generate_sql(&tables, &similar);

        self.advance(query_id, QueryStatus::Executing, progress).await;
        let output = self
            .backend
            .execute_query(&ExecuteRequest {
                sql: sql.clone(),
                warehouse: self.warehouse.clone(),
                ..Default::default()
            })
            .await?;

        let row_count = output.row_count.unwrap_or(output.rows.len());
        Ok(QueryResult {
            query_id: query_id.clone(),
            sql,
            columns: output.columns,
            rows: output.rows,
            row_count,
            execution_time_ms: 0,
            status: QueryStatus::Completed,
            error_message: None,
            experts: extract_experts(&tables, &similar),
            similar_tables: extract_similar_tables(&tables),
            metadata: json!({
                "table_search": tables,
                "similar_queries": similar,
                "user_context": {
                    "user_id": user.user_id,
                    "permissions": user.permissions,
                },
            }),
        })
    }

    async fn advance(&self, query_id: &QueryId, next: QueryStatus, progress: &dyn ProgressSink) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(query) = active.get_mut(query_id) {
                if let Err(err) = query.status.transition_to(next) {
                    warn!(event_name = "expert.query.bad_transition", query_id = %query_id, error = %err);
                }
            }
        }
        progress.on_status(query_id, next).await;
    }
}

async fn wait_for_cancel(mut cancel: watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

pub(crate) fn generate_sql(tables: &TableSearch, similar: &SimilarQueries) -> String {
    let best = similar
        .queries
        .iter()
        .filter(|query| !query.query_text.trim().is_empty())
        .max_by(|a, b| a.similarity_score.total_cmp(&b.similarity_score));
    if let Some(best) = best {
        return best.query_text.clone();
    }

    if let Some(table) = tables.tables.first() {
        if !table.columns.is_empty() {
            let columns = table.columns.iter().take(FALLBACK_COLUMNS).cloned().collect::<Vec<_>>();
            return format!("SELECT {} FROM {} LIMIT 10", columns.join(", "), table.table_name);
        }
    }

    "SELECT 1 as result".to_string()
}

pub(crate) fn extract_experts(tables: &TableSearch, similar: &SimilarQueries) -> Vec<DataExpert> {
    let authors = similar.queries.iter().filter_map(|query| {
        query.user_name.as_ref().map(|user_name| DataExpert {
            user_name: user_name.clone(),
            reason: format!(
                "Has written similar queries: {}",
                query.query_description.as_deref().unwrap_or("N/A")
            ),
        })
    });
    let owners = tables.tables.iter().flat_map(|table| {
        table.table_owners.iter().map(move |owner| DataExpert {
            user_name: owner.clone(),
            reason: format!("Owner of {}", table.table_name),
        })
    });

    authors.chain(owners).take(MAX_EXPERTS).collect()
}

pub(crate) fn extract_similar_tables(tables: &TableSearch) -> Vec<SimilarTable> {
    tables
        .tables
        .iter()
        .map(|table| SimilarTable {
            table_name: table.table_name.clone(),
            description: table.description.clone(),
            reason: format!("Relevance score: {:.2}", table.score.unwrap_or(0.0)),
        })
        .collect()
}
