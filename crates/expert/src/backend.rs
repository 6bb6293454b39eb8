use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use goosebot_core::config::ExpertConfig;

use crate::error::ExpertError;
use crate::http::HttpBackend;
use crate::mock::MockBackend;
use crate::protocol::{
    ExecuteRequest, ExecutionOutput, PermissionReport, QuerySearchRequest, SimilarQueries,
    TableSearch, TableSearchRequest,
};

#[async_trait]
pub trait QueryExpertBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn health_check(&self) -> bool;

    async fn find_table_metadata(
        &self,
        request: &TableSearchRequest,
    ) -> Result<TableSearch, ExpertError>;

    async fn search_similar_queries(
        &self,
        request: &QuerySearchRequest,
    ) -> Result<SimilarQueries, ExpertError>;

    async fn execute_query(&self, request: &ExecuteRequest) -> Result<ExecutionOutput, ExpertError>;

    async fn check_permissions(&self, tables: &[String]) -> Result<PermissionReport, ExpertError>;
}

pub fn build_backend(config: &ExpertConfig) -> Result<Arc<dyn QueryExpertBackend>, ExpertError> {
    if config.mock_mode {
        return Ok(Arc::new(MockBackend::new(Duration::from_millis(config.mock_delay_ms))));
    }

    Ok(Arc::new(HttpBackend::new(&config.mcp_url, Duration::from_secs(config.timeout_secs))?))
}
