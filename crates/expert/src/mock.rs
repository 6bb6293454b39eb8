use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::backend::QueryExpertBackend;
use crate::error::ExpertError;
use crate::protocol::{
    ExecuteRequest, ExecutionOutput, PermissionReport, QuerySearchRequest, SimilarQueries,
    SimilarQuery, TableMetadata, TablePermission, TableSearch, TableSearchRequest,
};

/// Canned answers for local development; every call sleeps for `delay` first.
#[derive(Clone, Debug)]
pub struct MockBackend {
    delay: Duration,
}

impl MockBackend {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[async_trait]
impl QueryExpertBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn find_table_metadata(
        &self,
        _request: &TableSearchRequest,
    ) -> Result<TableSearch, ExpertError> {
        self.pause().await;
        Ok(TableSearch {
            tables: vec![
                TableMetadata {
                    table_name: "ANALYTICS.SALES.REVENUE_BY_CATEGORY".into(),
                    description: "Daily revenue aggregated by product category".into(),
                    columns: vec![
                        "date".into(),
                        "product_category".into(),
                        "revenue".into(),
                        "transaction_count".into(),
                    ],
                    verification_status: Some("VERIFIED".into()),
                    total_users_recent: Some(25),
                    ..Default::default()
                },
                TableMetadata {
                    table_name: "ANALYTICS.SALES.CUSTOMER_METRICS".into(),
                    description: "Customer acquisition and retention metrics".into(),
                    columns: vec![
                        "customer_id".into(),
                        "acquisition_date".into(),
                        "ltv".into(),
                        "churn_risk".into(),
                    ],
                    verification_status: Some("VERIFIED".into()),
                    total_users_recent: Some(18),
                    ..Default::default()
                },
            ],
        })
    }

    async fn search_similar_queries(
        &self,
        _request: &QuerySearchRequest,
    ) -> Result<SimilarQueries, ExpertError> {
        self.pause().await;
        Ok(SimilarQueries {
            queries: vec![
                SimilarQuery {
                    query_text: "SELECT product_category, SUM(revenue) FROM ANALYTICS.SALES.REVENUE_BY_CATEGORY GROUP BY product_category".into(),
                    user_name: Some("john.doe".into()),
                    query_description: Some("Revenue analysis by product category".into()),
                    similarity_score: 0.95,
                },
                SimilarQuery {
                    query_text: "SELECT DATE_TRUNC('month', date) as month, SUM(revenue) FROM ANALYTICS.SALES.REVENUE_BY_CATEGORY GROUP BY month".into(),
                    user_name: Some("jane.smith".into()),
                    query_description: Some("Monthly revenue trends".into()),
                    similarity_score: 0.87,
                },
            ],
        })
    }

    async fn execute_query(&self, request: &ExecuteRequest) -> Result<ExecutionOutput, ExpertError> {
        self.pause().await;
        if request.sql.to_lowercase().contains("revenue") {
            return Ok(ExecutionOutput {
                columns: vec![
                    "product_category".into(),
                    "total_revenue".into(),
                    "transaction_count".into(),
                ],
                rows: vec![
                    vec![json!("Electronics"), json!(1_250_000.50), json!(15_420)],
                    vec![json!("Clothing"), json!(890_000.25), json!(22_100)],
                    vec![json!("Home & Garden"), json!(675_000.75), json!(8_930)],
                    vec![json!("Books"), json!(234_000.00), json!(12_500)],
                ],
                row_count: Some(4),
                execution_time: Some(2.34),
            });
        }

        Ok(ExecutionOutput {
            columns: vec!["id".into(), "name".into(), "value".into()],
            rows: vec![
                vec![json!(1), json!("Sample Data"), json!(100.0)],
                vec![json!(2), json!("Test Record"), json!(200.0)],
            ],
            row_count: Some(2),
            execution_time: Some(1.23),
        })
    }

    async fn check_permissions(&self, tables: &[String]) -> Result<PermissionReport, ExpertError> {
        self.pause().await;
        Ok(PermissionReport {
            permissions: tables
                .iter()
                .map(|table| TablePermission {
                    table: table.clone(),
                    has_access: !table.to_uppercase().contains("RESTRICTED"),
                })
                .collect(),
        })
    }
}
