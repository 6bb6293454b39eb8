//! Tool implementations answered by the bridge.

use serde_json::{json, Map, Value};

use goosebot_expert::protocol::{
    SimilarQueries, SimilarQuery, TableMetadata, TablePermission, TableSearch, PermissionReport,
    ExecutionOutput, TOOL_CHECK_PERMISSIONS, TOOL_EXECUTE_QUERY, TOOL_FIND_TABLE_METADATA,
    TOOL_QUERY_EXPERT_SEARCH,
};

use crate::ToolError;

const MAX_TABLES: usize = 5;

pub trait ToolProvider: Send + Sync {
    fn call(&self, tool: &str, arguments: &Map<String, Value>) -> Result<Value, ToolError>;
}

pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
}

pub const TOOLS: [ToolDescriptor; 4] = [
    ToolDescriptor {
        name: TOOL_FIND_TABLE_METADATA,
        description: "Find warehouse tables relevant to a natural-language search",
    },
    ToolDescriptor {
        name: TOOL_QUERY_EXPERT_SEARCH,
        description: "Search previously written queries similar to a question",
    },
    ToolDescriptor { name: TOOL_EXECUTE_QUERY, description: "Execute SQL against the warehouse" },
    ToolDescriptor {
        name: TOOL_CHECK_PERMISSIONS,
        description: "Report which of the listed tables the caller may read",
    },
];

pub fn tool_list() -> Value {
    let tools: Vec<Value> = TOOLS
        .iter()
        .map(|tool| json!({"name": tool.name, "description": tool.description}))
        .collect();
    json!({ "tools": tools })
}

/// Keyword-driven canned answers that respond to the wording of the question.
#[derive(Clone, Debug, Default)]
pub struct MockCatalog;

impl ToolProvider for MockCatalog {
    fn call(&self, tool: &str, arguments: &Map<String, Value>) -> Result<Value, ToolError> {
        let encode = |value: Result<Value, serde_json::Error>| {
            value.map_err(|error| ToolError::Internal(error.to_string()))
        };
        match tool {
            TOOL_FIND_TABLE_METADATA => {
                encode(serde_json::to_value(find_tables(&string_arg(arguments, "search_text"))))
            }
            TOOL_QUERY_EXPERT_SEARCH => {
                encode(serde_json::to_value(similar_queries(&string_arg(arguments, "search_text"))))
            }
            TOOL_EXECUTE_QUERY => {
                encode(serde_json::to_value(execute(&string_arg(arguments, "query"))))
            }
            TOOL_CHECK_PERMISSIONS => encode(serde_json::to_value(check_permissions(arguments))),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

/// Stand-in for live warehouse mode, which this bridge does not connect to.
#[derive(Clone, Debug, Default)]
pub struct WarehouseUnavailable;

impl ToolProvider for WarehouseUnavailable {
    fn call(&self, tool: &str, _arguments: &Map<String, Value>) -> Result<Value, ToolError> {
        if TOOLS.iter().any(|known| known.name == tool) {
            Err(ToolError::WarehouseUnavailable)
        } else {
            Err(ToolError::UnknownTool(tool.to_string()))
        }
    }
}

fn string_arg(arguments: &Map<String, Value>, key: &str) -> String {
    arguments.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn mentions_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|word| text.contains(word))
}

fn table(name: &str, description: String, columns: &[&str], users: u64) -> TableMetadata {
    TableMetadata {
        table_name: name.to_string(),
        description,
        columns: columns.iter().map(|column| column.to_string()).collect(),
        verification_status: Some("VERIFIED".to_string()),
        total_users_recent: Some(users),
        table_owners: Vec::new(),
        score: None,
    }
}

pub fn find_tables(search_text: &str) -> TableSearch {
    let search = search_text.to_lowercase();
    let mut tables = Vec::new();

    if mentions_any(&search, &["revenue", "sales", "money", "income", "profit"]) {
        tables.push(table(
            "ANALYTICS.SALES.REVENUE_DAILY",
            format!("Daily revenue metrics - relevant to: '{search}'"),
            &["date", "revenue", "transactions", "product_category"],
            15,
        ));
        tables.push(table(
            "FINANCE.REVENUE.MONTHLY_SUMMARY",
            "Monthly revenue rollups by region".to_string(),
            &["month", "region", "total_revenue", "growth_rate"],
            22,
        ));
    }
    if mentions_any(&search, &["customer", "user", "client", "account"]) {
        tables.push(table(
            "ANALYTICS.CUSTOMERS.CUSTOMER_METRICS",
            format!("Customer data matching: '{search}'"),
            &["customer_id", "signup_date", "ltv", "segment"],
            18,
        ));
        tables.push(table(
            "ANALYTICS.CUSTOMERS.CHURN_PREDICTIONS",
            "Customer churn risk scores".to_string(),
            &["customer_id", "churn_probability", "last_activity"],
            12,
        ));
    }
    if mentions_any(&search, &["product", "item", "inventory", "catalog"]) {
        tables.push(table(
            "ANALYTICS.PRODUCTS.CATALOG",
            format!("Product catalog - searched: '{search}'"),
            &["product_id", "name", "category", "price", "stock"],
            9,
        ));
    }
    if mentions_any(&search, &["transaction", "order", "purchase", "payment"]) {
        tables.push(table(
            "ANALYTICS.TRANSACTIONS.ORDER_DETAILS",
            format!("Transaction records for: '{search}'"),
            &["order_id", "customer_id", "amount", "timestamp"],
            25,
        ));
    }
    if tables.is_empty() {
        tables.push(table(
            "ANALYTICS.GENERAL.DATA_DICTIONARY",
            format!("General data catalog - try refining search: '{search}'"),
            &["table_name", "description", "owner"],
            5,
        ));
    }

    tables.truncate(MAX_TABLES);
    TableSearch { tables }
}

pub fn similar_queries(search_text: &str) -> SimilarQueries {
    let search = search_text.to_lowercase();
    let mut queries = Vec::new();

    if search.contains("revenue") {
        queries.push(SimilarQuery {
            query_text: "SELECT date, SUM(revenue) as total FROM revenue_daily WHERE date >= '2024-01-01' GROUP BY date".to_string(),
            user_name: Some("john.doe".to_string()),
            query_description: Some(format!("Similar to your question about: {search_text}")),
            similarity_score: 0.92,
        });
    }
    if search.contains("customer") {
        queries.push(SimilarQuery {
            query_text: "SELECT customer_id, COUNT(*) as orders FROM transactions GROUP BY customer_id".to_string(),
            user_name: Some("jane.smith".to_string()),
            query_description: Some(format!("Customer analysis related to: {search_text}")),
            similarity_score: 0.88,
        });
    }
    queries.push(SimilarQuery {
        query_text: format!("-- Query related to: {search_text}\nSELECT * FROM relevant_table LIMIT 100"),
        user_name: Some("data.team".to_string()),
        query_description: Some(format!("General query for: {search_text}")),
        similarity_score: 0.75,
    });

    SimilarQueries { queries }
}

pub fn execute(sql: &str) -> ExecutionOutput {
    let sql = sql.to_lowercase();
    if sql.contains("revenue") {
        output(
            &["period", "total_revenue", "transactions", "avg_order_value"],
            vec![
                vec![json!("2024-Q1"), json!(1_250_000.50), json!(15_420), json!(81.05)],
                vec![json!("2024-Q2"), json!(1_450_000.75), json!(17_890), json!(81.08)],
                vec![json!("2024-Q3"), json!(1_680_000.25), json!(19_234), json!(87.35)],
            ],
            1.45,
        )
    } else if sql.contains("customer") {
        output(
            &["customer_segment", "count", "avg_ltv", "churn_rate"],
            vec![
                vec![json!("Premium"), json!(1_250), json!(5_420.50), json!(0.05)],
                vec![json!("Standard"), json!(8_450), json!(1_240.25), json!(0.12)],
                vec![json!("Basic"), json!(15_600), json!(450.75), json!(0.25)],
            ],
            0.89,
        )
    } else if sql.contains("product") {
        output(
            &["product_category", "units_sold", "revenue", "margin_pct"],
            vec![
                vec![json!("Electronics"), json!(5_420), json!(850_000.00), json!(0.35)],
                vec![json!("Clothing"), json!(12_450), json!(420_000.00), json!(0.52)],
                vec![json!("Home Goods"), json!(3_890), json!(290_000.00), json!(0.41)],
            ],
            1.12,
        )
    } else {
        output(
            &["metric", "value", "change_pct"],
            vec![
                vec![json!("Total Records"), json!(125_000), json!(8.5)],
                vec![json!("Active Items"), json!(8_450), json!(12.3)],
                vec![json!("Avg Value"), json!(148.05), json!(6.1)],
            ],
            0.95,
        )
    }
}

fn output(columns: &[&str], rows: Vec<Vec<Value>>, seconds: f64) -> ExecutionOutput {
    ExecutionOutput {
        columns: columns.iter().map(|column| column.to_string()).collect(),
        row_count: Some(rows.len()),
        rows,
        execution_time: Some(seconds),
    }
}

fn check_permissions(arguments: &Map<String, Value>) -> PermissionReport {
    let tables = arguments.get("table_list").and_then(Value::as_array).cloned().unwrap_or_default();
    PermissionReport {
        permissions: tables
            .iter()
            .filter_map(Value::as_str)
            .map(|table| TablePermission {
                table: table.to_string(),
                has_access: !table.to_uppercase().contains("RESTRICTED"),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{execute, find_tables, similar_queries, MockCatalog, ToolProvider, WarehouseUnavailable};
    use crate::ToolError;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn keyword_families_pick_tables_and_cap_at_five() {
        let names: Vec<String> = find_tables("revenue per customer product order")
            .tables
            .into_iter()
            .map(|table| table.table_name)
            .collect();
        assert_eq!(names.len(), 5);
        assert_eq!(names[0], "ANALYTICS.SALES.REVENUE_DAILY");
        assert!(!names.contains(&"ANALYTICS.TRANSACTIONS.ORDER_DETAILS".to_string()));
    }

    #[test]
    fn unmatched_search_falls_back_to_data_dictionary() {
        let search = find_tables("weather");
        assert_eq!(search.tables.len(), 1);
        assert_eq!(search.tables[0].table_name, "ANALYTICS.GENERAL.DATA_DICTIONARY");
    }

    #[test]
    fn similar_queries_always_include_team_query() {
        let queries = similar_queries("Revenue by customer").queries;
        let authors: Vec<_> = queries.iter().filter_map(|q| q.user_name.as_deref()).collect();
        assert_eq!(authors, vec!["john.doe", "jane.smith", "data.team"]);

        let generic = similar_queries("weather").queries;
        assert_eq!(generic.len(), 1);
        assert!((generic[0].similarity_score - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn execution_is_keyed_on_sql_text() {
        assert_eq!(execute("select sum(revenue) from t").columns[0], "period");
        assert_eq!(execute("select * from customers").columns[0], "customer_segment");
        assert_eq!(execute("select 1").columns[0], "metric");
        assert_eq!(execute("select 1").row_count, Some(3));
    }

    #[test]
    fn mock_catalog_dispatches_by_tool_name() {
        let catalog = MockCatalog;
        let result = catalog
            .call(
                "queryexpert__check_permissions",
                &args(json!({"table_list": ["A.B.C", "A.RESTRICTED.D"]})),
            )
            .expect("permissions");
        assert_eq!(result["permissions"][1]["has_access"], json!(false));

        assert_eq!(
            catalog.call("nope", &Map::new()),
            Err(ToolError::UnknownTool("nope".to_string()))
        );
    }

    #[test]
    fn live_mode_reports_missing_warehouse() {
        assert_eq!(
            WarehouseUnavailable.call("queryexpert__execute_query", &Map::new()),
            Err(ToolError::WarehouseUnavailable)
        );
    }
}
