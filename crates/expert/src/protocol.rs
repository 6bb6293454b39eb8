//! Wire shapes for `POST /mcp`: `{"method":"tools/call","params":{"name":..,"arguments":..}}`
//! answered by `{"result":..}` or `{"error":..}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const METHOD_TOOLS_LIST: &str = "tools/list";

pub const TOOL_FIND_TABLE_METADATA: &str = "queryexpert__find_table_meta_data";
pub const TOOL_QUERY_EXPERT_SEARCH: &str = "queryexpert__query_expert_search";
pub const TOOL_EXECUTE_QUERY: &str = "queryexpert__execute_query";
pub const TOOL_CHECK_PERMISSIONS: &str = "queryexpert__check_permissions";

pub const ALL_TOOLS: [&str; 4] = [
    TOOL_FIND_TABLE_METADATA,
    TOOL_QUERY_EXPERT_SEARCH,
    TOOL_EXECUTE_QUERY,
    TOOL_CHECK_PERMISSIONS,
];

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolParams {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub params: ToolParams,
}

fn default_method() -> String {
    METHOD_TOOLS_CALL.to_string()
}

impl ToolRequest {
    pub fn call(name: &str, arguments: Map<String, Value>) -> Self {
        Self {
            method: METHOD_TOOLS_CALL.to_string(),
            params: ToolParams { name: Some(name.to_string()), arguments },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub table_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_users_recent: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub table_owners: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSearch {
    #[serde(default)]
    pub tables: Vec<TableMetadata>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarQuery {
    pub query_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_description: Option<String>,
    #[serde(default)]
    pub similarity_score: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarQueries {
    #[serde(default)]
    pub queries: Vec<SimilarQuery>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    /// Seconds reported by the warehouse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePermission {
    pub table: String,
    pub has_access: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionReport {
    #[serde(default)]
    pub permissions: Vec<TablePermission>,
}

impl PermissionReport {
    pub fn denied(&self) -> Vec<&str> {
        self.permissions.iter().filter(|p| !p.has_access).map(|p| p.table.as_str()).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableSearchRequest {
    pub search_text: String,
    pub limit: u32,
    pub verification_status: Option<String>,
}

impl TableSearchRequest {
    pub fn verified(search_text: &str, limit: u32) -> Self {
        Self {
            search_text: search_text.to_string(),
            limit,
            verification_status: Some("VERIFIED".to_string()),
        }
    }

    pub fn to_arguments(&self) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("search_text".into(), Value::String(self.search_text.clone()));
        args.insert("limit".into(), Value::String(self.limit.to_string()));
        if let Some(status) = &self.verification_status {
            args.insert("table_verification_status".into(), Value::String(status.clone()));
        }
        args
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuerySearchRequest {
    pub search_text: String,
    pub limit: u32,
    pub user_name: Option<String>,
}

impl QuerySearchRequest {
    pub fn to_arguments(&self) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("search_text".into(), Value::String(self.search_text.clone()));
        args.insert("limit".into(), Value::String(self.limit.to_string()));
        if let Some(user_name) = &self.user_name {
            args.insert("user_name".into(), Value::String(user_name.clone()));
        }
        args
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecuteRequest {
    pub sql: String,
    pub warehouse: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
}

impl ExecuteRequest {
    pub fn to_arguments(&self) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("query".into(), Value::String(self.sql.clone()));
        for (key, value) in
            [("warehouse", &self.warehouse), ("database", &self.database), ("schema", &self.schema)]
        {
            if let Some(value) = value {
                args.insert(key.into(), Value::String(value.clone()));
            }
        }
        args
    }
}

pub fn permission_arguments(tables: &[String]) -> Map<String, Value> {
    let mut args = Map::new();
    args.insert(
        "table_list".into(),
        Value::Array(tables.iter().cloned().map(Value::String).collect()),
    );
    args
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ExecuteRequest, ExecutionOutput, ToolRequest, TableSearchRequest, TOOL_EXECUTE_QUERY};

    #[test]
    fn tool_call_serialises_to_wire_shape() {
        let request = ToolRequest::call(
            TOOL_EXECUTE_QUERY,
            ExecuteRequest { sql: "SELECT 1".into(), warehouse: Some("WH".into()), ..Default::default() }
                .to_arguments(),
        );

        assert_eq!(
            serde_json::to_value(&request).ok(),
            Some(json!({
                "method": "tools/call",
                "params": {
                    "name": "queryexpert__execute_query",
                    "arguments": {"query": "SELECT 1", "warehouse": "WH"}
                }
            }))
        );
    }

    #[test]
    fn unset_options_are_left_out_of_arguments() {
        let args = TableSearchRequest {
            search_text: "revenue".into(),
            limit: 5,
            verification_status: None,
        }
        .to_arguments();
        assert_eq!(args.len(), 2);
        assert_eq!(args.get("limit"), Some(&json!("5")));
    }

    #[test]
    fn execution_output_tolerates_missing_fields() {
        let output: ExecutionOutput = serde_json::from_value(json!({"columns": ["a"]}))
            .unwrap_or_default();
        assert_eq!(output.columns, vec!["a".to_string()]);
        assert!(output.rows.is_empty());
        assert_eq!(output.row_count, None);
    }
}
