//! Renders [`QueryResult`]s as Slack messages, ASCII tables and CSV attachments.

use serde_json::Value;

use goosebot_core::config::BotConfig;
use goosebot_core::{DataExpert, QueryResult};

use crate::blocks::{
    ButtonElement, ButtonStyle, MessageBuilder, MessageTemplate, ACTION_REFINE_QUERY,
    ACTION_SHARE_QUERY,
};

pub const MAX_COLUMN_WIDTH: usize = 20;
pub const PREVIEW_ROWS: usize = 5;
pub const MAX_LISTED_EXPERTS: usize = 3;
pub const MAX_INLINE_SQL_CHARS: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    Permission,
    Timeout,
    Syntax,
    Generic,
}

impl ErrorCategory {
    pub fn classify(message: &str) -> Self {
        let lowered = message.to_lowercase();
        if lowered.contains("permission") {
            Self::Permission
        } else if lowered.contains("timeout") || lowered.contains("timed out") {
            Self::Timeout
        } else if lowered.contains("syntax") {
            Self::Syntax
        } else {
            Self::Generic
        }
    }

    fn emoji(self) -> &'static str {
        match self {
            Self::Permission => "🔒",
            Self::Timeout => "⏰",
            Self::Syntax => "❌",
            Self::Generic => "🚨",
        }
    }

    fn title(self) -> &'static str {
        match self {
            Self::Permission => "Permission Denied",
            Self::Timeout => "Query Timeout",
            Self::Syntax => "Query Syntax Error",
            Self::Generic => "Query Failed",
        }
    }

    fn suggestion(self) -> &'static str {
        match self {
            Self::Permission => "You may need access to the requested data. Contact your data team.",
            Self::Timeout => "Try a more specific query or contact support for optimization.",
            Self::Syntax => {
                "There's an issue with the generated query. Try rephrasing your question."
            }
            Self::Generic => "Please try again or contact support if the issue persists.",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ResultFormatter {
    pub max_inline_rows: usize,
    pub max_result_rows: usize,
    pub interactive_buttons: bool,
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self { max_inline_rows: 10, max_result_rows: 10_000, interactive_buttons: true }
    }
}

impl ResultFormatter {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            max_inline_rows: config.max_inline_rows,
            max_result_rows: config.max_result_rows,
            interactive_buttons: config.enable_interactive_buttons,
        }
    }

    pub fn is_inline(&self, result: &QueryResult) -> bool {
        result.row_count <= self.max_inline_rows
    }

    pub fn format(&self, result: &QueryResult) -> MessageTemplate {
        if !result.success() {
            self.format_error(result)
        } else if self.is_inline(result) {
            self.format_small(result)
        } else {
            self.format_large(result)
        }
    }

    pub fn format_small(&self, result: &QueryResult) -> MessageTemplate {
        let elapsed = format!("⏱️ Executed in {:.2}s", result.execution_secs());
        if result.row_count == 0 {
            return MessageBuilder::new("📊 Query completed successfully, but returned no results.")
                .section("goose.result.sql.v1", |section| {
                    section.mrkdwn(format!("```sql\n{}\n```", result.sql));
                })
                .context("goose.result.meta.v1", |context| {
                    context.mrkdwn(elapsed);
                })
                .build();
        }

        let shown = result.rows.len().min(self.max_inline_rows);
        let table = ascii_table(&result.columns, &result.rows[..shown]);
        let builder = MessageBuilder::new(format!("📊 Query Results ({} rows)", result.row_count))
            .section("goose.result.table.v1", |section| {
                section.mrkdwn(format!("```\n{table}\n```"));
            })
            .context("goose.result.meta.v1", |context| {
                context.mrkdwn(format!("{elapsed} | 📄 {} rows", result.row_count));
            })
            .when(result.sql.chars().count() < MAX_INLINE_SQL_CHARS, |builder| {
                builder.section("goose.result.sql.v1", |section| {
                    section.mrkdwn(format!("*SQL Query:*\n```sql\n{}\n```", result.sql));
                })
            });

        self.finish(builder, result)
    }

    pub fn format_large(&self, result: &QueryResult) -> MessageTemplate {
        let summary = format!(
            "Found {} rows in {:.2} seconds",
            result.row_count,
            result.execution_secs()
        );
        let builder =
            MessageBuilder::new(format!("📊 Large Query Results ({} rows)", result.row_count))
                .section("goose.result.summary.v1", |section| {
                    section.mrkdwn(format!("*Query Summary:*\n{summary}"));
                })
                .section("goose.result.attachment.v1", |section| {
                    section.mrkdwn("📎 Full results will be uploaded as CSV file");
                })
                .when(!result.rows.is_empty(), |builder| {
                    let shown = result.rows.len().min(PREVIEW_ROWS);
                    let preview = ascii_table(&result.columns, &result.rows[..shown]);
                    builder.section("goose.result.preview.v1", |section| {
                        section.mrkdwn(format!("*Preview (first 5 rows):*\n```\n{preview}\n```"));
                    })
                });

        self.finish(builder, result)
    }

    pub fn format_error(&self, result: &QueryResult) -> MessageTemplate {
        let error = result.error_message.as_deref().unwrap_or("Unknown error occurred");
        let category = ErrorCategory::classify(error);

        MessageBuilder::new(format!("{} {}", category.emoji(), category.title()))
            .section("goose.error.summary.v1", |section| {
                section.mrkdwn(format!("{} *{}*\n{error}", category.emoji(), category.title()));
            })
            .section("goose.error.suggestion.v1", |section| {
                section.mrkdwn(format!("💡 *Suggestion:* {}", category.suggestion()));
            })
            .when(!result.sql.is_empty(), |builder| {
                builder.section("goose.error.sql.v1", |section| {
                    section.mrkdwn(format!("*Generated SQL:*\n```sql\n{}\n```", result.sql));
                })
            })
            .build()
    }

    fn finish(&self, builder: MessageBuilder, result: &QueryResult) -> MessageTemplate {
        builder
            .when(!result.experts.is_empty(), |builder| {
                let experts = experts_text(&result.experts);
                builder.section("goose.result.experts.v1", |section| {
                    section.mrkdwn(format!("*Data Experts:*\n{experts}"));
                })
            })
            .when(self.interactive_buttons, |builder| {
                let query_id = result.query_id.as_str();
                builder.actions("goose.result.actions.v1", |actions| {
                    actions
                        .button(
                            ButtonElement::new(ACTION_REFINE_QUERY, "Refine Query")
                                .style(ButtonStyle::Primary)
                                .value(query_id),
                        )
                        .button(ButtonElement::new(ACTION_SHARE_QUERY, "Share with Team").value(query_id));
                })
            })
            .build()
    }

    /// CSV attachment body, capped at `max_result_rows`.
    pub fn csv(&self, result: &QueryResult) -> String {
        let shown = result.rows.len().min(self.max_result_rows);
        csv_content(&result.columns, &result.rows[..shown])
    }
}

fn experts_text(experts: &[DataExpert]) -> String {
    experts
        .iter()
        .take(MAX_LISTED_EXPERTS)
        .map(|expert| format!("• *{}*: {}", expert.user_name, expert.reason))
        .collect::<Vec<_>>()
        .join("\n")
}

fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn fit(text: &str, width: usize) -> String {
    let length = text.chars().count();
    let clipped = if length > width {
        let keep = width.saturating_sub(3);
        format!("{}...", text.chars().take(keep).collect::<String>())
    } else {
        text.to_string()
    };
    let padding = width.saturating_sub(clipped.chars().count());
    format!(" {clipped}{} ", " ".repeat(padding))
}

/// Box-drawn table; columns are capped at [`MAX_COLUMN_WIDTH`] and nulls render as `NULL`.
pub fn ascii_table(columns: &[String], rows: &[Vec<Value>]) -> String {
    if rows.is_empty() {
        return "No data returned".to_string();
    }

    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(|v| cell_text(v).unwrap_or_else(|| "NULL".into())).collect())
        .collect();

    let mut widths: Vec<usize> = columns.iter().map(|column| column.chars().count()).collect();
    for row in &cells {
        for (index, cell) in row.iter().enumerate().take(widths.len()) {
            widths[index] = widths[index].max(cell.chars().count());
        }
    }
    for width in &mut widths {
        *width = (*width).min(MAX_COLUMN_WIDTH);
    }

    let rule = |left: &str, joint: &str, right: &str| {
        let segments: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
        format!("{left}{}{right}", segments.join(joint))
    };
    let line = |values: &[String]| {
        let rendered: Vec<String> =
            values.iter().zip(&widths).map(|(value, width)| fit(value, *width)).collect();
        format!("│{}│", rendered.join("│"))
    };

    let mut lines = vec![rule("┌", "┬", "┐"), line(columns), rule("├", "┼", "┤")];
    lines.extend(cells.iter().map(|row| line(row.as_slice())));
    lines.push(rule("└", "┴", "┘"));
    lines.join("\n")
}

fn csv_field(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

/// RFC 4180 CSV with a header row; nulls become empty cells.
pub fn csv_content(columns: &[String], rows: &[Vec<Value>]) -> String {
    let mut out = String::new();
    let header: Vec<String> = columns.iter().map(|column| csv_field(column)).collect();
    out.push_str(&header.join(","));
    out.push_str("\r\n");
    for row in rows {
        let fields: Vec<String> =
            row.iter().map(|value| csv_field(&cell_text(value).unwrap_or_default())).collect();
        out.push_str(&fields.join(","));
        out.push_str("\r\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use goosebot_core::{DataExpert, QueryId, QueryResult, QueryStatus};

    use super::{ascii_table, csv_content, ErrorCategory, ResultFormatter};
    use crate::blocks::Block;

    fn result(rows: usize) -> QueryResult {
        QueryResult {
            query_id: QueryId::from_parts(1_730_000_000, 3),
            sql: "SELECT category, revenue FROM sales".into(),
            columns: vec!["category".into(), "revenue".into()],
            rows: (0..rows).map(|i| vec![json!(format!("cat{i}")), json!(i * 10)]).collect(),
            row_count: rows,
            execution_time_ms: 2_340,
            status: QueryStatus::Completed,
            error_message: None,
            experts: (0..4)
                .map(|i| DataExpert { user_name: format!("expert{i}"), reason: "owner".into() })
                .collect(),
            similar_tables: Vec::new(),
            metadata: Value::Null,
        }
    }

    fn section_text(block: Option<&Block>) -> String {
        match block {
            Some(Block::Section { text, .. }) => text.text().to_string(),
            other => panic!("expected section, got {other:?}"),
        }
    }

    #[test]
    fn ascii_table_truncates_wide_cells_and_marks_nulls() {
        let table = ascii_table(
            &["name".into(), "note".into()],
            &[vec![json!("a"), Value::Null], vec![json!("b"), json!("x".repeat(30))]],
        );
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with('┌') && lines[0].ends_with('┐'));
        assert!(lines[3].contains(" NULL "));
        assert!(lines[4].contains(&format!("{}...", "x".repeat(17))));
        assert!(!lines[4].contains(&"x".repeat(18)));
        assert!(lines[5].starts_with('└'));
    }

    #[test]
    fn ascii_table_for_no_rows_says_so() {
        assert_eq!(ascii_table(&["a".into()], &[]), "No data returned");
    }

    #[test]
    fn csv_quotes_and_blanks_nulls() {
        let csv = csv_content(
            &["name".into(), "value".into()],
            &[vec![json!("Home, \"Garden\""), Value::Null], vec![json!("Books"), json!(1.5)]],
        );
        assert_eq!(csv, "name,value\r\n\"Home, \"\"Garden\"\"\",\r\nBooks,1.5\r\n");
    }

    #[test]
    fn small_result_lists_three_experts_and_buttons() {
        let message = ResultFormatter::default().format(&result(4));

        assert_eq!(message.fallback_text, "📊 Query Results (4 rows)");
        let experts = section_text(message.find_block("goose.result.experts.v1"));
        assert_eq!(experts.lines().count(), 4);
        assert!(!experts.contains("expert3"));
        assert!(message.has_actions());
        assert!(message.find_block("goose.result.sql.v1").is_some());
    }

    #[test]
    fn buttons_are_omitted_when_disabled_and_long_sql_is_hidden() {
        let formatter = ResultFormatter { interactive_buttons: false, ..ResultFormatter::default() };
        let mut long = result(2);
        long.sql = "x".repeat(1_000);

        let message = formatter.format(&long);

        assert!(!message.has_actions());
        assert!(message.find_block("goose.result.sql.v1").is_none());
    }

    #[test]
    fn large_result_has_summary_and_five_row_preview() {
        let message = ResultFormatter::default().format(&result(25));

        assert_eq!(message.fallback_text, "📊 Large Query Results (25 rows)");
        assert!(section_text(message.find_block("goose.result.summary.v1"))
            .contains("Found 25 rows in 2.34 seconds"));
        let preview = section_text(message.find_block("goose.result.preview.v1"));
        assert!(preview.contains("cat4"));
        assert!(!preview.contains("cat5"));
    }

    #[test]
    fn empty_result_shows_sql_and_timing() {
        let message = ResultFormatter::default().format(&result(0));
        assert_eq!(
            message.fallback_text,
            "📊 Query completed successfully, but returned no results."
        );
        assert!(!message.has_actions());
    }

    #[test]
    fn errors_are_categorised() {
        assert_eq!(ErrorCategory::classify("Permission denied on table"), ErrorCategory::Permission);
        assert_eq!(
            ErrorCategory::classify("call to `x` timed out after 300s"),
            ErrorCategory::Timeout
        );
        assert_eq!(ErrorCategory::classify("SQL syntax error"), ErrorCategory::Syntax);
        assert_eq!(ErrorCategory::classify("boom"), ErrorCategory::Generic);

        let failed = QueryResult::failed(QueryId::from_parts(1, 1), 5, "Query timeout exceeded");
        let message = ResultFormatter::default().format(&failed);
        assert_eq!(message.fallback_text, "⏰ Query Timeout");
        assert!(message.find_block("goose.error.sql.v1").is_none());
    }

    #[test]
    fn csv_respects_max_result_rows() {
        let formatter = ResultFormatter { max_result_rows: 2, ..ResultFormatter::default() };
        assert_eq!(formatter.csv(&result(5)).lines().count(), 3);
    }
}
