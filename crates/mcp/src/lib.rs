//! Query Expert bridge served by the `mcp` process role.
//!
//! Speaks the same `POST /mcp` tools-call protocol as the bot's HTTP backend, answering from a
//! keyword-driven mock catalog. API keys and per-key rate limits are optional.

pub mod auth;
pub mod catalog;
pub mod server;

pub use auth::{ApiKeyConfig, ApiKeyEntry, AuthManager, AuthResult};
pub use catalog::{MockCatalog, ToolProvider, WarehouseUnavailable};
pub use server::{router, serve, BridgeState};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("direct warehouse mode is not available; enable mcp.mock_mode")]
    WarehouseUnavailable,
    #[error("internal error: {0}")]
    Internal(String),
}
