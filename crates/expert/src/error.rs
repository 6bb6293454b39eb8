use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExpertError {
    #[error("Query Expert server is not healthy")]
    Unhealthy,
    #[error("call to `{tool}` timed out after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("MCP error: {0}")]
    Remote(String),
    #[error("could not decode `{tool}` response: {message}")]
    Decode { tool: String, message: String },
    #[error("query was cancelled")]
    Cancelled,
    #[error("client setup failed: {0}")]
    Setup(String),
}
