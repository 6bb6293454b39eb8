//! Slack interface for goosebot
//!
//! - **Socket Mode** (`socket`, `envelope`) - WebSocket session with Slack, acks and reconnects
//! - **Events** (`events`) - mentions, messages, `/goose-query` and button clicks routed to handlers
//! - **Service** (`service`) - the question flow: auth, rate limits, pipeline, history, audit
//! - **Block Kit** (`blocks`, `format`) - message builders and result rendering
//! - **Web API** (`web`) - `chat.*`, `views.open`, file uploads, `auth.test`
//!
//! # Architecture
//!
//! ```text
//! Socket frame → ack → EventDispatcher → Handler → BotService → QueryPipeline
//!                                                      ↓
//!                                 SlackResponder ← ResultFormatter
//! ```

pub mod blocks;
pub mod commands;
pub mod envelope;
pub mod events;
pub mod format;
pub mod service;
pub mod socket;
pub mod web;

pub use events::{bot_dispatcher, EventDispatcher};
pub use service::{BotRepositories, BotService};
pub use socket::{
    ReconnectPolicy, RunnerExit, SocketModeRunner, SocketStatus, WebSocketTransport,
};
pub use web::{SlackResponder, SlackWebClient};
