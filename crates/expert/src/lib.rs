//! Query Expert client: the tools-call protocol, backends that speak it, and the pipeline that
//! turns a question into a [`goosebot_core::QueryResult`].

pub mod backend;
pub mod error;
pub mod http;
pub mod mock;
pub mod pipeline;
pub mod protocol;

pub use backend::{build_backend, QueryExpertBackend};
pub use error::ExpertError;
pub use http::HttpBackend;
pub use mock::MockBackend;
pub use pipeline::{ProgressSink, QueryPipeline};
