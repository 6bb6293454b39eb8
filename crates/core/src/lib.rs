pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod manifest;
pub mod process;
pub mod signing;
pub mod throttle;

pub use audit::{AuditEvent, AuditOutcome};
pub use domain::query::{DataExpert, QueryId, QueryResult, QueryStatus, SimilarTable};
pub use domain::user::{Permission, Role, UserContext, UserMapping};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use process::{ProcessRole, Procfile, ProcfileEntry, ProcfileError};
pub use throttle::{QueryThrottle, SlidingWindow, ThrottleDecision, ThrottleScope};
