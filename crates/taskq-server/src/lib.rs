//! HTTP and server-sent events front end for the task broker.
//!
//! Thin adapter over [`taskq_core::QueueManager`]: operators wait on an SSE
//! stream, accept or reject offers, or pull a free task directly.

pub mod api;
pub mod config;
pub mod http;
pub mod identity;

pub use api::{ApiError, ApiResponse};
pub use config::{ConfigError, ServerConfig};
pub use http::{router, AppState};
pub use identity::{CurrentOperatorProvider, HeaderOperatorProvider, OPERATOR_HEADER};
