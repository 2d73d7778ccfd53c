//! taskq core - in-memory task-to-operator assignment broker.
//!
//! Operators wait in a FIFO queue ordered by arrival. Submitted tasks are
//! offered to the earliest free operator the backend accepts, delivered
//! through that operator's handoff channels, and must be confirmed within
//! the thinking window before a watchdog takes them back.

pub mod backend;
pub mod channels;
pub mod config;
pub mod error;
pub mod manager;
pub mod mock_backend;
pub mod registry;
pub mod ticket;
pub mod types;
pub mod watchdog;

pub use backend::{BoxFuture, TaskBackend};
pub use channels::{ChannelRegistry, HandoffChannel, HandoffReceiver};
pub use config::QueueConfig;
pub use error::{ErrorCode, QueueError};
pub use manager::QueueManager;
pub use mock_backend::InMemoryBackend;
pub use registry::OperatorRegistry;
pub use ticket::WaitTicket;
pub use types::*;
