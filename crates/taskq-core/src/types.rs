//! Identifiers and value types shared across the broker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a waiting operator.
pub type OperatorId = String;
/// Identifier of a task offered to operators.
pub type TaskId = String;

/// Queue status of an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorStatus {
    /// Eligible to receive a new task.
    Free,
    /// Holds an outstanding tentative assignment.
    Thinking,
}

impl std::fmt::Display for OperatorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Free => "free",
            Self::Thinking => "thinking",
        };
        write!(f, "{s}")
    }
}

/// Payload pushed through a handoff channel to a waiting connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandoff {
    #[serde(rename = "taskId")]
    pub task_id: TaskId,
    /// True when the task was already assigned to the operator upstream
    /// and needs no confirmation.
    #[serde(rename = "assigned")]
    pub already_assigned: bool,
}

impl TaskHandoff {
    pub fn new(task_id: impl Into<TaskId>, already_assigned: bool) -> Self {
        Self {
            task_id: task_id.into(),
            already_assigned,
        }
    }
}

/// Point-in-time view of one queued operator, ordered by priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorSnapshot {
    #[serde(rename = "operatorId")]
    pub operator_id: OperatorId,
    pub priority: u64,
    pub status: OperatorStatus,
    #[serde(rename = "enqueuedAt")]
    pub enqueued_at: DateTime<Utc>,
}

/// Outcome of the backend's final assignment attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignResult {
    pub success: bool,
    /// Why the assignment was refused; empty on success.
    pub error: String,
}

impl AssignResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: String::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}
