//! Error taxonomy surfaced to the transport layer.
//!
//! Benign races (an operator vanishing mid-operation, a channel closing
//! under a write, a double remove) never reach this type; they are logged
//! and absorbed where they happen.

use thiserror::Error;

use crate::types::{OperatorId, TaskId};

/// Machine-readable codes carried in API error envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    /// The task was taken by someone else before the operator could claim it.
    TaskAlreadyAssigned = 910,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task {task_id} is not offered to operator {operator_id}")]
    Forbidden {
        task_id: TaskId,
        operator_id: OperatorId,
    },

    #[error("task {task_id} could not be assigned to operator {operator_id}: {reason}")]
    AssignmentConflict {
        task_id: TaskId,
        operator_id: OperatorId,
        reason: String,
    },

    #[error("operator {operator_id} may not wait for tasks")]
    QueueEntryDenied { operator_id: OperatorId },

    #[error("identity error: {0}")]
    Identity(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Numeric code for the API envelope, 0 when the variant has none.
    pub fn code(&self) -> u16 {
        match self {
            Self::AssignmentConflict { .. } => ErrorCode::TaskAlreadyAssigned.as_u16(),
            _ => 0,
        }
    }
}
