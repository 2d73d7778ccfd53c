//! Response envelope and error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use taskq_core::QueueError;

/// Envelope shared by every JSON route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub error: Option<String>,
    pub error_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            error: None,
            error_code: 0,
            data: Some(data),
        }
    }

    pub fn failure(error: impl Into<String>, error_code: u16) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            error_code,
            data: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn empty() -> Self {
        Self {
            success: true,
            error: None,
            error_code: 0,
            data: None,
        }
    }
}

/// An error rendered as a failed envelope with a status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: u16,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            code: 0,
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        let status = match &err {
            QueueError::Forbidden { .. } | QueueError::AssignmentConflict { .. } => {
                StatusCode::FORBIDDEN
            }
            QueueError::QueueEntryDenied { .. } => StatusCode::BAD_REQUEST,
            QueueError::Identity(_) => StatusCode::UNAUTHORIZED,
            QueueError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %err, "Request failed");
        }
        Self {
            status,
            code: err.code(),
            message: match err {
                QueueError::AssignmentConflict { reason, .. } => reason,
                other => other.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiResponse::<()>::failure(self.message, self.code)),
        )
            .into_response()
    }
}
