//! Routes under `/api/v1/queue`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures_util::{future, stream, StreamExt};
use serde::{Deserialize, Serialize};
use taskq_core::{OperatorSnapshot, QueueError, QueueManager, TaskId};

use crate::api::{ApiError, ApiResponse};
use crate::identity::CurrentOperatorProvider;

#[derive(Clone)]
pub struct AppState {
    pub manager: QueueManager,
    pub identity: Arc<dyn CurrentOperatorProvider>,
    pub keepalive_interval: Duration,
}

impl AppState {
    fn operator_id(&self, headers: &HeaderMap) -> Result<String, ApiError> {
        Ok(self.identity.current_operator_id(headers)?)
    }
}

pub fn router(state: AppState) -> Router {
    let queue = Router::new()
        .route("/take-free", post(take_free))
        .route("/wait-sse", get(wait_sse))
        .route("/:task_id/assign", post(assign))
        .route("/:task_id/reject", post(reject))
        .route("/exit", delete(exit))
        .route("/queue-operators", get(queue_operators))
        .route("/tasks", post(submit_task))
        .route("/health", get(health));

    Router::new()
        .nest("/api/v1/queue", queue)
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeFreeResponse {
    pub task_id: Option<TaskId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTaskRequest {
    pub task_id: TaskId,
    #[serde(default)]
    pub operator_id: Option<String>,
}

async fn take_free(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<TakeFreeResponse>>, ApiError> {
    let operator_id = state.operator_id(&headers)?;

    if !state.manager.backend().can_add_to_queue(&operator_id).await {
        tracing::info!(operator_id = %operator_id, "Operator may not take tasks");
        return Err(QueueError::QueueEntryDenied { operator_id }.into());
    }

    // Waiting operators are served first through their streams.
    let task_id = if state.manager.is_empty() {
        state.manager.take_free_task(&operator_id).await
    } else {
        None
    };
    Ok(Json(ApiResponse::success(TakeFreeResponse { task_id })))
}

async fn wait_sse(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let operator_id = match state.operator_id(&headers) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };

    let mut ticket = match state.manager.wait(&operator_id).await {
        Ok(ticket) => ticket,
        Err(QueueError::QueueEntryDenied { .. }) => return StatusCode::NO_CONTENT.into_response(),
        Err(e) => return ApiError::from(e).into_response(),
    };
    tracing::info!(
        operator_id = %operator_id,
        channel_id = ticket.channel_id(),
        "Operator waiting for a task"
    );

    let handoff = stream::once(async move {
        let handoff = ticket.recv().await?;
        tracing::info!(
            operator_id = %ticket.operator_id(),
            task_id = %handoff.task_id,
            assigned = handoff.already_assigned,
            "Task sent to operator"
        );
        match Event::default().event("task").json_data(&handoff) {
            Ok(event) => Some(event),
            Err(e) => {
                ticket.abandon(QueueError::Internal(format!(
                    "failed to encode task {}: {e}",
                    handoff.task_id
                )));
                None
            }
        }
    })
    .filter_map(future::ready)
    .map(Ok::<_, Infallible>);

    Sse::new(handoff)
        .keep_alive(
            KeepAlive::new()
                .interval(state.keepalive_interval)
                .event(Event::default().event("connection").data("reconnect")),
        )
        .into_response()
}

async fn assign(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let operator_id = state.operator_id(&headers)?;
    state.manager.assign(&task_id, &operator_id).await?;
    Ok(Json(ApiResponse::empty()))
}

async fn reject(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let operator_id = state.operator_id(&headers)?;
    state.manager.reject(&task_id, &operator_id).await?;
    Ok(Json(ApiResponse::empty()))
}

async fn exit(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let operator_id = state.operator_id(&headers)?;
    state.manager.exit(&operator_id);
    Ok(Json(ApiResponse::empty()))
}

async fn queue_operators(State(state): State<AppState>) -> Json<ApiResponse<Vec<OperatorSnapshot>>> {
    Json(ApiResponse::success(state.manager.list_all()))
}

async fn submit_task(
    State(state): State<AppState>,
    Json(req): Json<SubmitTaskRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let task_id = req.task_id.trim();
    if task_id.is_empty() {
        return Err(ApiError::bad_request("missing taskId"));
    }

    match req.operator_id.as_deref().map(str::trim) {
        Some(operator_id) if !operator_id.is_empty() => {
            state.manager.submit_pre_assigned(task_id, operator_id);
        }
        _ => state.manager.submit_unassigned(task_id).await,
    }
    Ok(Json(ApiResponse::empty()))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "queuedOperators": state.manager.registry().len(),
        "tentativeTasks": state.manager.stalled().len(),
        "pendingTasks": state.manager.pending().len(),
    }))
}
