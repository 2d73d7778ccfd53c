//! In-memory task backend for the demo server and tests.
//!
//! Keeps an ordered list of free tasks and an assignment map. Any task id
//! that is not already assigned is assignable, so tasks can be submitted
//! to the broker without registering them first.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use crate::backend::{BoxFuture, TaskBackend};
use crate::types::{AssignResult, OperatorId, TaskId};

#[derive(Default)]
struct BackendState {
    /// Free tasks in priority order.
    free_tasks: Vec<TaskId>,
    assignments: HashMap<TaskId, OperatorId>,
    /// (task, operator) pairs that may not be matched.
    denied: HashSet<(TaskId, OperatorId)>,
    /// Operators refused entry to the queue.
    blocked: HashSet<OperatorId>,
}

#[derive(Default)]
pub struct InMemoryBackend {
    state: RwLock<BackendState>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task to the free list.
    pub async fn add_free_task(&self, task_id: impl Into<TaskId>) {
        let task_id = task_id.into();
        let mut state = self.state.write().await;
        if !state.free_tasks.contains(&task_id) && !state.assignments.contains_key(&task_id) {
            state.free_tasks.push(task_id);
        }
    }

    pub async fn deny(&self, task_id: &str, operator_id: &str) {
        self.state
            .write()
            .await
            .denied
            .insert((task_id.to_string(), operator_id.to_string()));
    }

    pub async fn allow(&self, task_id: &str, operator_id: &str) {
        self.state
            .write()
            .await
            .denied
            .remove(&(task_id.to_string(), operator_id.to_string()));
    }

    pub async fn block_operator(&self, operator_id: &str) {
        self.state.write().await.blocked.insert(operator_id.to_string());
    }

    /// Who the task was finally assigned to, if anyone.
    pub async fn assignee(&self, task_id: &str) -> Option<OperatorId> {
        self.state.read().await.assignments.get(task_id).cloned()
    }

    /// Assign a task directly, bypassing the broker.
    pub async fn assign_directly(&self, task_id: &str, operator_id: &str) {
        let mut state = self.state.write().await;
        state.free_tasks.retain(|t| t != task_id);
        state
            .assignments
            .insert(task_id.to_string(), operator_id.to_string());
    }

    pub async fn free_tasks(&self) -> Vec<TaskId> {
        self.state.read().await.free_tasks.clone()
    }
}

impl TaskBackend for InMemoryBackend {
    fn can_assign<'a>(&'a self, task_id: &'a str, operator_id: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let state = self.state.read().await;
            !state.assignments.contains_key(task_id)
                && !state
                    .denied
                    .contains(&(task_id.to_string(), operator_id.to_string()))
        })
    }

    fn try_assign_task<'a>(
        &'a self,
        task_id: &'a str,
        operator_id: &'a str,
    ) -> BoxFuture<'a, AssignResult> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            if let Some(owner) = state.assignments.get(task_id) {
                return AssignResult::failed(format!("task already assigned to {owner}"));
            }
            state.free_tasks.retain(|t| t != task_id);
            state
                .assignments
                .insert(task_id.to_string(), operator_id.to_string());
            tracing::debug!(task_id = %task_id, operator_id = %operator_id, "Task assigned in backend");
            AssignResult::ok()
        })
    }

    fn free_task_for_operator<'a>(
        &'a self,
        _operator_id: &'a str,
    ) -> BoxFuture<'a, Option<TaskId>> {
        Box::pin(async move { self.state.read().await.free_tasks.first().cloned() })
    }

    fn next_free_task_for_operator<'a>(
        &'a self,
        after_task_id: &'a str,
        _operator_id: &'a str,
    ) -> BoxFuture<'a, Option<TaskId>> {
        Box::pin(async move {
            let state = self.state.read().await;
            let position = state.free_tasks.iter().position(|t| t == after_task_id)?;
            state.free_tasks.get(position + 1).cloned()
        })
    }

    fn can_add_to_queue<'a>(&'a self, operator_id: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move { !self.state.read().await.blocked.contains(operator_id) })
    }
}
