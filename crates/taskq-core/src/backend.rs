//! Host-application hooks the broker consults while matching.
//!
//! The broker owns ordering, handoff and timeouts; whether a given
//! operator may take a given task, and recording the final assignment,
//! belong to the host. Implementations may hit a database or another
//! service, so every call returns a boxed future.

use std::future::Future;
use std::pin::Pin;

use crate::types::{AssignResult, TaskId};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait TaskBackend: Send + Sync {
    /// Whether `operator_id` is allowed to be offered `task_id`.
    ///
    /// A `false` here is ordinary control flow: the matcher moves on to
    /// the next operator in line.
    fn can_assign<'a>(&'a self, task_id: &'a str, operator_id: &'a str) -> BoxFuture<'a, bool>;

    /// Record the assignment. Fails when the task was taken by another path.
    fn try_assign_task<'a>(
        &'a self,
        task_id: &'a str,
        operator_id: &'a str,
    ) -> BoxFuture<'a, AssignResult>;

    /// Highest-priority free task for the operator.
    fn free_task_for_operator<'a>(&'a self, operator_id: &'a str)
        -> BoxFuture<'a, Option<TaskId>>;

    /// Next free task after `after_task_id`, used when `after_task_id`
    /// could not be assigned to the operator.
    fn next_free_task_for_operator<'a>(
        &'a self,
        after_task_id: &'a str,
        operator_id: &'a str,
    ) -> BoxFuture<'a, Option<TaskId>>;

    /// Gate checked before an operator may wait for tasks at all.
    fn can_add_to_queue<'a>(&'a self, operator_id: &'a str) -> BoxFuture<'a, bool>;
}
