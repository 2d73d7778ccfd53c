//! Tasks that found no eligible operator when submitted.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;

use super::SweepTimer;
use crate::types::TaskId;

/// Parked tasks waiting for a retry pass.
///
/// While the operator queue is empty the sweep stays off and tasks simply
/// wait here; the next operator to join restarts it. A pass that finds the
/// queue empty again drops everything parked.
pub struct PendingRetries {
    tasks: DashMap<TaskId, DateTime<Utc>>,
    timer: SweepTimer,
}

impl PendingRetries {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            timer: SweepTimer::new("pending-retries"),
        }
    }

    /// Park a task. The sweep is started only when operators are queued.
    pub fn add<F>(&self, task_id: &str, queue_empty: bool, start_sweep: F)
    where
        F: FnOnce() -> Option<JoinHandle<()>>,
    {
        self.tasks
            .entry(task_id.to_string())
            .or_insert_with(Utc::now);
        if queue_empty {
            self.timer.stop_if(|| true);
        } else {
            self.timer.ensure_running(start_sweep);
        }
    }

    /// Restart the sweep if tasks are parked.
    pub fn resume<F>(&self, start_sweep: F)
    where
        F: FnOnce() -> Option<JoinHandle<()>>,
    {
        if !self.tasks.is_empty() {
            self.timer.ensure_running(start_sweep);
        }
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Remove and return every parked task, oldest first.
    pub fn drain(&self) -> Vec<TaskId> {
        let mut parked: Vec<(TaskId, DateTime<Utc>)> = self
            .tasks
            .iter()
            .map(|t| (t.key().clone(), *t.value()))
            .collect();
        parked.sort_by_key(|(_, at)| *at);

        parked
            .into_iter()
            .filter_map(|(task_id, _)| self.tasks.remove(&task_id).map(|(id, _)| id))
            .collect()
    }

    /// Drop every parked task; returns how many were dropped.
    pub fn clear(&self) -> usize {
        let dropped = self.tasks.len();
        self.tasks.clear();
        dropped
    }

    pub fn is_sweeping(&self) -> bool {
        self.timer.is_running()
    }

    /// End-of-pass check from the sweep task.
    pub fn finish_sweep_if_idle(&self) -> bool {
        self.timer.finish_if(|| self.tasks.is_empty())
    }
}

impl Default for PendingRetries {
    fn default() -> Self {
        Self::new()
    }
}
