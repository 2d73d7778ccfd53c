//! Tentative assignments awaiting the operator's decision.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::SweepTimer;
use crate::types::{OperatorId, TaskId};

/// A task offered to one operator, pending accept or reject.
#[derive(Debug, Clone)]
pub struct TentativeAssignment {
    pub operator_id: OperatorId,
    pub assigned_at: DateTime<Utc>,
    offered: Instant,
}

impl TentativeAssignment {
    fn new(operator_id: &str) -> Self {
        Self {
            operator_id: operator_id.to_string(),
            assigned_at: Utc::now(),
            offered: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.offered.elapsed()
    }
}

/// Tracks tentative assignments and takes back the ones whose operator
/// did not answer within the thinking timeout.
///
/// Removing a record is the linearization point between a confirm and a
/// reclaim: whichever removes it first wins, the other sees nothing.
pub struct StalledAssignments {
    records: DashMap<TaskId, TentativeAssignment>,
    thinking_timeout: Duration,
    timer: SweepTimer,
}

impl StalledAssignments {
    pub fn new(thinking_timeout: Duration) -> Self {
        Self {
            records: DashMap::new(),
            thinking_timeout,
            timer: SweepTimer::new("stalled-assignments"),
        }
    }

    /// Record that `task_id` was offered to `operator_id` and make sure the
    /// sweep is running. Returns false if the task is already offered to
    /// someone; the existing record is kept.
    pub fn add<F>(&self, task_id: &str, operator_id: &str, start_sweep: F) -> bool
    where
        F: FnOnce() -> Option<JoinHandle<()>>,
    {
        let inserted = match self.records.entry(task_id.to_string()) {
            Entry::Occupied(existing) => {
                tracing::debug!(
                    task_id = %task_id,
                    operator_id = %operator_id,
                    holder = %existing.get().operator_id,
                    "Task already offered"
                );
                false
            }
            Entry::Vacant(vacant) => {
                vacant.insert(TentativeAssignment::new(operator_id));
                true
            }
        };
        if inserted {
            self.timer.ensure_running(start_sweep);
        }
        inserted
    }

    /// Resolve the tentative assignment if it belongs to `operator_id`.
    pub fn check_and_consume(&self, task_id: &str, operator_id: &str) -> bool {
        self.records
            .remove_if(task_id, |_, record| record.operator_id == operator_id)
            .is_some()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.records.contains_key(task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<TentativeAssignment> {
        self.records.get(task_id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Remove and return every record older than the thinking timeout.
    pub fn take_expired(&self) -> Vec<(TaskId, TentativeAssignment)> {
        let candidates: Vec<TaskId> = self
            .records
            .iter()
            .filter(|r| r.age() > self.thinking_timeout)
            .map(|r| r.key().clone())
            .collect();

        candidates
            .into_iter()
            .filter_map(|task_id| {
                self.records
                    .remove_if(&task_id, |_, r| r.age() > self.thinking_timeout)
            })
            .collect()
    }

    pub fn is_sweeping(&self) -> bool {
        self.timer.is_running()
    }

    /// End-of-pass check from the sweep task.
    pub fn finish_sweep_if_idle(&self) -> bool {
        self.timer.finish_if(|| self.records.is_empty())
    }
}
