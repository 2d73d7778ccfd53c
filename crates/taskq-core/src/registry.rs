//! Ordered set of waiting operators.
//!
//! Operators are keyed by id in a sharded concurrent map; FIFO order comes
//! from a monotonic arrival counter assigned once on first enqueue. Lookups
//! that need order (`peek`, `next_peek`, `list_all`) scan a snapshot, so a
//! concurrent insert or removal can only include or miss the boundary
//! element, never corrupt the result.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::types::{OperatorId, OperatorSnapshot, OperatorStatus};

#[derive(Debug, Clone)]
struct QueuedOperator {
    priority: u64,
    status: OperatorStatus,
    enqueued_at: DateTime<Utc>,
}

pub struct OperatorRegistry {
    operators: DashMap<OperatorId, QueuedOperator>,
    /// Next arrival priority. Never reused.
    next_priority: AtomicU64,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self {
            operators: DashMap::new(),
            next_priority: AtomicU64::new(1),
        }
    }

    /// Insert the operator at the back of the queue.
    ///
    /// Returns false if it was already queued; in that case its status is
    /// reset to `Free` and its original position is kept.
    pub fn try_enqueue(&self, operator_id: &str) -> bool {
        match self.operators.entry(operator_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().status = OperatorStatus::Free;
                false
            }
            Entry::Vacant(vacant) => {
                let priority = self.next_priority.fetch_add(1, Ordering::Relaxed);
                vacant.insert(QueuedOperator {
                    priority,
                    status: OperatorStatus::Free,
                    enqueued_at: Utc::now(),
                });
                true
            }
        }
    }

    /// Earliest free operator.
    pub fn peek(&self) -> Option<OperatorId> {
        self.first_free_after(None).map(|(id, _)| id)
    }

    /// Earliest free operator queued after `after`.
    ///
    /// Returns `None` when `after` is no longer queued; use
    /// [`first_free_after`](Self::first_free_after) with a remembered
    /// priority to keep walking past an operator that has left.
    pub fn next_peek(&self, after: &str) -> Option<OperatorId> {
        let priority = self.priority(after)?;
        self.first_free_after(Some(priority)).map(|(id, _)| id)
    }

    /// Earliest free operator whose priority is strictly greater than
    /// `after`, together with its priority.
    pub fn first_free_after(&self, after: Option<u64>) -> Option<(OperatorId, u64)> {
        let mut best: Option<(OperatorId, u64)> = None;
        for entry in self.operators.iter() {
            let op = entry.value();
            if op.status != OperatorStatus::Free {
                continue;
            }
            if after.is_some_and(|floor| op.priority <= floor) {
                continue;
            }
            if best.as_ref().map_or(true, |(_, p)| op.priority < *p) {
                best = Some((entry.key().clone(), op.priority));
            }
        }
        best
    }

    pub fn priority(&self, operator_id: &str) -> Option<u64> {
        self.operators.get(operator_id).map(|op| op.priority)
    }

    pub fn status(&self, operator_id: &str) -> Option<OperatorStatus> {
        self.operators.get(operator_id).map(|op| op.status)
    }

    pub fn try_remove(&self, operator_id: &str) -> bool {
        self.operators.remove(operator_id).is_some()
    }

    /// Mark the operator as holding a tentative assignment. Returns false if
    /// it has already left the queue.
    pub fn change_status_to_thinking(&self, operator_id: &str) -> bool {
        self.set_status(operator_id, OperatorStatus::Thinking)
    }

    /// Make the operator eligible again without moving it in the queue.
    pub fn change_status_to_free(&self, operator_id: &str) -> bool {
        self.set_status(operator_id, OperatorStatus::Free)
    }

    /// Atomically move a free operator to `Thinking`. Returns false if it
    /// is gone or already thinking.
    pub fn try_claim(&self, operator_id: &str) -> bool {
        match self.operators.get_mut(operator_id) {
            Some(mut op) if op.status == OperatorStatus::Free => {
                op.status = OperatorStatus::Thinking;
                true
            }
            _ => false,
        }
    }

    fn set_status(&self, operator_id: &str, status: OperatorStatus) -> bool {
        match self.operators.get_mut(operator_id) {
            Some(mut op) => {
                op.status = status;
                true
            }
            None => {
                tracing::debug!(
                    operator_id = %operator_id,
                    status = %status,
                    "Status change skipped, operator left the queue"
                );
                false
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn contains(&self, operator_id: &str) -> bool {
        self.operators.contains_key(operator_id)
    }

    /// Every queued operator, ordered by arrival.
    pub fn list_all(&self) -> Vec<OperatorSnapshot> {
        let mut all: Vec<OperatorSnapshot> = self
            .operators
            .iter()
            .map(|entry| OperatorSnapshot {
                operator_id: entry.key().clone(),
                priority: entry.priority,
                status: entry.status,
                enqueued_at: entry.enqueued_at,
            })
            .collect();
        all.sort_by_key(|op| op.priority);
        all
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
