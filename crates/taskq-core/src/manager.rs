//! The matching engine.
//!
//! `QueueManager` ties the operator registry, the handoff channels and the
//! two watchdogs together:
//!
//! 1. `submit_unassigned()` - offer a task to the earliest free operator
//!    the backend accepts, skipping the ones it refuses
//! 2. the operator's waiting connection reads the handoff
//! 3. `assign()` / `reject()` - resolve the tentative offer
//! 4. the stalled-assignment sweep takes back offers nobody answered
//! 5. the retry sweep re-submits tasks that found no operator
//!
//! The manager is a cheap handle; clones share the same queue.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::backend::TaskBackend;
use crate::channels::{ChannelRegistry, HandoffReceiver};
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::registry::OperatorRegistry;
use crate::ticket::WaitTicket;
use crate::types::{OperatorId, OperatorSnapshot, TaskId};
use crate::watchdog::{spawn_sweep, PendingRetries, StalledAssignments};

struct Inner {
    registry: OperatorRegistry,
    channels: ChannelRegistry,
    stalled: StalledAssignments,
    pending: PendingRetries,
    backend: Arc<dyn TaskBackend>,
    config: QueueConfig,
}

#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<Inner>,
}

impl QueueManager {
    pub fn new(backend: Arc<dyn TaskBackend>, config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: OperatorRegistry::new(),
                channels: ChannelRegistry::new(),
                stalled: StalledAssignments::new(config.thinking_timeout()),
                pending: PendingRetries::new(),
                backend,
                config,
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn backend(&self) -> &Arc<dyn TaskBackend> {
        &self.inner.backend
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.inner.registry
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.inner.channels
    }

    pub fn stalled(&self) -> &StalledAssignments {
        &self.inner.stalled
    }

    pub fn pending(&self) -> &PendingRetries {
        &self.inner.pending
    }

    // -----------------------------------------------------------------------
    // Task ingestion
    // -----------------------------------------------------------------------

    /// Offer an unassigned task to the best available operator.
    ///
    /// Free operators are tried in arrival order. An operator whose waits
    /// have all completed is dropped from the queue on the way; one the
    /// backend refuses keeps its place and is only skipped for this task.
    /// If nobody takes the task it is parked for the retry sweep.
    pub async fn submit_unassigned(&self, task_id: &str) {
        tracing::info!(task_id = %task_id, "Unassigned task submitted");

        if let Some(offer) = self.inner.stalled.get(task_id) {
            tracing::debug!(
                task_id = %task_id,
                operator_id = %offer.operator_id,
                "Task is already offered, waiting for the decision"
            );
            return;
        }

        let Some(operator_id) = self.find_operator_for(task_id).await else {
            let queue_empty = self.inner.registry.is_empty();
            self.inner
                .pending
                .add(task_id, queue_empty, || self.spawn_retry_sweep());
            tracing::info!(
                task_id = %task_id,
                queued_operators = self.inner.registry.len(),
                "No operator took the task, parked for retry"
            );
            return;
        };

        if !self
            .inner
            .stalled
            .add(task_id, &operator_id, || self.spawn_stalled_sweep())
        {
            self.inner.registry.change_status_to_free(&operator_id);
            return;
        }

        let delivered = self.inner.channels.push(task_id, &operator_id, false);
        tracing::info!(
            task_id = %task_id,
            operator_id = %operator_id,
            channels = delivered,
            "Task offered to operator"
        );
    }

    /// Deliver a task that the host already assigned to `operator_id`.
    ///
    /// No eligibility check and no thinking window. The operator stops
    /// being matched right away and leaves the queue once its connection
    /// has read the handoff.
    pub fn submit_pre_assigned(&self, task_id: &str, operator_id: &str) {
        let delivered = self.inner.channels.push(task_id, operator_id, true);
        tracing::info!(
            task_id = %task_id,
            operator_id = %operator_id,
            channels = delivered,
            "Pre-assigned task delivered"
        );
        if delivered > 0 {
            // The unread slot would swallow any offer made before the read.
            self.inner.registry.change_status_to_thinking(operator_id);
        }
        self.remove(operator_id);
    }

    /// Walk free operators in arrival order until one is eligible and can be
    /// claimed for `task_id`.
    async fn find_operator_for(&self, task_id: &str) -> Option<OperatorId> {
        let registry = &self.inner.registry;
        let mut cursor: Option<u64> = None;

        loop {
            let (operator_id, priority) = registry.first_free_after(cursor)?;
            cursor = Some(priority);

            match self.inner.channels.all_completed(&operator_id) {
                None => {
                    registry.try_remove(&operator_id);
                    tracing::info!(
                        operator_id = %operator_id,
                        "Dropped queued operator with no open waits"
                    );
                    continue;
                }
                Some(true) => {
                    self.remove(&operator_id);
                    tracing::info!(
                        operator_id = %operator_id,
                        "Dropped queued operator whose waits all completed"
                    );
                    continue;
                }
                Some(false) => {}
            }

            if !self.inner.backend.can_assign(task_id, &operator_id).await {
                tracing::info!(
                    task_id = %task_id,
                    operator_id = %operator_id,
                    "Operator cannot take task, trying next in line"
                );
                continue;
            }

            if registry.try_claim(&operator_id) {
                return Some(operator_id);
            }
            tracing::debug!(
                task_id = %task_id,
                operator_id = %operator_id,
                "Operator was claimed concurrently"
            );
        }
    }

    // -----------------------------------------------------------------------
    // Operator lifecycle
    // -----------------------------------------------------------------------

    /// Open a wait for the operator and put it in the queue.
    ///
    /// An operator that is already queued keeps its position and becomes
    /// free again, so a stale thinking status from an abandoned offer does
    /// not block new matches.
    pub fn add_to_queue(&self, operator_id: &str) -> HandoffReceiver {
        let receiver = self.inner.channels.create_channel(operator_id);

        if self.inner.registry.try_enqueue(operator_id) {
            tracing::info!(operator_id = %operator_id, "Operator joined the queue");
            self.inner.pending.resume(|| self.spawn_retry_sweep());
        } else {
            tracing::info!(operator_id = %operator_id, "Operator was already queued");
        }
        receiver
    }

    /// Check the queue-entry gate, then open a wait.
    pub async fn wait(&self, operator_id: &str) -> Result<WaitTicket, QueueError> {
        if !self.inner.backend.can_add_to_queue(operator_id).await {
            tracing::info!(operator_id = %operator_id, "Operator may not wait for tasks");
            return Err(QueueError::QueueEntryDenied {
                operator_id: operator_id.to_string(),
            });
        }
        let receiver = self.add_to_queue(operator_id);
        Ok(WaitTicket::new(self.clone(), operator_id, receiver))
    }

    /// Resolve a tentative offer. True means the caller may finalize; the
    /// operator is *not* removed from the queue by this call.
    pub fn confirm_for_operator(&self, task_id: &str, operator_id: &str) -> bool {
        self.inner.stalled.check_and_consume(task_id, operator_id)
    }

    /// Remove the operator if none of its waits is still open.
    pub fn remove(&self, operator_id: &str) {
        let channels = &self.inner.channels;
        let removable = match channels.all_completed(operator_id) {
            None => true,
            Some(true) => channels.remove_if_completed(operator_id),
            Some(false) => false,
        };
        if !removable {
            tracing::debug!(operator_id = %operator_id, "Operator still has open waits, kept in queue");
            return;
        }

        self.remove_from_queue(operator_id);
        // A wait opened between the two removals must not be orphaned.
        if channels.has_open(operator_id) && self.inner.registry.try_enqueue(operator_id) {
            tracing::debug!(operator_id = %operator_id, "Operator re-queued for a wait opened during removal");
        }
    }

    /// Force every wait of the operator closed and drop it from the queue.
    pub fn remove_all(&self, operator_id: &str) {
        self.remove_from_queue(operator_id);
        let closed = self.inner.channels.complete_all(operator_id);
        if closed > 0 {
            tracing::info!(operator_id = %operator_id, channels = closed, "Closed open waits");
        }
    }

    fn remove_from_queue(&self, operator_id: &str) {
        if self.inner.registry.try_remove(operator_id) {
            tracing::info!(operator_id = %operator_id, "Operator removed from the queue");
        } else {
            tracing::debug!(operator_id = %operator_id, "Operator was not queued");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.registry.is_empty()
    }

    pub fn list_all(&self) -> Vec<OperatorSnapshot> {
        self.inner.registry.list_all()
    }

    // -----------------------------------------------------------------------
    // Operator decisions
    // -----------------------------------------------------------------------

    /// Accept an offered task.
    pub async fn assign(&self, task_id: &str, operator_id: &str) -> Result<(), QueueError> {
        if !self.confirm_for_operator(task_id, operator_id) {
            tracing::warn!(
                task_id = %task_id,
                operator_id = %operator_id,
                "Assign refused, task is not offered to this operator"
            );
            return Err(QueueError::Forbidden {
                task_id: task_id.to_string(),
                operator_id: operator_id.to_string(),
            });
        }

        let result = self.inner.backend.try_assign_task(task_id, operator_id).await;
        if !result.success {
            tracing::info!(
                task_id = %task_id,
                operator_id = %operator_id,
                reason = %result.error,
                "Backend refused the assignment"
            );
            return Err(QueueError::AssignmentConflict {
                task_id: task_id.to_string(),
                operator_id: operator_id.to_string(),
                reason: result.error,
            });
        }

        self.remove(operator_id);
        tracing::info!(task_id = %task_id, operator_id = %operator_id, "Task assigned");
        Ok(())
    }

    /// Decline an offered task; it goes back into matching.
    pub async fn reject(&self, task_id: &str, operator_id: &str) -> Result<(), QueueError> {
        if !self.confirm_for_operator(task_id, operator_id) {
            tracing::warn!(
                task_id = %task_id,
                operator_id = %operator_id,
                "Reject refused, task is not offered to this operator"
            );
            return Err(QueueError::Forbidden {
                task_id: task_id.to_string(),
                operator_id: operator_id.to_string(),
            });
        }

        self.remove(operator_id);
        tracing::info!(task_id = %task_id, operator_id = %operator_id, "Task rejected");
        self.submit_unassigned(task_id).await;
        Ok(())
    }

    /// Leave the queue from every connection at once.
    pub fn exit(&self, operator_id: &str) {
        self.remove_all(operator_id);
        tracing::info!(operator_id = %operator_id, "Operator exited the queue");
    }

    /// Pull path for an operator that is not waiting: assign it the first
    /// free task from the backend it can take.
    pub async fn take_free_task(&self, operator_id: &str) -> Option<TaskId> {
        if self.inner.registry.contains(operator_id) {
            return None;
        }

        let backend = &self.inner.backend;
        let mut seen = HashSet::new();
        let mut candidate = backend.free_task_for_operator(operator_id).await;

        while let Some(task_id) = candidate {
            if !seen.insert(task_id.clone()) {
                tracing::warn!(task_id = %task_id, "Free task source repeated a task, stopping");
                return None;
            }

            if self.inner.stalled.contains(&task_id) {
                tracing::info!(
                    task_id = %task_id,
                    operator_id = %operator_id,
                    "Task is offered to another operator"
                );
            } else if backend.can_assign(&task_id, operator_id).await {
                let result = backend.try_assign_task(&task_id, operator_id).await;
                if result.success {
                    tracing::info!(task_id = %task_id, operator_id = %operator_id, "Free task assigned");
                    return Some(task_id);
                }
                tracing::info!(
                    task_id = %task_id,
                    operator_id = %operator_id,
                    reason = %result.error,
                    "Free task could not be assigned"
                );
            } else {
                tracing::info!(task_id = %task_id, operator_id = %operator_id, "Operator cannot take free task");
            }

            candidate = backend
                .next_free_task_for_operator(&task_id, operator_id)
                .await;
        }
        None
    }

    // -----------------------------------------------------------------------
    // Sweeps
    // -----------------------------------------------------------------------

    fn spawn_stalled_sweep(&self) -> Option<JoinHandle<()>> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.stalled_sweep_interval();
        spawn_sweep("stalled-assignments", run_stalled_sweep(weak, period))
    }

    fn spawn_retry_sweep(&self) -> Option<JoinHandle<()>> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.retry_sweep_interval();
        spawn_sweep("pending-retries", run_retry_sweep(weak, period))
    }

    /// One stalled-assignment pass. Returns true when the sweep should exit.
    async fn reclaim_stalled(&self) -> bool {
        for (task_id, offer) in self.inner.stalled.take_expired() {
            tracing::warn!(
                task_id = %task_id,
                operator_id = %offer.operator_id,
                assigned_at = %offer.assigned_at,
                "Operator did not decide in time, taking task back"
            );
            self.remove_all(&offer.operator_id);
            self.submit_unassigned(&task_id).await;
        }
        self.inner.stalled.finish_sweep_if_idle()
    }

    /// One retry pass. Returns true when the sweep should exit.
    async fn retry_pending(&self) -> bool {
        if self.inner.registry.is_empty() {
            let dropped = self.inner.pending.clear();
            if dropped > 0 {
                tracing::info!(tasks = dropped, "Queue is empty, dropped parked tasks");
            }
        } else {
            for task_id in self.inner.pending.drain() {
                self.submit_unassigned(&task_id).await;
            }
        }
        self.inner.pending.finish_sweep_if_idle()
    }
}

fn sweep_ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn run_stalled_sweep(inner: Weak<Inner>, period: Duration) {
    let mut ticker = sweep_ticker(period);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else { break };
        if (QueueManager { inner }).reclaim_stalled().await {
            break;
        }
    }
}

async fn run_retry_sweep(inner: Weak<Inner>, period: Duration) {
    let mut ticker = sweep_ticker(period);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else { break };
        if (QueueManager { inner }).retry_pending().await {
            break;
        }
    }
}
