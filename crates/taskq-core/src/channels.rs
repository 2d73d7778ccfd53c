//! Per-operator handoff channels.
//!
//! Every wait an operator opens (one per browser tab, reconnect, ...) gets
//! its own single-slot channel. The registry keeps the operator's channels
//! as a copy-on-write list: appending swaps in a new `Arc<Vec<_>>`, so a
//! snapshot handed out earlier never changes under its reader.
//!
//! A channel is *completed* once its receiver has taken a handoff, was
//! closed or dropped, or was force-completed from the registry side.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

use crate::types::{OperatorId, TaskHandoff};

#[derive(Debug)]
struct ChannelState {
    completed: AtomicBool,
    force_complete: Notify,
}

/// Registry-side half of a handoff channel.
#[derive(Debug, Clone)]
pub struct HandoffChannel {
    id: u64,
    tx: mpsc::Sender<TaskHandoff>,
    state: Arc<ChannelState>,
}

/// Why a handoff did not land in a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The channel was completed before or during the write.
    Closed,
    /// The slot already holds an unread handoff.
    Occupied,
}

impl HandoffChannel {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_completed(&self) -> bool {
        self.state.completed.load(Ordering::Acquire) || self.tx.is_closed()
    }

    /// Non-blocking write into the single slot.
    pub fn try_deliver(&self, handoff: TaskHandoff) -> Result<(), DeliveryFailure> {
        if self.is_completed() {
            return Err(DeliveryFailure::Closed);
        }
        self.tx.try_send(handoff).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryFailure::Occupied,
            TrySendError::Closed(_) => DeliveryFailure::Closed,
        })
    }

    /// Complete the channel from the registry side. A receiver waiting on
    /// it wakes up with no handoff.
    pub fn complete(&self) {
        if !self.state.completed.swap(true, Ordering::AcqRel) {
            self.state.force_complete.notify_one();
        }
    }
}

/// Waiter-side half of a handoff channel.
#[derive(Debug)]
pub struct HandoffReceiver {
    id: u64,
    rx: mpsc::Receiver<TaskHandoff>,
    state: Arc<ChannelState>,
}

impl HandoffReceiver {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_completed(&self) -> bool {
        self.state.completed.load(Ordering::Acquire)
    }

    /// Wait for the channel's one handoff.
    ///
    /// Returns `None` if the channel was force-completed or already
    /// completed. The channel is completed when this returns.
    pub async fn recv(&mut self) -> Option<TaskHandoff> {
        if self.is_completed() {
            return None;
        }
        let handoff = tokio::select! {
            biased;
            _ = self.state.force_complete.notified() => None,
            handoff = self.rx.recv() => handoff,
        };
        self.close();
        handoff
    }

    pub fn close(&mut self) {
        self.state.completed.store(true, Ordering::Release);
        self.rx.close();
    }
}

impl Drop for HandoffReceiver {
    fn drop(&mut self) {
        self.state.completed.store(true, Ordering::Release);
    }
}

fn handoff_pair(id: u64) -> (HandoffChannel, HandoffReceiver) {
    let (tx, rx) = mpsc::channel(1);
    let state = Arc::new(ChannelState {
        completed: AtomicBool::new(false),
        force_complete: Notify::new(),
    });
    (
        HandoffChannel {
            id,
            tx,
            state: Arc::clone(&state),
        },
        HandoffReceiver { id, rx, state },
    )
}

pub struct ChannelRegistry {
    channels: DashMap<OperatorId, Arc<Vec<HandoffChannel>>>,
    next_id: AtomicU64,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a new channel for the operator and append it to its list.
    /// Completed channels are dropped from the new list.
    pub fn create_channel(&self, operator_id: &str) -> HandoffReceiver {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (channel, receiver) = handoff_pair(id);

        self.channels
            .entry(operator_id.to_string())
            .and_modify(|list| {
                let mut next: Vec<HandoffChannel> =
                    list.iter().filter(|c| !c.is_completed()).cloned().collect();
                next.push(channel.clone());
                *list = Arc::new(next);
            })
            .or_insert_with(|| Arc::new(vec![channel.clone()]));

        tracing::debug!(operator_id = %operator_id, channel_id = id, "Handoff channel opened");
        receiver
    }

    /// Offer a handoff on every open channel of the operator.
    ///
    /// Returns how many channels accepted it. Writes that lose a race with
    /// a closing channel are dropped; the stalled-assignment watchdog
    /// re-routes tentative tasks that never get confirmed.
    pub fn push(&self, task_id: &str, operator_id: &str, already_assigned: bool) -> usize {
        let Some(channels) = self.get_channels(operator_id) else {
            tracing::debug!(operator_id = %operator_id, task_id = %task_id, "Operator has no open waits");
            return 0;
        };

        if channels.iter().all(HandoffChannel::is_completed) {
            self.remove_if_completed(operator_id);
            tracing::debug!(operator_id = %operator_id, task_id = %task_id, "All operator waits completed");
            return 0;
        }

        let handoff = TaskHandoff::new(task_id, already_assigned);
        let mut delivered = 0;
        for channel in channels.iter().filter(|c| !c.is_completed()) {
            match channel.try_deliver(handoff.clone()) {
                Ok(()) => delivered += 1,
                Err(failure) => tracing::debug!(
                    operator_id = %operator_id,
                    task_id = %task_id,
                    channel_id = channel.id(),
                    ?failure,
                    "Handoff not written"
                ),
            }
        }
        delivered
    }

    /// Snapshot of the operator's channel list.
    pub fn get_channels(&self, operator_id: &str) -> Option<Arc<Vec<HandoffChannel>>> {
        self.channels.get(operator_id).map(|list| Arc::clone(list.value()))
    }

    /// `None` when the operator has no channel list at all.
    pub fn all_completed(&self, operator_id: &str) -> Option<bool> {
        self.get_channels(operator_id)
            .map(|list| list.iter().all(HandoffChannel::is_completed))
    }

    pub fn has_open(&self, operator_id: &str) -> bool {
        self.all_completed(operator_id) == Some(false)
    }

    /// Drop the operator's list without touching its channels.
    pub fn remove(&self, operator_id: &str) {
        self.channels.remove(operator_id);
    }

    /// Drop the list only if every channel in it is completed, atomically
    /// with respect to concurrent `create_channel` calls.
    pub fn remove_if_completed(&self, operator_id: &str) -> bool {
        self.channels
            .remove_if(operator_id, |_, list| list.iter().all(HandoffChannel::is_completed))
            .is_some()
    }

    /// Force-complete every channel of the operator and drop the list.
    /// Returns how many channels were still open.
    pub fn complete_all(&self, operator_id: &str) -> usize {
        let Some((_, list)) = self.channels.remove(operator_id) else {
            return 0;
        };
        let mut open = 0;
        for channel in list.iter().filter(|c| !c.is_completed()) {
            channel.complete();
            open += 1;
        }
        open
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
