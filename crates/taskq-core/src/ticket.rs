//! Scoped wait handle.

use crate::channels::HandoffReceiver;
use crate::error::QueueError;
use crate::manager::QueueManager;
use crate::types::{OperatorId, TaskHandoff};

/// One open wait of an operator.
///
/// Dropping the ticket before a handoff arrived (client disconnect, server
/// shutdown) closes the channel and takes the operator out of the queue
/// unless it still waits elsewhere. The same happens after a pre-assigned
/// handoff. After a tentative offer the operator stays queued until it
/// accepts or rejects.
pub struct WaitTicket {
    manager: QueueManager,
    operator_id: OperatorId,
    receiver: HandoffReceiver,
    offered: bool,
}

impl WaitTicket {
    pub(crate) fn new(manager: QueueManager, operator_id: &str, receiver: HandoffReceiver) -> Self {
        Self {
            manager,
            operator_id: operator_id.to_string(),
            receiver,
            offered: false,
        }
    }

    pub fn operator_id(&self) -> &str {
        &self.operator_id
    }

    pub fn channel_id(&self) -> u64 {
        self.receiver.id()
    }

    /// Wait for the handoff. `None` means the wait was ended from the
    /// queue side (exit, eviction).
    pub async fn recv(&mut self) -> Option<TaskHandoff> {
        let handoff = self.receiver.recv().await;
        if let Some(handoff) = &handoff {
            self.offered = !handoff.already_assigned;
        }
        handoff
    }

    /// End the wait after a fault on the connection side. The operator is
    /// taken out of the queue even if it was holding an offer; the stalled
    /// sweep re-routes that offer.
    pub fn abandon(mut self, err: QueueError) {
        tracing::error!(operator_id = %self.operator_id, error = %err, "Wait failed");
        self.offered = false;
    }
}

impl Drop for WaitTicket {
    fn drop(&mut self) {
        self.receiver.close();
        if self.offered {
            return;
        }
        tracing::debug!(
            operator_id = %self.operator_id,
            channel_id = self.receiver.id(),
            "Wait ended"
        );
        self.manager.remove(&self.operator_id);
    }
}
