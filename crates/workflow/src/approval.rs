//! Pending human-approval registry.
//!
//! When an execution reaches a human-approval gate, a pending record keyed
//! by (execution id, node id) is registered here and listeners (WebSocket
//! handlers, dashboards) are notified. The execution suspends; resumption
//! happens through `WorkflowExecutor::resume_approval` with the same key.

use dashmap::DashMap;
use tokio::sync::broadcast;

use modelflow_core::types::PendingApproval;

pub struct ApprovalRegistry {
    pending: DashMap<(String, String), PendingApproval>,
    notify_tx: broadcast::Sender<PendingApproval>,
}

impl ApprovalRegistry {
    pub fn new() -> Self {
        let (notify_tx, _) = broadcast::channel(32);
        Self {
            pending: DashMap::new(),
            notify_tx,
        }
    }

    /// Subscribe to new approval requests.
    pub fn subscribe(&self) -> broadcast::Receiver<PendingApproval> {
        self.notify_tx.subscribe()
    }

    /// Register a pending approval and notify listeners.
    pub fn register(&self, approval: PendingApproval) {
        let key = (approval.execution_id.clone(), approval.node_id.clone());
        tracing::info!(
            execution = %approval.execution_id,
            node = %approval.node_id,
            "Approval requested"
        );
        self.pending.insert(key, approval.clone());
        // No listeners is fine; delivery is best-effort
        let _ = self.notify_tx.send(approval);
    }

    /// Look up a pending approval without consuming it.
    pub fn get(&self, execution_id: &str, node_id: &str) -> Option<PendingApproval> {
        self.pending
            .get(&(execution_id.to_string(), node_id.to_string()))
            .map(|entry| entry.clone())
    }

    /// Consume a pending approval for resumption.
    pub fn take(&self, execution_id: &str, node_id: &str) -> Option<PendingApproval> {
        self.pending
            .remove(&(execution_id.to_string(), node_id.to_string()))
            .map(|(_, approval)| approval)
    }

    /// Keys of all currently pending approvals.
    pub fn list_pending(&self) -> Vec<(String, String)> {
        self.pending.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Drop every pending approval for an execution. Used on cancellation;
    /// late resumption attempts then fail as stale.
    pub fn remove_for_execution(&self, execution_id: &str) {
        self.pending.retain(|(exec, _), _| exec != execution_id);
    }
}

impl Default for ApprovalRegistry {
    fn default() -> Self {
        Self::new()
    }
}
