//! Bulk moderation state machine.
//!
//! One operation at a time: `submit` snapshots its targets and parks a
//! [`PendingMutation`] until the matching completion arrives. Selection
//! changes made while the operation is in flight never alter the dispatched
//! target set.

use crate::api::{CategoryId, ThreadId};
use crate::sync::SyncError;
use std::time::Instant;

/// A moderation action applied to a set of threads in one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkOperation {
    /// Relocate threads to another category. Out-of-scope afterwards, so
    /// the threads leave the active collection on success.
    Move { destination: CategoryId },
    Delete,
    /// Close or reopen threads in place; they stay in the collection.
    Close { is_closed: bool },
}

impl BulkOperation {
    pub fn name(&self) -> &'static str {
        match self {
            BulkOperation::Move { .. } => "move",
            BulkOperation::Delete => "delete",
            BulkOperation::Close { is_closed: true } => "close",
            BulkOperation::Close { is_closed: false } => "open",
        }
    }

    /// Whether success removes the targets from the active collection.
    pub fn removes_from_scope(&self) -> bool {
        matches!(self, BulkOperation::Move { .. } | BulkOperation::Delete)
    }
}

/// Marker for an in-flight bulk mutation.
///
/// The correlation id travels with the spawned network task and must match
/// on resolution; a completion for a marker that was already resolved or
/// torn down is dropped.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub correlation: u64,
    pub operation: BulkOperation,
    /// Target ids frozen at submit time, in collection order.
    pub targets: Vec<ThreadId>,
    pub submitted_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationState {
    Idle,
    Submitting,
}

#[derive(Debug, Default)]
pub struct ModerationCoordinator {
    pending: Option<PendingMutation>,
    next_correlation: u64,
}

impl ModerationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a bulk operation over `targets`.
    ///
    /// Fails with [`SyncError::EmptySelection`] for an empty snapshot and
    /// [`SyncError::OperationInProgress`] while another submission is
    /// unresolved. Both are caller gating errors, not user-facing ones.
    pub fn submit(
        &mut self,
        operation: BulkOperation,
        targets: Vec<ThreadId>,
    ) -> Result<PendingMutation, SyncError> {
        if targets.is_empty() {
            return Err(SyncError::EmptySelection);
        }
        if self.pending.is_some() {
            return Err(SyncError::OperationInProgress);
        }

        self.next_correlation += 1;
        let marker = PendingMutation {
            correlation: self.next_correlation,
            operation,
            targets,
            submitted_at: Instant::now(),
        };
        tracing::info!(
            correlation = marker.correlation,
            operation = marker.operation.name(),
            targets = marker.targets.len(),
            "Submitting bulk moderation operation"
        );
        self.pending = Some(marker.clone());
        Ok(marker)
    }

    /// Consume the pending marker if `correlation` matches it. Returns
    /// `None` for unknown or stale correlations, leaving state untouched.
    pub fn resolve(&mut self, correlation: u64) -> Option<PendingMutation> {
        match &self.pending {
            Some(pending) if pending.correlation == correlation => self.pending.take(),
            _ => {
                tracing::debug!(correlation, "Ignoring resolution for unknown correlation");
                None
            }
        }
    }

    pub fn state(&self) -> ModerationState {
        if self.pending.is_some() {
            ModerationState::Submitting
        } else {
            ModerationState::Idle
        }
    }

    pub fn pending(&self) -> Option<&PendingMutation> {
        self.pending.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(ids: &[&str]) -> Vec<ThreadId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_submit_empty_selection_rejected() {
        let mut coordinator = ModerationCoordinator::new();
        let result = coordinator.submit(BulkOperation::Delete, Vec::new());
        assert!(matches!(result, Err(SyncError::EmptySelection)));
        assert_eq!(coordinator.state(), ModerationState::Idle);
    }

    #[test]
    fn test_second_submit_while_submitting_rejected() {
        let mut coordinator = ModerationCoordinator::new();
        let first = coordinator
            .submit(BulkOperation::Delete, targets(&["t1"]))
            .unwrap();

        let second = coordinator.submit(BulkOperation::Delete, targets(&["t2"]));
        assert!(matches!(second, Err(SyncError::OperationInProgress)));

        // The first operation still resolves normally.
        let resolved = coordinator.resolve(first.correlation).unwrap();
        assert_eq!(resolved.targets, targets(&["t1"]));
        assert_eq!(coordinator.state(), ModerationState::Idle);
    }

    #[test]
    fn test_resolve_unknown_correlation_is_noop() {
        let mut coordinator = ModerationCoordinator::new();
        let marker = coordinator
            .submit(BulkOperation::Delete, targets(&["t1"]))
            .unwrap();

        assert!(coordinator.resolve(marker.correlation + 100).is_none());
        assert_eq!(coordinator.state(), ModerationState::Submitting);
    }

    #[test]
    fn test_resolved_marker_carries_submit_time_snapshot() {
        let mut coordinator = ModerationCoordinator::new();
        let marker = coordinator
            .submit(
                BulkOperation::Move {
                    destination: "c2".to_string(),
                },
                targets(&["t1", "t2"]),
            )
            .unwrap();

        let resolved = coordinator.resolve(marker.correlation).unwrap();
        assert_eq!(resolved.targets, targets(&["t1", "t2"]));
        assert!(resolved.operation.removes_from_scope());
    }

    #[test]
    fn test_close_does_not_remove_from_scope() {
        let operation = BulkOperation::Close { is_closed: true };
        assert!(!operation.removes_from_scope());
        assert_eq!(operation.name(), "close");
    }
}
