//! Thread-collection synchronization and moderation coordination.
//!
//! The components compose leaf to root:
//!
//! - [`CollectionCache`] — paginated, deduplicated thread list for one scope
//! - [`SelectionSet`] — thread ids chosen for bulk action, kept coherent
//!   with the collection
//! - [`UpdateTracker`] — activity-notification badge for the active scope
//! - [`ModerationCoordinator`] — one-at-a-time bulk mutation state machine
//! - [`ThreadsSession`] — scope lifecycle, network task spawning, and the
//!   completion event loop tying the rest together
//!
//! All state lives on one task; network completions arrive as
//! [`SessionEvent`] messages and are applied in arrival order.

pub mod collection;
mod moderation;
mod selection;
mod session;
mod updates;

pub use collection::{CollectionCache, FetchPlan, FetchTicket, MergeOutcome};
pub use moderation::{BulkOperation, ModerationCoordinator, ModerationState, PendingMutation};
pub use selection::SelectionSet;
pub use session::{SessionEvent, SessionFailure, ThreadsSession};
pub use updates::UpdateTracker;

use crate::api::{ApiError, MutationError};
use thiserror::Error;

/// Errors surfaced by the sync layer.
///
/// `NoScopeActive`, `EmptySelection` and `OperationInProgress` are caller
/// gating violations: unreachable from a correctly-gated UI, but they fail
/// loudly instead of corrupting state. `Validation` and `Api` are the
/// user-facing families, returned for display and retry. Stale responses
/// are not errors at all; they are dropped silently with a debug log.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("No scope is active")]
    NoScopeActive,
    #[error("Selection is empty")]
    EmptySelection,
    #[error("Another operation is already in flight")]
    OperationInProgress,
    #[error("Validation failed: {}", format_errors(.0))]
    Validation(Vec<MutationError>),
    #[error(transparent)]
    Api(ApiError),
}

impl SyncError {
    /// Lift an API error, keeping field-level validation triples intact.
    pub(crate) fn from_api(error: ApiError) -> Self {
        match error {
            ApiError::Validation(errors) => SyncError::Validation(errors),
            other => SyncError::Api(other),
        }
    }
}

fn format_errors(errors: &[MutationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
