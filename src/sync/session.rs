//! Per-scope session state and the completion event loop.
//!
//! [`ThreadsSession`] owns the collection cache, selection set, moderation
//! coordinator and update tracker for the active scope, and spawns the
//! network calls that feed them. Every spawned task reports back through a
//! single mpsc channel as a [`SessionEvent`] stamped with the epoch it was
//! issued under; the caller's loop feeds events to [`handle_event`], which
//! applies them one at a time and silently drops completions whose epoch no
//! longer matches (the scope they belonged to was deactivated).
//!
//! [`handle_event`]: ThreadsSession::handle_event

use crate::api::{
    ApiError, ForumClient, Scope, Thread, ThreadId, ThreadPage, ThreadPatch,
};
use crate::sync::{
    BulkOperation, CollectionCache, FetchPlan, FetchTicket, ModerationCoordinator,
    ModerationState, PendingMutation, SelectionSet, SyncError, UpdateTracker,
};
use std::sync::Arc;
use tokio::sync::mpsc;

// ============================================================================
// Events
// ============================================================================

/// Completion messages from spawned network tasks, plus out-of-band
/// activity notifications. Processed strictly in arrival order.
#[derive(Debug)]
pub enum SessionEvent {
    /// A page fetch resolved.
    PageLoaded {
        epoch: u64,
        generation: u64,
        result: Result<ThreadPage, ApiError>,
    },
    /// A bulk moderation mutation resolved.
    MutationResolved {
        epoch: u64,
        correlation: u64,
        result: Result<(), ApiError>,
    },
    /// A title edit resolved with the canonical thread on success.
    TitleResolved {
        epoch: u64,
        thread: ThreadId,
        result: Result<Thread, ApiError>,
    },
    /// The notification channel announced new/updated threads for a scope.
    ActivityNotice { scope: Scope, count: u64 },
}

/// A failure surfaced to the caller after an event was applied.
///
/// Holds the operation name for display and the error itself; validation
/// failures keep their field-level triples intact.
#[derive(Debug)]
pub struct SessionFailure {
    pub operation: &'static str,
    pub error: SyncError,
}

// ============================================================================
// Session
// ============================================================================

/// State for one activated scope. Created whole on `activate`, dropped
/// whole on `deactivate` — nothing carries over between scopes.
struct ScopeState {
    scope: Scope,
    collection: CollectionCache,
    selection: SelectionSet,
    moderation: ModerationCoordinator,
    updates: UpdateTracker,
    /// Thread id of the single in-flight title edit, if any.
    editing_title: Option<ThreadId>,
}

impl ScopeState {
    fn new(scope: Scope) -> Self {
        Self {
            scope,
            collection: CollectionCache::new(),
            selection: SelectionSet::new(),
            moderation: ModerationCoordinator::new(),
            updates: UpdateTracker::new(),
            editing_title: None,
        }
    }
}

pub struct ThreadsSession {
    client: Arc<ForumClient>,
    events_tx: mpsc::Sender<SessionEvent>,
    /// Bumped on every activate/deactivate. Events stamped with an older
    /// epoch belong to a torn-down scope and are discarded on arrival.
    epoch: u64,
    state: Option<ScopeState>,
    /// Most recent unconsumed failure, taken by the caller for display.
    failure: Option<SessionFailure>,
}

impl ThreadsSession {
    pub fn new(client: Arc<ForumClient>, events_tx: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            client,
            events_tx,
            epoch: 0,
            state: None,
            failure: None,
        }
    }

    // ========================================================================
    // Scope lifecycle
    // ========================================================================

    /// Activate `scope`: tear down any previous scope state, start fresh,
    /// and issue the first-page fetch.
    pub fn activate(&mut self, scope: Scope) {
        self.epoch += 1;
        tracing::info!(scope = %scope, epoch = self.epoch, "Activating scope");

        let mut state = ScopeState::new(scope);
        if let FetchPlan::Issue(ticket) = state.collection.begin_load() {
            self.spawn_page_fetch(&state.scope, ticket);
        }
        self.state = Some(state);
        self.failure = None;
    }

    /// Deactivate the current scope. In-flight network calls are not
    /// aborted; their eventual completions carry the old epoch and are
    /// dropped on arrival.
    pub fn deactivate(&mut self) {
        if let Some(state) = self.state.take() {
            tracing::info!(scope = %state.scope, "Deactivating scope");
        }
        self.epoch += 1;
        self.failure = None;
    }

    /// Re-fetch the active scope from the first page, clearing the
    /// selection and acknowledging the pending-updates badge.
    pub fn reload(&mut self) -> Result<FetchPlan, SyncError> {
        let state = self.state.as_mut().ok_or(SyncError::NoScopeActive)?;
        let plan = state.collection.begin_load();
        if let FetchPlan::Issue(ref ticket) = plan {
            state.selection.clear();
            let cleared = state.updates.acknowledge();
            if cleared > 0 {
                tracing::debug!(cleared, "Acknowledged pending updates on reload");
            }
            let scope = state.scope.clone();
            let ticket = ticket.clone();
            self.spawn_page_fetch(&scope, ticket);
        }
        Ok(plan)
    }

    /// Request the next page for the active scope.
    ///
    /// Returns the cache's decision: a second call while a fetch is
    /// outstanding coalesces onto it, and an exhausted cursor is a
    /// successful no-op.
    pub fn fetch_more(&mut self) -> Result<FetchPlan, SyncError> {
        let state = self.state.as_mut().ok_or(SyncError::NoScopeActive)?;
        let plan = state.collection.begin_fetch_more()?;
        if let FetchPlan::Issue(ref ticket) = plan {
            let scope = state.scope.clone();
            let ticket = ticket.clone();
            self.spawn_page_fetch(&scope, ticket);
        }
        Ok(plan)
    }

    // ========================================================================
    // Selection
    // ========================================================================

    pub fn toggle(&mut self, id: &str) -> Result<bool, SyncError> {
        let state = self.state.as_mut().ok_or(SyncError::NoScopeActive)?;
        Ok(state.selection.toggle(id, &state.collection))
    }

    pub fn select_all(&mut self) -> Result<(), SyncError> {
        let state = self.state.as_mut().ok_or(SyncError::NoScopeActive)?;
        state.selection.select_all(&state.collection);
        Ok(())
    }

    pub fn clear_selection(&mut self) -> Result<(), SyncError> {
        let state = self.state.as_mut().ok_or(SyncError::NoScopeActive)?;
        state.selection.clear();
        Ok(())
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Submit a bulk operation over the current selection snapshot.
    ///
    /// The target set is frozen here; selection changes made while the
    /// operation is in flight do not affect it. Returns the correlation id
    /// of the pending mutation.
    pub fn submit_bulk(&mut self, operation: BulkOperation) -> Result<u64, SyncError> {
        let state = self.state.as_mut().ok_or(SyncError::NoScopeActive)?;
        let targets = state.selection.snapshot(&state.collection);
        let marker = state.moderation.submit(operation, targets)?;
        let correlation = marker.correlation;
        self.spawn_bulk(marker);
        Ok(correlation)
    }

    /// Submit a title edit for one thread. No optimistic update: the cached
    /// title only changes when the server confirms the canonical one.
    pub fn edit_title(&mut self, thread: ThreadId, title: String) -> Result<(), SyncError> {
        let state = self.state.as_mut().ok_or(SyncError::NoScopeActive)?;
        if state.editing_title.is_some() {
            return Err(SyncError::OperationInProgress);
        }
        state.editing_title = Some(thread.clone());

        let client = Arc::clone(&self.client);
        let tx = self.events_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = client.edit_thread_title(&thread, &title).await;
            let _ = tx
                .send(SessionEvent::TitleResolved {
                    epoch,
                    thread,
                    result,
                })
                .await;
        });
        Ok(())
    }

    // ========================================================================
    // Event handling
    // ========================================================================

    /// Apply one completion event. Runs to completion before the caller
    /// hands over the next event, so there is exactly one writer of session
    /// state and "concurrency" reduces to completion interleaving.
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::PageLoaded {
                epoch,
                generation,
                result,
            } => {
                if !self.epoch_current(epoch, "page load") {
                    return;
                }
                self.handle_page_loaded(generation, result);
            }
            SessionEvent::MutationResolved {
                epoch,
                correlation,
                result,
            } => {
                if !self.epoch_current(epoch, "bulk mutation") {
                    return;
                }
                self.handle_mutation_resolved(correlation, result);
            }
            SessionEvent::TitleResolved {
                epoch,
                thread,
                result,
            } => {
                if !self.epoch_current(epoch, "title edit") {
                    return;
                }
                self.handle_title_resolved(thread, result);
            }
            SessionEvent::ActivityNotice { scope, count } => {
                self.handle_activity_notice(scope, count);
            }
        }
    }

    fn epoch_current(&self, epoch: u64, what: &'static str) -> bool {
        if epoch != self.epoch {
            tracing::debug!(
                expected = self.epoch,
                got = epoch,
                what,
                "Discarding stale response (scope deactivated)"
            );
            return false;
        }
        true
    }

    fn handle_page_loaded(&mut self, generation: u64, result: Result<ThreadPage, ApiError>) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        match result {
            Ok(page) => {
                if let Some(outcome) = state.collection.merge_page(generation, page) {
                    tracing::debug!(
                        scope = %state.scope,
                        appended = outcome.appended,
                        total = state.collection.len(),
                        has_more = outcome.has_more,
                        "Merged thread page"
                    );
                }
            }
            Err(error) => {
                if state.collection.fetch_failed(generation) {
                    tracing::warn!(scope = %state.scope, error = %error, "Page fetch failed");
                    self.failure = Some(SessionFailure {
                        operation: "load threads",
                        error: SyncError::from_api(error),
                    });
                }
            }
        }
    }

    fn handle_mutation_resolved(&mut self, correlation: u64, result: Result<(), ApiError>) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let Some(pending) = state.moderation.resolve(correlation) else {
            return;
        };

        match result {
            Ok(()) => self.apply_bulk_outcome(pending),
            Err(error) => {
                // Selection is left untouched so the user can retry or
                // adjust it.
                tracing::warn!(
                    operation = pending.operation.name(),
                    targets = pending.targets.len(),
                    error = %error,
                    "Bulk moderation operation failed"
                );
                self.failure = Some(SessionFailure {
                    operation: pending.operation.name(),
                    error: SyncError::from_api(error),
                });
            }
        }
    }

    /// Fold a confirmed bulk mutation into the collection and selection in
    /// one logical step.
    fn apply_bulk_outcome(&mut self, pending: PendingMutation) {
        let Some(state) = self.state.as_mut() else {
            return;
        };

        if pending.operation.removes_from_scope() {
            let removed = state.collection.remove(&pending.targets);
            state.selection.reconcile(&pending.targets);
            tracing::info!(
                operation = pending.operation.name(),
                removed = removed.len(),
                remaining = state.collection.len(),
                "Applied bulk moderation outcome"
            );
        } else if let BulkOperation::Close { is_closed } = pending.operation {
            for id in &pending.targets {
                state.collection.apply_update(id, ThreadPatch::closed(is_closed));
            }
            tracing::info!(
                is_closed,
                targets = pending.targets.len(),
                "Applied bulk close/open outcome"
            );
        }
    }

    fn handle_title_resolved(&mut self, thread: ThreadId, result: Result<Thread, ApiError>) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if state.editing_title.as_deref() != Some(thread.as_str()) {
            tracing::debug!(thread_id = %thread, "Ignoring title resolution with no matching edit");
            return;
        }
        state.editing_title = None;

        match result {
            Ok(canonical) => {
                state
                    .collection
                    .apply_update(&canonical.id, ThreadPatch::title(canonical.title));
                tracing::debug!(thread_id = %thread, "Applied canonical title");
            }
            Err(error) => {
                // Cached title stays as-is; the caller gets the field-level
                // errors verbatim.
                self.failure = Some(SessionFailure {
                    operation: "edit title",
                    error: SyncError::from_api(error),
                });
            }
        }
    }

    fn handle_activity_notice(&mut self, scope: Scope, count: u64) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if state.scope != scope {
            tracing::debug!(notified = %scope, active = %state.scope, "Ignoring activity notice for inactive scope");
            return;
        }
        state.updates.record(count);
    }

    // ========================================================================
    // Read-only surface
    // ========================================================================

    pub fn scope(&self) -> Option<&Scope> {
        self.state.as_ref().map(|s| &s.scope)
    }

    pub fn threads(&self) -> &[Thread] {
        self.state
            .as_ref()
            .map(|s| s.collection.threads())
            .unwrap_or(&[])
    }

    pub fn is_loading(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|s| s.collection.is_fetching())
    }

    pub fn has_more(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.collection.has_more())
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.state
            .as_ref()
            .is_some_and(|s| s.selection.is_selected(id))
    }

    pub fn selection_len(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.selection.len())
    }

    pub fn moderation_state(&self) -> ModerationState {
        self.state
            .as_ref()
            .map_or(ModerationState::Idle, |s| s.moderation.state())
    }

    pub fn pending_updates(&self) -> u64 {
        self.state.as_ref().map_or(0, |s| s.updates.pending())
    }

    pub fn is_editing_title(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.editing_title.is_some())
    }

    /// Take the most recent failure for display, leaving none behind.
    pub fn take_failure(&mut self) -> Option<SessionFailure> {
        self.failure.take()
    }

    // ========================================================================
    // Spawned network tasks
    // ========================================================================

    fn spawn_page_fetch(&self, scope: &Scope, ticket: FetchTicket) {
        let client = Arc::clone(&self.client);
        let tx = self.events_tx.clone();
        let epoch = self.epoch;
        let scope = scope.clone();
        tokio::spawn(async move {
            let result = client.list_threads(&scope, ticket.cursor.as_deref()).await;
            let _ = tx
                .send(SessionEvent::PageLoaded {
                    epoch,
                    generation: ticket.generation,
                    result,
                })
                .await;
        });
    }

    fn spawn_bulk(&self, pending: PendingMutation) {
        let client = Arc::clone(&self.client);
        let tx = self.events_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = match &pending.operation {
                BulkOperation::Move { destination } => {
                    client.bulk_move(&pending.targets, destination).await
                }
                BulkOperation::Delete => client.bulk_delete(&pending.targets).await,
                BulkOperation::Close { is_closed } => {
                    client.bulk_close(&pending.targets, *is_closed).await
                }
            };
            let _ = tx
                .send(SessionEvent::MutationResolved {
                    epoch,
                    correlation: pending.correlation,
                    result,
                })
                .await;
        });
    }
}
