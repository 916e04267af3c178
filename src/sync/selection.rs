//! Selection of threads for bulk moderation.
//!
//! Membership is constrained to threads currently present in the collection
//! cache: `toggle` refuses ids the cache does not hold, and every removal
//! the cache performs is mirrored here through [`reconcile`], the single
//! enforcement point of the selection/collection coherence invariant.
//!
//! [`reconcile`]: SelectionSet::reconcile

use crate::api::ThreadId;
use crate::sync::CollectionCache;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct SelectionSet {
    selected: HashSet<ThreadId>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip membership for `id`. Silently refuses ids absent from the
    /// collection, so selecting a removed or never-fetched thread is
    /// impossible by construction. Returns the resulting membership.
    pub fn toggle(&mut self, id: &str, collection: &CollectionCache) -> bool {
        if !collection.contains(id) {
            tracing::debug!(thread_id = id, "Ignoring toggle for thread not in collection");
            return false;
        }
        if self.selected.remove(id) {
            false
        } else {
            self.selected.insert(id.to_string());
            true
        }
    }

    /// Select every thread currently in the collection.
    pub fn select_all(&mut self, collection: &CollectionCache) {
        self.selected = collection.ids().cloned().collect();
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    /// Drop ids the collection just removed. Called by the session in the
    /// same logical step as the removal, so the selection never references
    /// a dangling thread.
    pub fn reconcile(&mut self, removed: &[ThreadId]) {
        for id in removed {
            self.selected.remove(id);
        }
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selected.contains(id)
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Selected ids in the collection's display order. Used to freeze
    /// bulk-operation targets at submit time.
    pub fn snapshot(&self, collection: &CollectionCache) -> Vec<ThreadId> {
        collection
            .ids()
            .filter(|id| self.selected.contains(*id))
            .cloned()
            .collect()
    }
}
