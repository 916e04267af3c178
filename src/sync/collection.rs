//! Paginated, deduplicated thread collection for one scope.
//!
//! The cache is the sole owner of thread data. Network calls live in the
//! session; the cache hands out a [`FetchTicket`] when a request should be
//! issued and later consumes the completion through [`merge_page`] /
//! [`fetch_failed`]. Each `begin_load` bumps a generation counter, so a
//! completion from before a reload is rejected instead of clobbering the
//! fresh state.
//!
//! [`merge_page`]: CollectionCache::merge_page
//! [`fetch_failed`]: CollectionCache::fetch_failed

use crate::api::{Thread, ThreadId, ThreadPage, ThreadPatch};
use crate::sync::SyncError;
use std::collections::HashSet;

/// Identifies one issued page fetch. The spawned network task carries the
/// ticket and returns it with the response for staleness checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub generation: u64,
    pub cursor: Option<String>,
}

/// What the cache decided when asked for a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPlan {
    /// Issue a request with this ticket.
    Issue(FetchTicket),
    /// A fetch is already outstanding; its completion serves this caller too.
    Coalesced,
    /// No further pages; nothing to do.
    Exhausted,
}

/// Result of merging a page into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Threads actually appended (duplicates and tombstoned ids are skipped).
    pub appended: usize,
    pub has_more: bool,
}

pub struct CollectionCache {
    /// Server-ranked order; relative order only ever changes by removal.
    threads: Vec<Thread>,
    /// Identifier index for O(1) dedup and membership checks.
    ids: HashSet<ThreadId>,
    cursor: Option<String>,
    /// First page has arrived at least once.
    loaded: bool,
    fetch_in_flight: bool,
    /// Bumped on every `begin_load`; completions must match to merge.
    generation: u64,
    /// Ids removed by moderation. Re-applied to pages that were in flight
    /// when the removal happened, so a removed thread cannot reappear.
    removed: HashSet<ThreadId>,
}

impl CollectionCache {
    pub fn new() -> Self {
        Self {
            threads: Vec::new(),
            ids: HashSet::new(),
            cursor: None,
            loaded: false,
            fetch_in_flight: false,
            generation: 0,
            removed: HashSet::new(),
        }
    }

    /// Reset the cache and plan the first-page fetch.
    ///
    /// A repeated call while the initial load is still outstanding coalesces
    /// onto the pending request instead of issuing a second one. A reload of
    /// an already-loaded cache resets state and bumps the generation, which
    /// invalidates any page fetch still in flight.
    pub fn begin_load(&mut self) -> FetchPlan {
        if self.fetch_in_flight && !self.loaded {
            tracing::debug!("Initial load already in flight, coalescing");
            return FetchPlan::Coalesced;
        }

        self.threads.clear();
        self.ids.clear();
        self.cursor = None;
        self.loaded = false;
        self.removed.clear();
        self.fetch_in_flight = true;
        self.generation += 1;

        FetchPlan::Issue(FetchTicket {
            generation: self.generation,
            cursor: None,
        })
    }

    /// Plan fetching the next page.
    ///
    /// Fails with [`SyncError::NoScopeActive`] when called before the first
    /// load ever started. Coalesces while a fetch is outstanding and is a
    /// successful no-op once the cursor is exhausted.
    pub fn begin_fetch_more(&mut self) -> Result<FetchPlan, SyncError> {
        if self.fetch_in_flight {
            tracing::debug!("Page fetch already in flight, coalescing");
            return Ok(FetchPlan::Coalesced);
        }
        if !self.loaded {
            return Err(SyncError::NoScopeActive);
        }
        let Some(cursor) = self.cursor.clone() else {
            return Ok(FetchPlan::Exhausted);
        };

        self.fetch_in_flight = true;
        Ok(FetchPlan::Issue(FetchTicket {
            generation: self.generation,
            cursor: Some(cursor),
        }))
    }

    /// Merge a fetched page. Returns `None` when the completion belongs to a
    /// previous generation (the cache was reloaded meanwhile) and nothing
    /// was applied.
    ///
    /// Items whose id is already present are skipped, not overwritten: a
    /// page boundary can shift under concurrent inserts on the server and
    /// re-deliver a thread from the previous page. Items removed while this
    /// page was in flight stay removed.
    pub fn merge_page(&mut self, generation: u64, page: ThreadPage) -> Option<MergeOutcome> {
        if generation != self.generation {
            tracing::debug!(
                expected = self.generation,
                got = generation,
                "Ignoring stale page (generation mismatch)"
            );
            return None;
        }

        self.fetch_in_flight = false;
        self.loaded = true;
        self.cursor = page.next_cursor;

        let mut appended = 0;
        for thread in page.items {
            if self.ids.contains(&thread.id) || self.removed.contains(&thread.id) {
                continue;
            }
            self.ids.insert(thread.id.clone());
            self.threads.push(thread);
            appended += 1;
        }

        Some(MergeOutcome {
            appended,
            has_more: self.cursor.is_some(),
        })
    }

    /// Record a failed fetch. Returns false for stale generations.
    pub fn fetch_failed(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.fetch_in_flight = false;
        true
    }

    /// Merge a partial attribute change into the cached thread, if present.
    /// Returns whether anything was patched.
    pub fn apply_update(&mut self, id: &str, patch: ThreadPatch) -> bool {
        let Some(thread) = self.threads.iter_mut().find(|t| t.id == id) else {
            // Thread lives on a page we never fetched; nothing to reconcile.
            return false;
        };
        if let Some(title) = patch.title {
            thread.title = title;
        }
        if let Some(is_closed) = patch.is_closed {
            thread.is_closed = is_closed;
        }
        true
    }

    /// Remove the given ids, preserving the relative order of survivors.
    ///
    /// Every requested id is tombstoned, including ones not cached yet, so a
    /// page fetch racing the removal cannot resurrect them. Returns the ids
    /// that were actually present.
    pub fn remove(&mut self, ids: &[ThreadId]) -> Vec<ThreadId> {
        let requested: HashSet<&ThreadId> = ids.iter().collect();
        let mut dropped = Vec::new();

        self.threads.retain(|thread| {
            if requested.contains(&thread.id) {
                dropped.push(thread.id.clone());
                false
            } else {
                true
            }
        });
        for id in &dropped {
            self.ids.remove(id);
        }
        self.removed.extend(ids.iter().cloned());

        dropped
    }

    // ========================================================================
    // Read-only snapshot surface
    // ========================================================================

    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Whether another page can be requested.
    pub fn has_more(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn is_fetching(&self) -> bool {
        self.fetch_in_flight
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Iterator over cached ids in display order.
    pub fn ids(&self) -> impl Iterator<Item = &ThreadId> {
        self.threads.iter().map(|t| &t.id)
    }
}

impl Default for CollectionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::CategoryRef;
    use pretty_assertions::assert_eq;

    fn test_thread(id: &str, title: &str) -> Thread {
        Thread {
            id: id.to_string(),
            title: title.to_string(),
            category: CategoryRef {
                id: "c1".to_string(),
            },
            last_posted_at: None,
            is_closed: false,
            is_hidden: false,
            is_pinned: false,
        }
    }

    fn page(ids: &[&str], cursor: Option<&str>) -> ThreadPage {
        ThreadPage {
            items: ids.iter().map(|id| test_thread(id, id)).collect(),
            next_cursor: cursor.map(String::from),
        }
    }

    fn loaded_cache(ids: &[&str], cursor: Option<&str>) -> CollectionCache {
        let mut cache = CollectionCache::new();
        let FetchPlan::Issue(ticket) = cache.begin_load() else {
            panic!("fresh cache must issue a load");
        };
        cache.merge_page(ticket.generation, page(ids, cursor)).unwrap();
        cache
    }

    #[test]
    fn test_load_then_fetch_more_dedups_page_overlap() {
        // Page 1 = [T1, T2, T3], page 2 = [T3, T4] with T3 re-delivered
        // because the page boundary shifted on the server.
        let mut cache = loaded_cache(&["t1", "t2", "t3"], Some("c1"));

        let plan = cache.begin_fetch_more().unwrap();
        let FetchPlan::Issue(ticket) = plan else {
            panic!("expected a fetch, got {:?}", plan);
        };
        assert_eq!(ticket.cursor.as_deref(), Some("c1"));

        let outcome = cache.merge_page(ticket.generation, page(&["t3", "t4"], None)).unwrap();
        assert_eq!(outcome.appended, 1);
        assert!(!outcome.has_more);

        let ids: Vec<&str> = cache.ids().map(String::as_str).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3", "t4"]);
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_fetch_more_before_load_fails() {
        let mut cache = CollectionCache::new();
        assert!(matches!(
            cache.begin_fetch_more(),
            Err(SyncError::NoScopeActive)
        ));
    }

    #[test]
    fn test_fetch_more_coalesces_while_in_flight() {
        let mut cache = loaded_cache(&["t1"], Some("c1"));

        let first = cache.begin_fetch_more().unwrap();
        assert!(matches!(first, FetchPlan::Issue(_)));

        // Second call before the first resolves: no new request.
        let second = cache.begin_fetch_more().unwrap();
        assert_eq!(second, FetchPlan::Coalesced);
    }

    #[test]
    fn test_fetch_more_exhausted_cursor_is_noop() {
        let mut cache = loaded_cache(&["t1"], None);
        assert_eq!(cache.begin_fetch_more().unwrap(), FetchPlan::Exhausted);
    }

    #[test]
    fn test_load_coalesces_while_initial_load_pending() {
        let mut cache = CollectionCache::new();
        assert!(matches!(cache.begin_load(), FetchPlan::Issue(_)));
        assert_eq!(cache.begin_load(), FetchPlan::Coalesced);
    }

    #[test]
    fn test_reload_invalidates_in_flight_page() {
        let mut cache = loaded_cache(&["t1"], Some("c1"));

        let FetchPlan::Issue(stale) = cache.begin_fetch_more().unwrap() else {
            panic!("expected a fetch");
        };

        // User reloads while page 2 is still in flight.
        let FetchPlan::Issue(fresh) = cache.begin_load() else {
            panic!("reload must issue a fetch");
        };
        cache.merge_page(fresh.generation, page(&["t9"], None)).unwrap();

        // The stale page 2 completion arrives late and must be rejected.
        assert!(cache.merge_page(stale.generation, page(&["t2"], None)).is_none());
        let ids: Vec<&str> = cache.ids().map(String::as_str).collect();
        assert_eq!(ids, vec!["t9"]);
    }

    #[test]
    fn test_remove_preserves_relative_order() {
        let mut cache = loaded_cache(&["t1", "t2", "t3", "t4"], None);

        let dropped = cache.remove(&["t2".to_string(), "t4".to_string()]);
        assert_eq!(dropped, vec!["t2".to_string(), "t4".to_string()]);

        let ids: Vec<&str> = cache.ids().map(String::as_str).collect();
        assert_eq!(ids, vec!["t1", "t3"]);
    }

    #[test]
    fn test_removal_reapplied_to_in_flight_page() {
        let mut cache = loaded_cache(&["t1", "t2"], Some("c1"));

        let FetchPlan::Issue(ticket) = cache.begin_fetch_more().unwrap() else {
            panic!("expected a fetch");
        };

        // t3 is deleted by moderation before its page arrives.
        cache.remove(&["t3".to_string()]);

        let outcome = cache.merge_page(ticket.generation, page(&["t3", "t4"], None)).unwrap();
        assert_eq!(outcome.appended, 1);
        assert!(!cache.contains("t3"));
        assert!(cache.contains("t4"));
    }

    #[test]
    fn test_apply_update_patches_title() {
        let mut cache = loaded_cache(&["t1"], None);
        assert!(cache.apply_update("t1", ThreadPatch::title("Renamed")));
        assert_eq!(cache.threads()[0].title, "Renamed");
    }

    #[test]
    fn test_apply_update_absent_thread_is_noop() {
        let mut cache = loaded_cache(&["t1"], None);
        assert!(!cache.apply_update("t99", ThreadPatch::title("Renamed")));
        assert_eq!(cache.threads()[0].title, "t1");
    }

    #[test]
    fn test_apply_update_patches_closed_flag() {
        let mut cache = loaded_cache(&["t1"], None);
        assert!(cache.apply_update("t1", ThreadPatch::closed(true)));
        assert!(cache.threads()[0].is_closed);
    }

    #[test]
    fn test_failed_fetch_clears_in_flight() {
        let mut cache = loaded_cache(&["t1"], Some("c1"));
        let FetchPlan::Issue(ticket) = cache.begin_fetch_more().unwrap() else {
            panic!("expected a fetch");
        };
        assert!(cache.is_fetching());
        assert!(cache.fetch_failed(ticket.generation));
        assert!(!cache.is_fetching());

        // A retry can now be issued with the same cursor.
        assert!(matches!(cache.begin_fetch_more().unwrap(), FetchPlan::Issue(_)));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashSet;

        proptest! {
            /// Any sequence of merged pages, however overlapping, leaves the
            /// id set duplicate-free and the length non-decreasing.
            #[test]
            fn merged_pages_never_duplicate_or_shrink(
                pages in prop::collection::vec(
                    prop::collection::vec(0u8..40, 0..10),
                    1..8,
                )
            ) {
                let mut cache = CollectionCache::new();
                let FetchPlan::Issue(ticket) = cache.begin_load() else {
                    panic!("fresh cache must issue a load");
                };
                let generation = ticket.generation;

                let mut cursor_n = 0;
                let last = pages.len() - 1;
                let mut prev_len = 0;
                for (i, ids) in pages.iter().enumerate() {
                    let cursor = if i == last {
                        None
                    } else {
                        cursor_n += 1;
                        Some(format!("c{}", cursor_n))
                    };
                    let page = ThreadPage {
                        items: ids
                            .iter()
                            .map(|n| test_thread(&format!("t{}", n), "title"))
                            .collect(),
                        next_cursor: cursor,
                    };
                    cache.merge_page(generation, page);

                    prop_assert!(cache.len() >= prev_len);
                    prev_len = cache.len();

                    let unique: HashSet<&ThreadId> = cache.ids().collect();
                    prop_assert_eq!(unique.len(), cache.len());

                    if i < last {
                        // Re-arm the in-flight flag the way the session would.
                        let _ = cache.begin_fetch_more();
                    }
                }
            }
        }
    }
}
