//! Wire-level data types shared between the GraphQL client and the sync engine.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;

/// Server-assigned thread identifier. Opaque and stable for the thread's lifetime.
pub type ThreadId = String;

/// Server-assigned category identifier.
pub type CategoryId = String;

// ============================================================================
// Entities
// ============================================================================

/// Minimal category reference as embedded in thread payloads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategoryRef {
    pub id: CategoryId,
}

/// A discussion thread as returned by the `threads` query.
///
/// Owned by the collection cache once merged; other components reference
/// threads by id only and request changes through the cache.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: ThreadId,
    pub title: String,
    pub category: CategoryRef,
    /// Last activity timestamp. Absent on threads with no posts yet.
    pub last_posted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_closed: bool,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default)]
    pub is_pinned: bool,
}

/// One page of the paginated `threads` query.
///
/// `next_cursor` is an opaque continuation token; `None` means the listing
/// is exhausted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadPage {
    pub items: Vec<Thread>,
    pub next_cursor: Option<String>,
}

// ============================================================================
// Scope
// ============================================================================

/// The listing a thread collection is fetched for: a single category, or
/// the cross-category "all threads" index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    All,
    Category(CategoryId),
}

impl Scope {
    /// The category id to pass to the `threads` query, or `None` for "all".
    pub fn category_id(&self) -> Option<&str> {
        match self {
            Scope::All => None,
            Scope::Category(id) => Some(id),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => write!(f, "all threads"),
            Scope::Category(id) => write!(f, "category {}", id),
        }
    }
}

// ============================================================================
// Mutation errors and patches
// ============================================================================

/// A field-level validation error returned by a mutation.
///
/// `location` names the input field the error concerns, `kind` is the stable
/// machine-readable category (serialized as `type` on the wire), `message`
/// is human-readable. Order is server-defined and preserved.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MutationError {
    pub message: String,
    pub location: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl fmt::Display for MutationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Partial attribute change applied to a cached thread after a confirmed
/// mutation. Only the fields a mutation can actually change are present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadPatch {
    pub title: Option<String>,
    pub is_closed: Option<bool>,
}

impl ThreadPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn closed(is_closed: bool) -> Self {
        Self {
            is_closed: Some(is_closed),
            ..Self::default()
        }
    }
}
