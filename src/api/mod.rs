//! Remote forum API: wire types and the GraphQL HTTP client.
//!
//! The client covers the four operations the sync engine drives:
//!
//! - paginated `threads` listing by scope (category or all)
//! - `editThreadTitle` single-entity mutation
//! - `threadsBulkMove` / `threadsBulkDelete` / `threadsIsClosedBulkUpdate`
//!   bulk moderation mutations
//!
//! Everything network-shaped stays in this module; the sync layer only sees
//! [`Thread`] values, [`MutationError`] triples, and [`ApiError`].

mod client;
mod types;

pub use client::{ApiError, ForumClient, DEFAULT_TIMEOUT_SECS};
pub use types::{
    CategoryId, CategoryRef, MutationError, Scope, Thread, ThreadId, ThreadPage, ThreadPatch,
};
