//! palaver — thread-list synchronization and moderation engine for
//! Misago-style forum APIs.
//!
//! The crate keeps a client-side view of a forum's thread listing in sync
//! with the server: cursor-paginated fetching per scope (a category or the
//! "all threads" index), a selection set for bulk moderation that can never
//! reference a thread the collection no longer holds, and one-at-a-time
//! bulk mutations whose targets are frozen at submit time. Responses that
//! arrive after their scope was torn down are discarded, never applied.
//!
//! See [`sync::ThreadsSession`] for the entry point and [`api::ForumClient`]
//! for the wire layer.

pub mod api;
pub mod config;
pub mod sync;
