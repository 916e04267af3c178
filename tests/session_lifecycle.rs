//! Integration tests for the scope lifecycle: activate, paginate, reload,
//! deactivate. Each test runs against its own wiremock GraphQL endpoint and
//! drives the session's event loop by hand, one completion at a time.

use palaver::api::{ForumClient, Scope};
use palaver::sync::{FetchPlan, SessionEvent, SyncError, ThreadsSession};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{body_string_contains, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn thread_json(id: &str, title: &str) -> serde_json::Value {
    json!({
        "id": id,
        "title": title,
        "category": {"id": "c1"},
        "lastPostedAt": "2024-03-01T12:00:00Z",
        "isClosed": false,
        "isHidden": false,
        "isPinned": false,
    })
}

fn threads_body(items: Vec<serde_json::Value>, next_cursor: Option<&str>) -> serde_json::Value {
    json!({
        "data": {
            "category": {"id": "c1"},
            "threads": {"items": items, "nextCursor": next_cursor},
        },
    })
}

fn session_for(server: &MockServer) -> (ThreadsSession, mpsc::Receiver<SessionEvent>) {
    let client = ForumClient::new(&server.uri(), None).unwrap();
    let (tx, rx) = mpsc::channel(32);
    (ThreadsSession::new(Arc::new(client), tx), rx)
}

/// Receive one completion and apply it.
async fn drive_one(session: &mut ThreadsSession, rx: &mut mpsc::Receiver<SessionEvent>) {
    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed");
    session.handle_event(event);
}

// ============================================================================
// Pagination
// ============================================================================

#[tokio::test]
async fn test_load_and_paginate_dedups_overlap() {
    let server = MockServer::start().await;

    // First page request carries a null cursor.
    Mock::given(method("POST"))
        .and(body_string_contains("\"cursor\":null"))
        .respond_with(ResponseTemplate::new(200).set_body_json(threads_body(
            vec![
                thread_json("t1", "First"),
                thread_json("t2", "Second"),
                thread_json("t3", "Third"),
            ],
            Some("c1"),
        )))
        .mount(&server)
        .await;

    // Second page overlaps at t3: the boundary shifted on the server.
    Mock::given(method("POST"))
        .and(body_string_contains("\"cursor\":\"c1\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(threads_body(
            vec![thread_json("t3", "Third"), thread_json("t4", "Fourth")],
            None,
        )))
        .mount(&server)
        .await;

    let (mut session, mut rx) = session_for(&server);
    session.activate(Scope::All);
    drive_one(&mut session, &mut rx).await;

    assert_eq!(session.threads().len(), 3);
    assert!(session.has_more());

    assert!(matches!(session.fetch_more().unwrap(), FetchPlan::Issue(_)));
    drive_one(&mut session, &mut rx).await;

    let ids: Vec<&str> = session.threads().iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["t1", "t2", "t3", "t4"]);
    assert!(!session.has_more());
}

#[tokio::test]
async fn test_rapid_fetch_more_issues_one_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_string_contains("\"cursor\":null"))
        .respond_with(ResponseTemplate::new(200).set_body_json(threads_body(
            vec![thread_json("t1", "First")],
            Some("c1"),
        )))
        .mount(&server)
        .await;

    // The page-2 mock expects exactly one hit; a duplicate request would
    // fail verification when the server drops.
    Mock::given(method("POST"))
        .and(body_string_contains("\"cursor\":\"c1\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(threads_body(
            vec![thread_json("t2", "Second")],
            None,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let (mut session, mut rx) = session_for(&server);
    session.activate(Scope::All);
    drive_one(&mut session, &mut rx).await;

    // Two calls before either resolves: second coalesces.
    assert!(matches!(session.fetch_more().unwrap(), FetchPlan::Issue(_)));
    assert!(matches!(session.fetch_more().unwrap(), FetchPlan::Coalesced));

    drive_one(&mut session, &mut rx).await;
    assert_eq!(session.threads().len(), 2);

    // And once exhausted, further calls are no-ops without network.
    assert!(matches!(
        session.fetch_more().unwrap(),
        FetchPlan::Exhausted
    ));
}

#[tokio::test]
async fn test_load_failure_surfaces_and_allows_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let (mut session, mut rx) = session_for(&server);
    session.activate(Scope::All);
    drive_one(&mut session, &mut rx).await;

    let failure = session.take_failure().expect("load failure surfaced");
    assert_eq!(failure.operation, "load threads");
    assert!(matches!(failure.error, SyncError::Api(_)));
    assert!(!session.is_loading());
    assert!(session.threads().is_empty());

    // Retry is just re-invoking the same operation.
    assert!(matches!(session.reload().unwrap(), FetchPlan::Issue(_)));
}

// ============================================================================
// Scope changes and stale responses
// ============================================================================

#[tokio::test]
async fn test_navigating_away_discards_late_page() {
    let server = MockServer::start().await;

    // The category listing responds slowly; the user navigates away first.
    Mock::given(method("POST"))
        .and(body_string_contains("\"category\":\"c1\""))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(threads_body(vec![thread_json("old1", "Old")], None))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(body_string_contains("\"category\":null"))
        .respond_with(ResponseTemplate::new(200).set_body_json(threads_body(
            vec![thread_json("new1", "New")],
            None,
        )))
        .mount(&server)
        .await;

    let (mut session, mut rx) = session_for(&server);
    session.activate(Scope::Category("c1".to_string()));
    session.activate(Scope::All);

    // Both completions eventually arrive; only the current scope's applies.
    drive_one(&mut session, &mut rx).await;
    drive_one(&mut session, &mut rx).await;

    let ids: Vec<&str> = session.threads().iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["new1"]);
}

#[tokio::test]
async fn test_reload_replaces_collection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(threads_body(
            vec![thread_json("t1", "First")],
            None,
        )))
        .mount(&server)
        .await;

    let (mut session, mut rx) = session_for(&server);
    session.activate(Scope::All);
    drive_one(&mut session, &mut rx).await;

    session.toggle("t1").unwrap();
    assert_eq!(session.selection_len(), 1);

    assert!(matches!(session.reload().unwrap(), FetchPlan::Issue(_)));
    // Selection does not survive the reload.
    assert_eq!(session.selection_len(), 0);
    drive_one(&mut session, &mut rx).await;

    assert_eq!(session.threads().len(), 1);
}
