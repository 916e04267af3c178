//! GraphQL-over-HTTP client for the forum API.
//!
//! Every operation is a single POST against the configured endpoint with a
//! `{query, variables}` body. Transport problems (network, HTTP status,
//! top-level GraphQL errors) and field-level validation errors are kept
//! apart in [`ApiError`]: the former mean the operation did not happen, the
//! latter carry the server's ordered `{message, location, type}` triples.

use crate::api::types::{CategoryId, MutationError, Scope, Thread, ThreadId, ThreadPage};
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Hard cap on response body size to bound memory on a misbehaving server.
const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024; // 5MB

/// Default per-request timeout. Also the answer to "what happens to a
/// pending mutation that never resolves": after this long it resolves as
/// [`ApiError::Timeout`] and the coordinator returns to idle.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("GraphQL error: {0}")]
    Graphql(String),
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Invalid UTF-8 in response")]
    InvalidUtf8,
    #[error("Response missing expected field: {0}")]
    MissingData(&'static str),
    #[error("Validation failed: {}", format_mutation_errors(.0))]
    Validation(Vec<MutationError>),
    #[error("Category not found: {0}")]
    CategoryNotFound(CategoryId),
    #[error("Invalid endpoint URL: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error("Insecure endpoint: HTTPS required when an API token is configured (except localhost)")]
    InsecureEndpoint,
}

fn format_mutation_errors(errors: &[MutationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// GraphQL documents
// ============================================================================

/// Threads listing, scoped by optional category, cursor-paginated.
/// The sibling `category` lookup lets callers detect a deleted category
/// instead of silently receiving an empty listing.
const THREADS_QUERY: &str = "\
query Threads($category: ID, $cursor: String) {
  category(id: $category) { id }
  threads(category: $category, cursor: $cursor) {
    items {
      id
      title
      category { id }
      lastPostedAt
      isClosed
      isHidden
      isPinned
    }
    nextCursor
  }
}";

const EDIT_THREAD_TITLE: &str = "\
mutation EditThreadTitle($input: EditThreadTitleInput!) {
  editThreadTitle(input: $input) {
    errors {
      message
      location
      type
    }
    thread {
      id
      title
      category { id }
      lastPostedAt
      isClosed
      isHidden
      isPinned
    }
  }
}";

const THREADS_BULK_MOVE: &str = "\
mutation ThreadsBulkMove($input: ThreadsBulkMoveInput!) {
  threadsBulkMove(input: $input) {
    errors {
      message
      location
      type
    }
  }
}";

const THREADS_BULK_DELETE: &str = "\
mutation ThreadsBulkDelete($input: ThreadsBulkDeleteInput!) {
  threadsBulkDelete(input: $input) {
    errors {
      message
      location
      type
    }
  }
}";

const THREADS_IS_CLOSED_BULK_UPDATE: &str = "\
mutation ThreadsIsClosedBulkUpdate($input: ThreadsIsClosedBulkUpdateInput!) {
  threadsIsClosedBulkUpdate(input: $input) {
    errors {
      message
      location
      type
    }
  }
}";

// ============================================================================
// Response envelopes
// ============================================================================

#[derive(Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphqlError>>,
}

#[derive(Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Deserialize)]
struct ThreadsData {
    category: Option<crate::api::types::CategoryRef>,
    threads: ThreadPage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditThreadTitleData {
    edit_thread_title: EditThreadTitlePayload,
}

#[derive(Deserialize)]
struct EditThreadTitlePayload {
    errors: Option<Vec<MutationError>>,
    thread: Option<Thread>,
}

#[derive(Deserialize)]
struct BulkPayload {
    errors: Option<Vec<MutationError>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadsBulkMoveData {
    threads_bulk_move: BulkPayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadsBulkDeleteData {
    threads_bulk_delete: BulkPayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadsIsClosedBulkUpdateData {
    threads_is_closed_bulk_update: BulkPayload,
}

// ============================================================================
// Client
// ============================================================================

/// HTTP client for a single forum endpoint.
///
/// Cheap to share behind an `Arc`; the inner `reqwest::Client` pools
/// connections across requests.
pub struct ForumClient {
    http: reqwest::Client,
    endpoint: Url,
    token: Option<SecretString>,
    timeout: Duration,
}

impl ForumClient {
    /// Build a client for `endpoint`, optionally authenticating with a
    /// bearer token.
    ///
    /// A token is only ever sent over HTTPS; configuring one against a
    /// plain-HTTP endpoint fails with [`ApiError::InsecureEndpoint`]
    /// (localhost is exempt so tests can run against a local mock server).
    pub fn new(endpoint: &str, token: Option<SecretString>) -> Result<Self, ApiError> {
        Self::with_timeout(endpoint, token, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        endpoint: &str,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let endpoint: Url = endpoint.parse()?;

        if token.is_some() && endpoint.scheme() != "https" {
            let is_localhost = matches!(
                endpoint.host_str(),
                Some("localhost") | Some("127.0.0.1") | Some("[::1]")
            );
            if !is_localhost {
                tracing::error!(endpoint = %endpoint, "Rejecting non-HTTPS endpoint with API token configured");
                return Err(ApiError::InsecureEndpoint);
            }
        }

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            endpoint,
            token,
            timeout,
        })
    }

    /// List one page of threads for `scope`, continuing from `cursor`.
    ///
    /// When the scope names a category that no longer exists the server
    /// returns a null category lookup; that surfaces as
    /// [`ApiError::CategoryNotFound`] rather than an empty page.
    pub async fn list_threads(
        &self,
        scope: &Scope,
        cursor: Option<&str>,
    ) -> Result<ThreadPage, ApiError> {
        let variables = json!({
            "category": scope.category_id(),
            "cursor": cursor,
        });
        let data: ThreadsData = self.execute(THREADS_QUERY, variables).await?;

        if let Scope::Category(id) = scope {
            if data.category.is_none() {
                return Err(ApiError::CategoryNotFound(id.clone()));
            }
        }

        tracing::debug!(
            scope = %scope,
            items = data.threads.items.len(),
            has_more = data.threads.next_cursor.is_some(),
            "Fetched thread page"
        );
        Ok(data.threads)
    }

    /// Edit a single thread's title, returning the canonical updated thread.
    pub async fn edit_thread_title(
        &self,
        thread: &str,
        title: &str,
    ) -> Result<Thread, ApiError> {
        let variables = json!({
            "input": { "thread": thread, "title": title },
        });
        let data: EditThreadTitleData = self.execute(EDIT_THREAD_TITLE, variables).await?;
        let payload = data.edit_thread_title;

        if let Some(errors) = payload.errors {
            if !errors.is_empty() {
                return Err(ApiError::Validation(errors));
            }
        }
        payload
            .thread
            .ok_or(ApiError::MissingData("editThreadTitle.thread"))
    }

    /// Move threads to another category in one request.
    pub async fn bulk_move(
        &self,
        threads: &[ThreadId],
        category: &str,
    ) -> Result<(), ApiError> {
        let variables = json!({
            "input": { "threads": threads, "category": category },
        });
        let data: ThreadsBulkMoveData = self.execute(THREADS_BULK_MOVE, variables).await?;
        check_bulk(data.threads_bulk_move)
    }

    /// Delete threads in one request.
    pub async fn bulk_delete(&self, threads: &[ThreadId]) -> Result<(), ApiError> {
        let variables = json!({
            "input": { "threads": threads },
        });
        let data: ThreadsBulkDeleteData = self.execute(THREADS_BULK_DELETE, variables).await?;
        check_bulk(data.threads_bulk_delete)
    }

    /// Close or reopen threads in one request.
    pub async fn bulk_close(
        &self,
        threads: &[ThreadId],
        is_closed: bool,
    ) -> Result<(), ApiError> {
        let variables = json!({
            "input": { "threads": threads, "isClosed": is_closed },
        });
        let data: ThreadsIsClosedBulkUpdateData = self
            .execute(THREADS_IS_CLOSED_BULK_UPDATE, variables)
            .await?;
        check_bulk(data.threads_is_closed_bulk_update)
    }

    /// Execute one GraphQL document and decode the `data` payload.
    async fn execute<T: DeserializeOwned>(
        &self,
        query: &'static str,
        variables: serde_json::Value,
    ) -> Result<T, ApiError> {
        let body = json!({ "query": query, "variables": variables });

        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string());

        if let Some(token) = &self.token {
            request = request.header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            );
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| ApiError::Timeout(self.timeout.as_secs()))?
            .map_err(ApiError::Network)?;

        if !response.status().is_success() {
            return Err(ApiError::HttpStatus(response.status().as_u16()));
        }

        let text = read_limited_text(response, MAX_RESPONSE_SIZE).await?;
        let envelope: GraphqlResponse<T> = serde_json::from_str(&text)
            .map_err(|e| ApiError::Graphql(format!("malformed response: {}", e)))?;

        if let Some(errors) = envelope.errors {
            if !errors.is_empty() {
                let joined = errors
                    .into_iter()
                    .map(|e| e.message)
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(ApiError::Graphql(joined));
            }
        }

        envelope.data.ok_or(ApiError::MissingData("data"))
    }
}

/// A bulk payload succeeds iff its `errors` list is absent or empty.
fn check_bulk(payload: BulkPayload) -> Result<(), ApiError> {
    match payload.errors {
        Some(errors) if !errors.is_empty() => Err(ApiError::Validation(errors)),
        _ => Ok(()),
    }
}

async fn read_limited_text(
    response: reqwest::Response,
    limit: usize,
) -> Result<String, ApiError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ApiError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ApiError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ApiError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    String::from_utf8(bytes).map_err(|_| ApiError::InvalidUtf8)
}
