//! Error taxonomy for the client data layer.
//!
//! `ClientError` covers everything a caller can observe. Persistence failures
//! are a separate type because they are never surfaced: the cache logs them
//! and degrades to memory-only operation.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the API client, resource loader and mutation paths.
#[derive(Debug, Error)]
pub enum ClientError {
  /// Transport-level failure (DNS, TLS, connect, dropped body).
  /// Transient; whether to retry is the caller's decision.
  #[error("network error: {0}")]
  Network(String),

  /// The backend rejected our credentials (401/403). Not retryable
  /// without new credentials, and never silently swallowed.
  #[error("authentication failed: {0}")]
  Auth(String),

  /// An optimistic mutation outlived its confirmation window.
  #[error("mutation timed out after {0:?}")]
  Timeout(Duration),

  /// Any other non-success HTTP status.
  #[error("api error ({status}): {message}")]
  Api { status: u16, message: String },

  /// The response body matched none of the documented envelope shapes.
  #[error("malformed response: {0}")]
  MalformedResponse(String),

  /// Local setup problem: bad base URL, missing token, unusable config.
  #[error("configuration error: {0}")]
  Config(String),
}

impl ClientError {
  /// True for failures that a caller may reasonably retry later.
  pub fn is_transient(&self) -> bool {
    matches!(self, ClientError::Network(_) | ClientError::Timeout(_))
  }
}

/// Errors from the cache's durable snapshot backend. Always absorbed:
/// callers of `get`/`set` never see these.
#[derive(Debug, Error)]
pub enum PersistenceError {
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("serialization error: {0}")]
  Serde(#[from] serde_json::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("{0}")]
  Other(String),
}
