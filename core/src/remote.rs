use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Failure of an entire remote call, as opposed to a single row within it.
///
/// `Cancelled` is deliberately its own variant: an aborted call is not an
/// error and must never be classified as one by the sync engine.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("operation cancelled")]
    Cancelled,
}

/// A single row that failed to upsert. The batch it belonged to still
/// attempted every other row.
#[derive(Debug, Clone)]
pub struct ItemError {
    pub id: String,
    pub label: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct UpsertOutcome {
    pub succeeded: u64,
    pub failed: Vec<ItemError>,
}

/// Backend-as-a-service store holding one named collection per entity type.
///
/// `upsert` must attempt every row and report per-row failures in the
/// outcome; only a wholesale failure (connection down, auth rejected,
/// cancelled) surfaces as a `RemoteError`. `fetch_all` returns an empty list,
/// not an error, when the owner has no rows.
pub trait RemoteStore: Send + Sync {
    fn upsert(
        &self,
        collection: &str,
        conflict_key: &str,
        owner_id: &str,
        rows: Vec<Value>,
    ) -> impl Future<Output = Result<UpsertOutcome, RemoteError>> + Send;

    fn fetch_all(
        &self,
        collection: &str,
        owner_id: &str,
    ) -> impl Future<Output = Result<Vec<Value>, RemoteError>> + Send;
}

/// Resolves the currently authenticated owner, if any.
///
/// Implementations read a locally cached session; this is called before any
/// network I/O and a `None` owner fails the sync attempt fast.
pub trait AuthProvider: Send + Sync {
    fn current_owner(&self) -> Result<Option<String>, RemoteError>;
}
