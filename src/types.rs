//! Shared error types for the crate.

use thiserror::Error;

/// Unified error type for ingestion, storage, and query operations.
///
/// Failures scoped to one debate or one chunk are contained by the
/// ingestion pipeline and surface as per-id entries in a
/// [`PopulateSummary`](crate::ingestion::PopulateSummary) rather than as
/// errors. Only [`RagError::InvalidQuery`] is returned to search callers;
/// an empty store is a defined successful result, not an error.
#[derive(Debug, Error)]
pub enum RagError {
    /// The Hansard API has no debate with the requested external id.
    /// Permanent: never retried.
    #[error("debate {ext_id} not found")]
    DebateNotFound { ext_id: String },

    /// A document fetch failed after exhausting retries.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The embedding provider rejected the request due to rate limiting.
    #[error("embedding provider rate limited")]
    EmbeddingRateLimited,

    /// The embedding provider is unreachable or returned a server error.
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Vector store read or write failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A debate could not be turned into chunks.
    #[error("chunking error: {0}")]
    Chunking(String),

    /// Caller error: bad `top_k` or malformed filter, rejected before any
    /// store access.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// In-progress work observed the shutdown signal and aborted cleanly.
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration could not be resolved.
    #[error("config error: {0}")]
    Config(String),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(String),
}

impl RagError {
    /// Whether an embedding failure is worth retrying with backoff.
    pub fn retryable_embedding(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingRateLimited | RagError::EmbeddingUnavailable(_)
        )
    }
}

impl From<reqwest::Error> for RagError {
    fn from(err: reqwest::Error) -> Self {
        RagError::Fetch(err.to_string())
    }
}

impl From<std::io::Error> for RagError {
    fn from(err: std::io::Error) -> Self {
        RagError::Io(err.to_string())
    }
}

impl From<tokio_rusqlite::rusqlite::Error> for RagError {
    fn from(err: tokio_rusqlite::rusqlite::Error) -> Self {
        RagError::Storage(err.to_string())
    }
}

impl From<tokio_rusqlite::Error<RagError>> for RagError {
    fn from(err: tokio_rusqlite::Error<RagError>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(inner) => inner,
            other => RagError::Storage(other.to_string()),
        }
    }
}
