use std::time::Duration;

use thiserror::Error;

use crate::embedding::EmbeddingError;

/// Boxed error returned by execution collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while compiling filters or building search requests.
///
/// Every variant except [`SearchError::Execution`] is local to the call that
/// produced it. None of them are retried internally.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The filter uses an unknown operator, an empty `$in` list, or has a
    /// malformed shape.
    #[error("Invalid filter at '{key}': {reason}")]
    InvalidFilter { key: String, reason: String },

    /// The filter is valid but the compilation target has no equivalent for it.
    #[error("Operator '{operator}' is not supported in {target}")]
    UnsupportedInTarget {
        operator: &'static str,
        target: &'static str,
    },

    /// Query texts were supplied but no embedding function is configured.
    #[error("Embedding function is required to embed query texts")]
    EmbeddingFunctionRequired,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Embedding timed out after {0:?}")]
    EmbeddingTimeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error from the SQL or hybrid-search collaborator, passed through as-is.
    #[error(transparent)]
    Execution(BoxError),
}

impl SearchError {
    pub(crate) fn invalid_filter(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFilter {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error was caused by the caller's input rather than by a
    /// collaborator.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidFilter { .. }
                | Self::UnsupportedInTarget { .. }
                | Self::EmbeddingFunctionRequired
                | Self::InvalidParameter(_)
        )
    }
}

pub type SearchResult<T> = Result<T, SearchError>;
