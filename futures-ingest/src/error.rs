//! Error classification and run-level errors.
//!
//! Request-level (`ProviderError`) and store-level (`RepositoryError`) failures abort an
//! ingestion run and are wrapped in [`IngestError`] together with the window that failed.
//! Row-level problems never reach this type; they are counted in the run report instead.
//!
//! # Usage
//!
//! ```rust,ignore
//! use futures_ingest::error::ErrorClassification;
//!
//! match pipeline.run(&window).await {
//!     Err(e) if e.is_transient() => { /* caller may retry after e.suggested_retry_delay() */ }
//!     other => other?,
//! }
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::provider::ProviderError;
use crate::storage::RepositoryError;

/// Classification of error types for handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient errors that may resolve on retry (network issues, timeouts)
    Transient,
    /// Permanent errors that won't resolve on retry (invalid input, not found)
    Permanent,
    /// Resource exhaustion errors (rate limits, pool exhausted)
    ResourceExhausted,
    /// Configuration errors (missing credentials, invalid settings)
    Configuration,
    /// Internal errors (bugs, unexpected state)
    Internal,
}

/// Trait for errors that can classify themselves for retry logic.
pub trait ErrorClassification {
    /// Returns the category of this error
    fn category(&self) -> ErrorCategory;

    /// Returns true if this error is transient and may succeed on retry
    fn is_transient(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::ResourceExhausted
        )
    }

    /// Returns true if this error is permanent and won't succeed on retry
    fn is_permanent(&self) -> bool {
        matches!(self.category(), ErrorCategory::Permanent)
    }

    /// Suggests a delay before retrying, if applicable
    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self.category() {
            ErrorCategory::Transient => Some(Duration::from_millis(100)),
            ErrorCategory::ResourceExhausted => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

/// Run-level ingestion failure.
///
/// Carries the symbols and date range of the request so a driver can decide whether
/// to retry that window.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Fetching from the provider failed; nothing was written.
    #[error("fetch failed for {symbols:?} [{window}]: {source}")]
    Provider {
        symbols: Vec<String>,
        window: String,
        #[source]
        source: ProviderError,
    },

    /// Schema bootstrap or batch write failed; the batch was not applied.
    #[error("persistence failed for {symbols:?} [{window}]: {source}")]
    Persistence {
        symbols: Vec<String>,
        window: String,
        #[source]
        source: RepositoryError,
    },

    /// Settings could not be loaded or are incomplete.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl IngestError {
    /// Error raised before any window exists (schema bootstrap).
    pub fn bootstrap(source: RepositoryError) -> Self {
        IngestError::Persistence {
            symbols: Vec::new(),
            window: "schema bootstrap".to_string(),
            source,
        }
    }
}

impl ErrorClassification for IngestError {
    fn category(&self) -> ErrorCategory {
        match self {
            IngestError::Provider { source, .. } => source.category(),
            IngestError::Persistence { source, .. } => source.category(),
            IngestError::Configuration(_) => ErrorCategory::Configuration,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            IngestError::Provider { source, .. } => source.suggested_retry_delay(),
            IngestError::Persistence { source, .. } => source.suggested_retry_delay(),
            IngestError::Configuration(_) => None,
        }
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
