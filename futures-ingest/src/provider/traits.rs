//! Provider trait definitions
//!
//! A historical data provider answers two questions for an [`IngestionWindow`]: which
//! OHLCV rows exist, and (for continuous symbols) which contract backed each symbol on
//! each day. Transport and authentication stay inside the implementation.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::{ErrorCategory, ErrorClassification};
use crate::schema::{IngestionWindow, RawMarketRow, ReferenceRow, Symbology};

/// Provider error types
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Request error: {0}")]
    Request(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ErrorClassification for ProviderError {
    fn category(&self) -> ErrorCategory {
        match self {
            ProviderError::Connection(_) => ErrorCategory::Transient,
            ProviderError::Authentication(_) => ErrorCategory::Configuration,
            ProviderError::Request(_) => ErrorCategory::Transient,
            ProviderError::InvalidRequest(_) => ErrorCategory::Permanent,
            ProviderError::Parse(_) => ErrorCategory::Permanent,
            ProviderError::RateLimit(_) => ErrorCategory::ResourceExhausted,
            ProviderError::Configuration(_) => ErrorCategory::Configuration,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            ProviderError::Connection(_) => Some(Duration::from_secs(2)),
            ProviderError::Request(_) => Some(Duration::from_millis(500)),
            ProviderError::RateLimit(_) => Some(Duration::from_secs(60)),
            _ => None,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Information about a data provider
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    /// Provider name (e.g., "databento")
    pub name: String,
}

/// Historical OHLCV source.
///
/// Implementations return an empty vector, not an error, when the window holds no
/// trading data.
#[async_trait]
pub trait HistoricalDataProvider: Send + Sync {
    /// Get provider information
    fn info(&self) -> &ProviderInfo;

    /// Fetch OHLCV rows for every symbol in the window.
    ///
    /// For [`Symbology::RawSymbol`] requests each row carries the provider-native symbol.
    /// Continuous requests leave it unset; attribution happens through reference data.
    async fn fetch_ohlcv(
        &self,
        window: &IngestionWindow,
        symbology: Symbology,
    ) -> ProviderResult<Vec<RawMarketRow>>;

    /// Fetch one [`ReferenceRow`] per calendar day and continuous symbol in the window.
    async fn fetch_reference(&self, window: &IngestionWindow) -> ProviderResult<Vec<ReferenceRow>>;
}
