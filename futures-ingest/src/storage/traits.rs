//! Store trait and shared storage types

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

use crate::error::{ErrorCategory, ErrorClassification};
use crate::schema::{BarSchema, CanonicalRecord};

/// Repository errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl ErrorClassification for RepositoryError {
    fn category(&self) -> ErrorCategory {
        match self {
            RepositoryError::Database(sqlx::Error::PoolTimedOut) => {
                ErrorCategory::ResourceExhausted
            }
            RepositoryError::Database(sqlx::Error::Io(_))
            | RepositoryError::Database(sqlx::Error::PoolClosed) => ErrorCategory::Transient,
            RepositoryError::Database(sqlx::Error::Database(db))
                if is_retryable_sqlstate(db.code().as_deref()) =>
            {
                ErrorCategory::Transient
            }
            // Constraint and syntax errors will fail the same way again
            RepositoryError::Database(sqlx::Error::Database(_)) => ErrorCategory::Permanent,
            RepositoryError::Database(_) => ErrorCategory::Transient,
            RepositoryError::Configuration(_) => ErrorCategory::Configuration,
            RepositoryError::InvalidData(_) => ErrorCategory::Permanent,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self.category() {
            ErrorCategory::Transient => Some(Duration::from_millis(500)),
            ErrorCategory::ResourceExhausted => Some(Duration::from_secs(5)),
            _ => None,
        }
    }
}

/// Serialization failure (40001) and deadlock (40P01) succeed when the transaction is
/// rerun.
fn is_retryable_sqlstate(code: Option<&str>) -> bool {
    matches!(code, Some("40001" | "40P01"))
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Row count and time coverage of one stored symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolStats {
    pub symbol: String,
    pub total_records: u64,
    pub earliest_time: DateTime<Utc>,
    pub latest_time: DateTime<Utc>,
}

/// OHLCV persistence.
///
/// `upsert` is keyed on `(time, symbol)`: an existing row is replaced by the incoming
/// values, so repeated writes of the same batch leave the store unchanged.
#[async_trait]
pub trait OhlcvStore: Send + Sync {
    /// Create the namespace and table for `schema` if missing. Idempotent.
    async fn ensure_schema(&self, schema: BarSchema) -> RepositoryResult<()>;

    /// Insert or replace `records` atomically, returning the rows affected.
    async fn upsert(&self, schema: BarSchema, records: &[CanonicalRecord]) -> RepositoryResult<u64>;

    /// Stored bars in `[start, end)`, ordered by time then symbol. An empty symbol list
    /// means every symbol.
    async fn fetch_range(
        &self,
        schema: BarSchema,
        symbols: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepositoryResult<Vec<CanonicalRecord>>;

    /// Per-symbol coverage, ordered by symbol
    async fn stats(&self, schema: BarSchema) -> RepositoryResult<Vec<SymbolStats>>;
}

#[async_trait]
impl<T: OhlcvStore + ?Sized> OhlcvStore for Arc<T> {
    async fn ensure_schema(&self, schema: BarSchema) -> RepositoryResult<()> {
        (**self).ensure_schema(schema).await
    }

    async fn upsert(
        &self,
        schema: BarSchema,
        records: &[CanonicalRecord],
    ) -> RepositoryResult<u64> {
        (**self).upsert(schema, records).await
    }

    async fn fetch_range(
        &self,
        schema: BarSchema,
        symbols: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepositoryResult<Vec<CanonicalRecord>> {
        (**self).fetch_range(schema, symbols, start, end).await
    }

    async fn stats(&self, schema: BarSchema) -> RepositoryResult<Vec<SymbolStats>> {
        (**self).stats(schema).await
    }
}

/// Collapse duplicate `(time, symbol)` keys, keeping the last occurrence in its
/// original position.
pub fn dedupe_by_key(records: &[CanonicalRecord]) -> Vec<CanonicalRecord> {
    let mut last: HashMap<(DateTime<Utc>, &str), usize> = HashMap::with_capacity(records.len());
    for (i, r) in records.iter().enumerate() {
        last.insert(r.key(), i);
    }

    if last.len() == records.len() {
        return records.to_vec();
    }

    warn!(
        "Collapsed {} duplicate (time, symbol) keys in batch",
        records.len() - last.len()
    );
    records
        .iter()
        .enumerate()
        .filter(|(i, r)| last.get(&r.key()) == Some(i))
        .map(|(_, r)| r.clone())
        .collect()
}

/// Volume as stored in the 32-bit column
pub(crate) fn stored_volume(record: &CanonicalRecord) -> RepositoryResult<i32> {
    i32::try_from(record.volume).map_err(|_| {
        RepositoryError::InvalidData(format!(
            "volume {} for {} at {} exceeds the volume column",
            record.volume, record.symbol, record.time
        ))
    })
}
