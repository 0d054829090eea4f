//! Ingestion pipeline
//!
//! fetch -> resolve (continuous requests only) -> normalize -> upsert.
//!
//! A pipeline can only be obtained through [`IngestPipeline::bootstrap`], which creates
//! the target table first, so no write ever runs against a missing schema.

use futures_util::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};

use crate::error::{IngestError, IngestResult};
use crate::normalizer::RecordNormalizer;
use crate::provider::{FetchAdapter, HistoricalDataProvider};
use crate::resolver::{attribute_raw, ContinuousResolver};
use crate::schema::{BarSchema, IngestionWindow};
use crate::storage::OhlcvStore;

/// Counts for one or more ingested windows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Windows processed
    pub windows: usize,
    /// Raw rows returned by the provider
    pub fetched: usize,
    /// Raw rows dropped because no stored symbol could be attributed
    pub unresolved: usize,
    /// Resolved rows excluded by validation
    pub rejected: usize,
    /// Rows affected by the upsert
    pub written: u64,
}

impl IngestReport {
    pub fn merge(&mut self, other: &IngestReport) {
        self.windows += other.windows;
        self.fetched += other.fetched;
        self.unresolved += other.unresolved;
        self.rejected += other.rejected;
        self.written += other.written;
    }
}

/// Bootstrapped ingestion pipeline over an explicit provider and store
pub struct IngestPipeline<P, S> {
    adapter: FetchAdapter<P>,
    store: S,
    normalizer: RecordNormalizer,
    schema: BarSchema,
    max_concurrent_windows: usize,
}

impl<P, S> IngestPipeline<P, S>
where
    P: HistoricalDataProvider,
    S: OhlcvStore,
{
    /// Ensure the table for `schema` exists and return a pipeline writing to it.
    pub async fn bootstrap(
        adapter: FetchAdapter<P>,
        store: S,
        schema: BarSchema,
        normalizer: RecordNormalizer,
    ) -> IngestResult<Self> {
        store
            .ensure_schema(schema)
            .await
            .map_err(IngestError::bootstrap)?;

        Ok(Self {
            adapter,
            store,
            normalizer,
            schema,
            max_concurrent_windows: 1,
        })
    }

    /// Allow `run_all` to process up to `limit` windows at once
    pub fn with_max_concurrent_windows(mut self, limit: usize) -> Self {
        self.max_concurrent_windows = limit.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn adapter(&self) -> &FetchAdapter<P> {
        &self.adapter
    }

    pub fn schema(&self) -> BarSchema {
        self.schema
    }

    /// Ingest one window. Row-level failures are counted, request and store failures abort.
    pub async fn run(&self, window: &IngestionWindow) -> IngestResult<IngestReport> {
        if window.schema != self.schema {
            return Err(IngestError::Configuration(format!(
                "window schema {} does not match bootstrapped schema {}",
                window.schema, self.schema
            )));
        }

        let output = self
            .adapter
            .fetch(window)
            .await
            .map_err(|source| IngestError::Provider {
                symbols: window.symbols.clone(),
                window: window.to_string(),
                source,
            })?;

        let mut report = IngestReport {
            windows: 1,
            fetched: output.rows.len(),
            ..IngestReport::default()
        };

        if output.is_empty() {
            return Ok(report);
        }

        let (resolved, resolution) = match output.reference {
            Some(reference) => ContinuousResolver::new(&reference).resolve(output.rows),
            None => attribute_raw(output.rows),
        };
        report.unresolved = resolution.excluded();
        debug!(
            "Resolved {} of {} rows ({} emitted)",
            resolution.matched, report.fetched, resolution.resolved
        );

        let (records, normalized) = self.normalizer.normalize_batch(&resolved);
        report.rejected = normalized.rejected;

        report.written = self
            .store
            .upsert(self.schema, &records)
            .await
            .map_err(|source| IngestError::Persistence {
                symbols: window.symbols.clone(),
                window: window.to_string(),
                source,
            })?;

        info!(
            "Ingested {:?} [{}]: fetched={}, unresolved={}, rejected={}, written={}",
            window.symbols,
            window,
            report.fetched,
            report.unresolved,
            report.rejected,
            report.written
        );
        Ok(report)
    }

    /// Ingest several windows with bounded concurrency.
    ///
    /// Stops at the first failing window. Windows that already committed stay written.
    pub async fn run_all(&self, windows: &[IngestionWindow]) -> IngestResult<IngestReport> {
        stream::iter(windows.iter().map(|w| self.run(w)))
            .buffer_unordered(self.max_concurrent_windows)
            .try_fold(IngestReport::default(), |mut total, report| async move {
                total.merge(&report);
                Ok(total)
            })
            .await
    }
}
