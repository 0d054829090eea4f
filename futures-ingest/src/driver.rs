//! Ingestion driver
//!
//! Wires settings, the Databento client and a store into a bootstrapped pipeline and
//! runs a request to completion.

use chrono::NaiveDate;
use tracing::info;

use crate::config::{IngestSettings, Settings};
use crate::error::{IngestError, IngestResult};
use crate::normalizer::{NormalizerConfig, RecordNormalizer};
use crate::pipeline::{IngestPipeline, IngestReport};
use crate::provider::databento::DatabentoClient;
use crate::provider::{FetchAdapter, HistoricalDataProvider};
use crate::schema::{BarSchema, ContinuousSymbol, IngestionWindow};
use crate::storage::{MemoryOhlcvStore, OhlcvStore, PgOhlcvStore};

/// One ingestion request
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub symbols: Vec<String>,
    pub dataset: String,
    /// Inclusive
    pub start_date: NaiveDate,
    /// Inclusive
    pub end_date: NaiveDate,
    pub schema: BarSchema,
    /// Issue one provider request per symbol
    pub per_symbol: bool,
    /// Write to an in-memory store instead of the database
    pub dry_run: bool,
}

impl IngestConfig {
    pub fn new(
        symbols: Vec<String>,
        dataset: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Self {
        Self {
            symbols,
            dataset: dataset.into(),
            start_date,
            end_date,
            schema: BarSchema::Ohlcv1d,
            per_symbol: false,
            dry_run: false,
        }
    }

    /// Provider requests for this config.
    ///
    /// Continuous and raw symbols go in separate windows since a request takes a single
    /// input symbology. With `per_symbol`, every symbol gets its own window.
    pub fn windows(&self) -> Vec<IngestionWindow> {
        let (continuous, raw): (Vec<String>, Vec<String>) = self
            .symbols
            .iter()
            .cloned()
            .partition(|s| ContinuousSymbol::is_continuous(s));

        let windows: Vec<IngestionWindow> = [continuous, raw]
            .into_iter()
            .filter(|group| !group.is_empty())
            .map(|group| {
                IngestionWindow::new(
                    group,
                    self.dataset.clone(),
                    self.start_date,
                    self.end_date,
                    self.schema,
                )
            })
            .collect();

        if windows.is_empty() {
            // Let window validation report the empty symbol set
            return vec![IngestionWindow::new(
                Vec::new(),
                self.dataset.clone(),
                self.start_date,
                self.end_date,
                self.schema,
            )];
        }

        if self.per_symbol {
            windows.iter().flat_map(|w| w.split_by_symbol()).collect()
        } else {
            windows
        }
    }
}

/// Ingest with settings loaded from the environment.
pub async fn ingest(config: IngestConfig, api_key: &str) -> IngestResult<IngestReport> {
    let settings = Settings::load().map_err(|e| IngestError::Configuration(e.to_string()))?;
    ingest_with_settings(&config, api_key, &settings).await
}

/// Ingest from Databento into the configured database (or memory for a dry run).
pub async fn ingest_with_settings(
    config: &IngestConfig,
    api_key: &str,
    settings: &Settings,
) -> IngestResult<IngestReport> {
    let mut databento = settings.databento.clone();
    databento.api_key = api_key.to_string();

    let provider = DatabentoClient::new(&databento).map_err(|source| IngestError::Provider {
        symbols: config.symbols.clone(),
        window: format!("{}..={}", config.start_date, config.end_date),
        source,
    })?;

    if config.dry_run {
        info!("Dry run: writing to an in-memory store");
        let store = MemoryOhlcvStore::new();
        return run_with(config, provider, store, &settings.ingest).await;
    }

    let store = PgOhlcvStore::from_settings(&settings.database, &settings.storage)
        .await
        .map_err(IngestError::bootstrap)?;
    run_with(config, provider, store, &settings.ingest).await
}

/// Ingest `config` through an explicit provider and store.
pub async fn run_with<P, S>(
    config: &IngestConfig,
    provider: P,
    store: S,
    ingest: &IngestSettings,
) -> IngestResult<IngestReport>
where
    P: HistoricalDataProvider,
    S: OhlcvStore,
{
    let normalizer = NormalizerConfig::from_settings(ingest)
        .map(RecordNormalizer::new)
        .map_err(IngestError::Configuration)?;

    let pipeline =
        IngestPipeline::bootstrap(FetchAdapter::new(provider), store, config.schema, normalizer)
            .await?
            .with_max_concurrent_windows(ingest.max_concurrent_windows);

    let windows = config.windows();
    info!(
        "Ingesting {} symbols from {} in {} window(s)",
        config.symbols.len(),
        config.dataset,
        windows.len()
    );

    pipeline.run_all(&windows).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(symbols: &[&str]) -> IngestConfig {
        IngestConfig::new(
            symbols.iter().map(|s| s.to_string()).collect(),
            "GLBX.MDP3",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
    }

    #[test]
    fn test_windows_split_by_symbology() {
        let windows = config(&["ES.c.0", "ESH4", "NQ.c.0"]).windows();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].symbols, vec!["ES.c.0", "NQ.c.0"]);
        assert_eq!(windows[1].symbols, vec!["ESH4"]);
        assert!(windows.iter().all(|w| w.validate().is_ok()));
    }

    #[test]
    fn test_windows_per_symbol() {
        let mut cfg = config(&["ES.c.0", "NQ.c.0"]);
        cfg.per_symbol = true;
        let windows = cfg.windows();
        assert_eq!(windows.len(), 2);
        assert!(windows.iter().all(|w| w.symbols.len() == 1));
    }

    #[test]
    fn test_empty_symbols_yield_invalid_window() {
        let windows = config(&[]).windows();
        assert_eq!(windows.len(), 1);
        assert!(windows[0].validate().is_err());
    }

    #[tokio::test]
    async fn test_missing_api_key_is_provider_error() {
        let err = ingest_with_settings(&config(&["ES.c.0"]), "", &Settings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Provider { .. }));
    }
}
