//! Pipeline tests against the in-memory store
//!
//! Exercise fetch, resolution, normalization and upsert end to end without network or
//! database access.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use futures_ingest::error::ErrorClassification;
use futures_ingest::normalizer::RecordNormalizer;
use futures_ingest::provider::mock::MockProvider;
use futures_ingest::provider::{FetchAdapter, ProviderError};
use futures_ingest::schema::{
    BarSchema, IngestionWindow, ProviderTimestamp, RawMarketRow, ReferenceRow,
};
use futures_ingest::storage::{MemoryOhlcvStore, OhlcvStore};
use futures_ingest::{IngestError, IngestPipeline};

const DATASET: &str = "GLBX.MDP3";

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
}

fn midnight(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
}

fn bar(day: u32, instrument_id: u32, close: f64) -> RawMarketRow {
    RawMarketRow {
        ts: ProviderTimestamp::Naive(date(day).and_hms_opt(0, 0, 0).unwrap()),
        instrument_id,
        symbol: None,
        open: 4700.0,
        high: 4710.0,
        low: 4690.0,
        close,
        volume: 1000,
    }
}

fn raw_bar(day: u32, symbol: &str, close: f64) -> RawMarketRow {
    RawMarketRow {
        symbol: Some(symbol.to_string()),
        ..bar(day, 42, close)
    }
}

fn reference(day: u32, instrument_id: u32, contract: &str, symbol: &str) -> ReferenceRow {
    ReferenceRow {
        date: date(day),
        instrument_id,
        contract: contract.to_string(),
        continuous_symbol: symbol.to_string(),
    }
}

/// ES.c.0 backed by ESH4 (5002) on days `from..=to`
fn es_provider(from: u32, to: u32, close: f64) -> MockProvider {
    MockProvider::new()
        .with_bars("ES.c.0", (from..=to).map(|d| bar(d, 5002, close)).collect())
        .with_reference((from..=to).map(|d| reference(d, 5002, "ESH4", "ES.c.0")).collect())
}

async fn pipeline<S: OhlcvStore>(
    provider: MockProvider,
    store: S,
) -> IngestPipeline<MockProvider, S> {
    IngestPipeline::bootstrap(
        FetchAdapter::new(provider),
        store,
        BarSchema::Ohlcv1d,
        RecordNormalizer::default(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_bootstrap_creates_schema() {
    let pipeline = pipeline(MockProvider::new(), MemoryOhlcvStore::new()).await;
    assert!(pipeline.store().is_bootstrapped(BarSchema::Ohlcv1d));
}

#[tokio::test]
async fn test_continuous_window_stored_under_requested_symbol() {
    let pipeline = pipeline(es_provider(2, 5, 4705.0), MemoryOhlcvStore::new()).await;
    let window = IngestionWindow::daily(&["ES.c.0"], DATASET, date(1), date(31));

    let report = pipeline.run(&window).await.unwrap();

    assert_eq!(report.fetched, 4);
    assert_eq!(report.written, 4);
    let stored = pipeline.store().get(BarSchema::Ohlcv1d, midnight(2), "ES.c.0").unwrap();
    assert_eq!(stored.close, 4705.0);
    assert!(pipeline.store().get(BarSchema::Ohlcv1d, midnight(2), "ESH4").is_none());
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let pipeline = pipeline(es_provider(2, 5, 4705.0), MemoryOhlcvStore::new()).await;
    let window = IngestionWindow::daily(&["ES.c.0"], DATASET, date(1), date(31));

    pipeline.run(&window).await.unwrap();
    let first = pipeline
        .store()
        .fetch_range(BarSchema::Ohlcv1d, &[], midnight(1), midnight(31))
        .await
        .unwrap();

    pipeline.run(&window).await.unwrap();
    let second = pipeline
        .store()
        .fetch_range(BarSchema::Ohlcv1d, &[], midnight(1), midnight(31))
        .await
        .unwrap();

    assert_eq!(first.len(), 4);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_rerun_overwrites_changed_values() {
    let store = Arc::new(MemoryOhlcvStore::new());
    let window = IngestionWindow::daily(&["ES.c.0"], DATASET, date(2), date(2));

    pipeline(es_provider(2, 2, 4700.0), store.clone())
        .await
        .run(&window)
        .await
        .unwrap();
    pipeline(es_provider(2, 2, 4705.25), store.clone())
        .await
        .run(&window)
        .await
        .unwrap();

    assert_eq!(store.len(BarSchema::Ohlcv1d), 1);
    let stored = store.get(BarSchema::Ohlcv1d, midnight(2), "ES.c.0").unwrap();
    assert_eq!(stored.close, 4705.25);
}

#[tokio::test]
async fn test_invalid_row_excluded_rest_written() {
    let mut bars: Vec<RawMarketRow> = (2..=11).map(|d| bar(d, 5002, 4705.0)).collect();
    // high below low
    bars[4].high = 4680.0;

    let provider = MockProvider::new()
        .with_bars("ES.c.0", bars)
        .with_reference((2..=11).map(|d| reference(d, 5002, "ESH4", "ES.c.0")).collect());
    let pipeline = pipeline(provider, MemoryOhlcvStore::new()).await;
    let window = IngestionWindow::daily(&["ES.c.0"], DATASET, date(1), date(31));

    let report = pipeline.run(&window).await.unwrap();

    assert_eq!(report.fetched, 10);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.written, 9);
    assert_eq!(pipeline.store().len(BarSchema::Ohlcv1d), 9);
    assert!(pipeline.store().get(BarSchema::Ohlcv1d, midnight(6), "ES.c.0").is_none());
}

#[tokio::test]
async fn test_unmapped_rows_dropped_and_counted() {
    let provider = es_provider(2, 3, 4705.0).with_bars("ES.c.0", vec![bar(4, 9999, 4705.0)]);
    let pipeline = pipeline(provider, MemoryOhlcvStore::new()).await;
    let window = IngestionWindow::daily(&["ES.c.0"], DATASET, date(1), date(31));

    let report = pipeline.run(&window).await.unwrap();

    assert_eq!(report.fetched, 3);
    assert_eq!(report.unresolved, 1);
    assert_eq!(report.written, 2);
}

#[tokio::test]
async fn test_ambiguous_mapping_rejected() {
    let provider = MockProvider::new()
        .with_bars("ES.c.0", vec![bar(2, 5002, 4705.0)])
        .with_reference(vec![
            reference(2, 5002, "ESH4", "ES.c.0"),
            reference(2, 5003, "ESM4", "ES.c.0"),
        ]);
    let pipeline = pipeline(provider, MemoryOhlcvStore::new()).await;
    let window = IngestionWindow::daily(&["ES.c.0"], DATASET, date(1), date(31));

    let report = pipeline.run(&window).await.unwrap();

    assert_eq!(report.unresolved, 1);
    assert_eq!(report.written, 0);
    assert!(pipeline.store().is_empty(BarSchema::Ohlcv1d));
}

#[tokio::test]
async fn test_prices_rounded_half_away_from_zero() {
    let pipeline = pipeline(es_provider(2, 2, 4700.125), MemoryOhlcvStore::new()).await;
    let window = IngestionWindow::daily(&["ES.c.0"], DATASET, date(2), date(2));

    pipeline.run(&window).await.unwrap();

    let stored = pipeline.store().get(BarSchema::Ohlcv1d, midnight(2), "ES.c.0").unwrap();
    assert_eq!(stored.close, 4700.13);
}

#[tokio::test]
async fn test_empty_window_writes_nothing() {
    let pipeline = pipeline(es_provider(2, 5, 4705.0), MemoryOhlcvStore::new()).await;
    let window = IngestionWindow::daily(&["ES.c.0"], DATASET, date(20), date(25));

    let report = pipeline.run(&window).await.unwrap();

    assert_eq!(report.windows, 1);
    assert_eq!(report.fetched, 0);
    assert_eq!(report.written, 0);
    assert_eq!(pipeline.adapter().provider().reference_calls(), 0);
}

#[tokio::test]
async fn test_raw_symbol_window() {
    let provider = MockProvider::new().with_bars(
        "ESH4",
        vec![raw_bar(2, "ESH4", 4705.0), raw_bar(3, "ESH4", 4706.0)],
    );
    let pipeline = pipeline(provider, MemoryOhlcvStore::new()).await;
    let window = IngestionWindow::daily(&["ESH4"], DATASET, date(1), date(31));

    let report = pipeline.run(&window).await.unwrap();

    assert_eq!(report.written, 2);
    assert_eq!(pipeline.adapter().provider().reference_calls(), 0);
    assert!(pipeline.store().get(BarSchema::Ohlcv1d, midnight(3), "ESH4").is_some());
}

#[tokio::test]
async fn test_run_all_merges_reports() {
    let provider = es_provider(2, 4, 4705.0)
        .with_bars("NQ.c.0", (2..=3).map(|d| bar(d, 6002, 16800.0)).collect())
        .with_reference((2..=3).map(|d| reference(d, 6002, "NQH4", "NQ.c.0")).collect());
    let pipeline = pipeline(provider, MemoryOhlcvStore::new())
        .await
        .with_max_concurrent_windows(2);

    let windows =
        IngestionWindow::daily(&["ES.c.0", "NQ.c.0"], DATASET, date(1), date(31)).split_by_symbol();
    let report = pipeline.run_all(&windows).await.unwrap();

    assert_eq!(report.windows, 2);
    assert_eq!(report.fetched, 5);
    assert_eq!(report.written, 5);

    let stats = pipeline.store().stats(BarSchema::Ohlcv1d).await.unwrap();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].symbol, "ES.c.0");
    assert_eq!(stats[0].total_records, 3);
    assert_eq!(stats[1].symbol, "NQ.c.0");
    assert_eq!(stats[1].earliest_time, midnight(2));
}

#[tokio::test]
async fn test_provider_failure_aborts_without_writes() {
    let provider =
        es_provider(2, 5, 4705.0).failing_with(ProviderError::Connection("reset by peer".into()));
    let pipeline = pipeline(provider, MemoryOhlcvStore::new()).await;
    let window = IngestionWindow::daily(&["ES.c.0"], DATASET, date(1), date(31));

    let err = pipeline.run(&window).await.unwrap_err();

    assert!(matches!(err, IngestError::Provider { .. }));
    assert!(err.is_transient());
    assert!(pipeline.store().is_empty(BarSchema::Ohlcv1d));
}

#[tokio::test]
async fn test_window_schema_must_match_pipeline() {
    let pipeline = pipeline(es_provider(2, 5, 4705.0), MemoryOhlcvStore::new()).await;
    let mut window = IngestionWindow::daily(&["ES.c.0"], DATASET, date(1), date(31));
    window.schema = BarSchema::Ohlcv1h;

    let err = pipeline.run(&window).await.unwrap_err();
    assert!(matches!(err, IngestError::Configuration(_)));
    assert_eq!(pipeline.adapter().provider().ohlcv_calls(), 0);
}
