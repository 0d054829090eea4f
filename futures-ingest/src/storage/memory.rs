//! In-memory OHLCV store
//!
//! Same keyed-upsert semantics as the Postgres store, backed by ordered maps. Used in
//! tests and for `--dry-run` ingestion.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::schema::{BarSchema, CanonicalRecord};

use super::{
    dedupe_by_key, stored_volume, OhlcvStore, RepositoryError, RepositoryResult, SymbolStats,
};

type Table = BTreeMap<(DateTime<Utc>, String), CanonicalRecord>;

/// In-memory store keyed by `(time, symbol)` per schema
#[derive(Default)]
pub struct MemoryOhlcvStore {
    tables: Mutex<HashMap<BarSchema, Table>>,
    bootstrapped: Mutex<HashSet<BarSchema>>,
}

impl MemoryOhlcvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows for a schema
    pub fn len(&self, schema: BarSchema) -> usize {
        self.tables.lock().get(&schema).map_or(0, |t| t.len())
    }

    pub fn is_empty(&self, schema: BarSchema) -> bool {
        self.len(schema) == 0
    }

    /// Stored row for a key
    pub fn get(
        &self,
        schema: BarSchema,
        time: DateTime<Utc>,
        symbol: &str,
    ) -> Option<CanonicalRecord> {
        self.tables
            .lock()
            .get(&schema)
            .and_then(|t| t.get(&(time, symbol.to_string())).cloned())
    }

    /// Whether `ensure_schema` has run for a schema
    pub fn is_bootstrapped(&self, schema: BarSchema) -> bool {
        self.bootstrapped.lock().contains(&schema)
    }
}

#[async_trait]
impl OhlcvStore for MemoryOhlcvStore {
    async fn ensure_schema(&self, schema: BarSchema) -> RepositoryResult<()> {
        self.bootstrapped.lock().insert(schema);
        self.tables.lock().entry(schema).or_default();
        Ok(())
    }

    async fn upsert(
        &self,
        schema: BarSchema,
        records: &[CanonicalRecord],
    ) -> RepositoryResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        if !self.is_bootstrapped(schema) {
            return Err(RepositoryError::Configuration(format!(
                "table for {} does not exist",
                schema
            )));
        }

        let records = dedupe_by_key(records);
        // Validate the whole batch before touching the table
        for record in &records {
            stored_volume(record)?;
        }

        let mut tables = self.tables.lock();
        let table = tables.entry(schema).or_default();
        for record in &records {
            table.insert((record.time, record.symbol.clone()), record.clone());
        }

        Ok(records.len() as u64)
    }

    async fn fetch_range(
        &self,
        schema: BarSchema,
        symbols: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepositoryResult<Vec<CanonicalRecord>> {
        let tables = self.tables.lock();
        let Some(table) = tables.get(&schema) else {
            return Ok(Vec::new());
        };

        Ok(table
            .values()
            .filter(|r| r.time >= start && r.time < end)
            .filter(|r| symbols.is_empty() || symbols.contains(&r.symbol))
            .cloned()
            .collect())
    }

    async fn stats(&self, schema: BarSchema) -> RepositoryResult<Vec<SymbolStats>> {
        let tables = self.tables.lock();
        let Some(table) = tables.get(&schema) else {
            return Ok(Vec::new());
        };

        let mut by_symbol: BTreeMap<&str, SymbolStats> = BTreeMap::new();
        for record in table.values() {
            by_symbol
                .entry(record.symbol.as_str())
                .and_modify(|s| {
                    s.total_records += 1;
                    s.earliest_time = s.earliest_time.min(record.time);
                    s.latest_time = s.latest_time.max(record.time);
                })
                .or_insert_with(|| SymbolStats {
                    symbol: record.symbol.clone(),
                    total_records: 1,
                    earliest_time: record.time,
                    latest_time: record.time,
                });
        }

        Ok(by_symbol.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(day: u32, symbol: &str, close: f64) -> CanonicalRecord {
        CanonicalRecord {
            time: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            symbol: symbol.to_string(),
            open: 4700.0,
            high: 4710.0,
            low: 4690.0,
            close,
            volume: 1000,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryOhlcvStore::new();
        store.ensure_schema(BarSchema::Ohlcv1d).await.unwrap();

        let batch = vec![record(2, "ES", 4700.0), record(3, "ES", 4701.0)];
        assert_eq!(store.upsert(BarSchema::Ohlcv1d, &batch).await.unwrap(), 2);
        assert_eq!(store.upsert(BarSchema::Ohlcv1d, &batch).await.unwrap(), 2);
        assert_eq!(store.len(BarSchema::Ohlcv1d), 2);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_existing_key() {
        let store = MemoryOhlcvStore::new();
        store.ensure_schema(BarSchema::Ohlcv1d).await.unwrap();

        store
            .upsert(BarSchema::Ohlcv1d, &[record(2, "ES", 4700.0)])
            .await
            .unwrap();
        store
            .upsert(BarSchema::Ohlcv1d, &[record(2, "ES", 4705.25)])
            .await
            .unwrap();

        let time = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(store.len(BarSchema::Ohlcv1d), 1);
        assert_eq!(store.get(BarSchema::Ohlcv1d, time, "ES").unwrap().close, 4705.25);
    }

    #[tokio::test]
    async fn test_invalid_batch_not_partially_applied() {
        let store = MemoryOhlcvStore::new();
        store.ensure_schema(BarSchema::Ohlcv1d).await.unwrap();

        let mut bad = record(3, "ES", 4701.0);
        bad.volume = i64::MAX;
        let result = store
            .upsert(BarSchema::Ohlcv1d, &[record(2, "ES", 4700.0), bad])
            .await;

        assert!(matches!(result, Err(RepositoryError::InvalidData(_))));
        assert!(store.is_empty(BarSchema::Ohlcv1d));
    }

    #[tokio::test]
    async fn test_write_before_bootstrap_fails() {
        let store = MemoryOhlcvStore::new();
        let result = store
            .upsert(BarSchema::Ohlcv1d, &[record(2, "ES", 4700.0)])
            .await;
        assert!(matches!(result, Err(RepositoryError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_fetch_range_and_stats() {
        let store = MemoryOhlcvStore::new();
        store.ensure_schema(BarSchema::Ohlcv1d).await.unwrap();
        store
            .upsert(
                BarSchema::Ohlcv1d,
                &[
                    record(3, "NQ", 16000.0),
                    record(2, "ES", 4700.0),
                    record(3, "ES", 4701.0),
                    record(5, "ES", 4702.0),
                ],
            )
            .await
            .unwrap();

        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();

        let all = store
            .fetch_range(BarSchema::Ohlcv1d, &[], start, end)
            .await
            .unwrap();
        let keys: Vec<(u32, &str)> = all
            .iter()
            .map(|r| (chrono::Datelike::day(&r.time), r.symbol.as_str()))
            .collect();
        assert_eq!(keys, vec![(2, "ES"), (3, "ES"), (3, "NQ")]);

        let es = store
            .fetch_range(BarSchema::Ohlcv1d, &["ES".to_string()], start, end)
            .await
            .unwrap();
        assert_eq!(es.len(), 2);

        let stats = store.stats(BarSchema::Ohlcv1d).await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].symbol, "ES");
        assert_eq!(stats[0].total_records, 3);
        assert_eq!(stats[0].earliest_time, start);
        assert_eq!(stats[1].symbol, "NQ");
    }
}
