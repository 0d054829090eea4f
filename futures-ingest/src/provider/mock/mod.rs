//! Mock data provider for testing
//!
//! Serves canned OHLCV and reference rows so the pipeline can be exercised without
//! network access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::provider::{HistoricalDataProvider, ProviderError, ProviderInfo, ProviderResult};
use crate::schema::{IngestionWindow, RawMarketRow, ReferenceRow, Symbology};

/// Mock data provider for testing
pub struct MockProvider {
    info: ProviderInfo,
    /// Bars keyed by the requested symbol that produces them
    bars: HashMap<String, Vec<RawMarketRow>>,
    reference: Vec<ReferenceRow>,
    failure: Mutex<Option<ProviderError>>,
    ohlcv_calls: AtomicUsize,
    reference_calls: AtomicUsize,
}

impl MockProvider {
    /// Create a new mock provider
    pub fn new() -> Self {
        Self {
            info: ProviderInfo {
                name: "mock".to_string(),
            },
            bars: HashMap::new(),
            reference: Vec::new(),
            failure: Mutex::new(None),
            ohlcv_calls: AtomicUsize::new(0),
            reference_calls: AtomicUsize::new(0),
        }
    }

    /// Rows returned whenever `symbol` is part of a request
    pub fn with_bars(mut self, symbol: &str, rows: Vec<RawMarketRow>) -> Self {
        self.bars.entry(symbol.to_string()).or_default().extend(rows);
        self
    }

    /// Reference rows served for continuous requests
    pub fn with_reference(mut self, rows: Vec<ReferenceRow>) -> Self {
        self.reference.extend(rows);
        self
    }

    /// Fail the next OHLCV request with `error`
    pub fn failing_with(self, error: ProviderError) -> Self {
        *self.failure.lock() = Some(error);
        self
    }

    /// Number of OHLCV requests served
    pub fn ohlcv_calls(&self) -> usize {
        self.ohlcv_calls.load(Ordering::Relaxed)
    }

    /// Number of reference requests served
    pub fn reference_calls(&self) -> usize {
        self.reference_calls.load(Ordering::Relaxed)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoricalDataProvider for MockProvider {
    fn info(&self) -> &ProviderInfo {
        &self.info
    }

    async fn fetch_ohlcv(
        &self,
        window: &IngestionWindow,
        symbology: Symbology,
    ) -> ProviderResult<Vec<RawMarketRow>> {
        self.ohlcv_calls.fetch_add(1, Ordering::Relaxed);

        if let Some(error) = self.failure.lock().take() {
            return Err(error);
        }

        let rows = window
            .symbols
            .iter()
            .filter_map(|s| self.bars.get(s))
            .flatten()
            .filter(|row| window.contains(row.date()))
            .cloned()
            .map(|mut row| {
                if symbology == Symbology::Continuous {
                    row.symbol = None;
                }
                row
            })
            .collect();

        Ok(rows)
    }

    async fn fetch_reference(&self, window: &IngestionWindow) -> ProviderResult<Vec<ReferenceRow>> {
        self.reference_calls.fetch_add(1, Ordering::Relaxed);

        Ok(self
            .reference
            .iter()
            .filter(|r| window.contains(r.date) && window.symbols.contains(&r.continuous_symbol))
            .cloned()
            .collect())
    }
}
