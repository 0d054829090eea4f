//! Raw fetch adapter
//!
//! Validates an [`IngestionWindow`], calls the provider, and for continuous requests
//! pulls the reference data the resolver needs.

use tracing::{debug, info};

use crate::schema::{IngestionWindow, RawMarketRow, ReferenceRow, Symbology};

use super::{HistoricalDataProvider, ProviderError, ProviderResult};

/// Rows returned for one window.
#[derive(Debug, Clone)]
pub struct FetchOutput {
    pub symbology: Symbology,
    pub rows: Vec<RawMarketRow>,
    /// Present only for continuous requests
    pub reference: Option<Vec<ReferenceRow>>,
}

impl FetchOutput {
    /// No trading data in the window
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Fetch adapter over an explicitly supplied provider.
pub struct FetchAdapter<P> {
    provider: P,
}

impl<P: HistoricalDataProvider> FetchAdapter<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// The wrapped provider
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Fetch raw rows, plus reference rows when the symbols are continuous.
    pub async fn fetch(&self, window: &IngestionWindow) -> ProviderResult<FetchOutput> {
        let symbology = window
            .validate()
            .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?;

        debug!(
            "Fetching from {}: symbols={:?}, window={}, stype_in={}",
            self.provider.info().name,
            window.symbols,
            window,
            symbology.as_stype()
        );

        let rows = self.provider.fetch_ohlcv(window, symbology).await?;

        if rows.is_empty() {
            info!("No data for {:?} in {}", window.symbols, window);
            return Ok(FetchOutput {
                symbology,
                rows,
                reference: None,
            });
        }

        let reference = match symbology {
            Symbology::Continuous => {
                let reference = self.provider.fetch_reference(window).await?;
                debug!(
                    "Received {} reference rows for {:?}",
                    reference.len(),
                    window.symbols
                );
                Some(reference)
            }
            Symbology::RawSymbol => None,
        };

        info!(
            "Fetched {} rows for {:?} in {}",
            rows.len(),
            window.symbols,
            window
        );

        Ok(FetchOutput {
            symbology,
            rows,
            reference,
        })
    }
}
