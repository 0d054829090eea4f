//! Databento historical client
//!
//! Wraps [`databento::HistoricalClient`]: bars and definitions come from
//! `timeseries.get_range` decoded as DBN records, and instrument mappings come from
//! `symbology.resolve`.
//!
//! # Example
//!
//! ```ignore
//! use futures_ingest::provider::databento::DatabentoClient;
//!
//! let client = DatabentoClient::from_api_key(api_key)?;
//! let window = IngestionWindow::daily(&["ES.c.0"], "GLBX.MDP3", start, end);
//! let rows = client.fetch_ohlcv(&window, Symbology::Continuous).await?;
//! ```

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use databento::dbn::{InstrumentDefMsg, MappingInterval, OhlcvMsg, SType, Schema};
use databento::historical::symbology::ResolveParams;
use databento::historical::timeseries::GetRangeParams;
use databento::HistoricalClient;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::DatabentoSettings;
use crate::provider::{HistoricalDataProvider, ProviderError, ProviderInfo, ProviderResult};
use crate::schema::{IngestionWindow, RawMarketRow, ReferenceRow, Symbology};

use super::convert::{self, midnight_utc, ohlcv_to_raw_row, to_naive_date, to_time_date};

/// Error case returned when the requested start is past the dataset's available data
const NO_DATA_CASE: &str = "data_start_after_available_end";

/// Databento historical data provider
pub struct DatabentoClient {
    info: ProviderInfo,
    // Requests borrow the client mutably
    client: Mutex<HistoricalClient>,
}

impl DatabentoClient {
    /// Create a new Databento client
    pub fn new(settings: &DatabentoSettings) -> ProviderResult<Self> {
        let api_key = settings.api_key.trim();
        if api_key.is_empty() {
            return Err(ProviderError::Authentication(
                "Databento API key not configured".to_string(),
            ));
        }

        let client = HistoricalClient::builder()
            .key(api_key)
            .map_err(|e| ProviderError::Authentication(e.to_string()))?
            .build()
            .map_err(|e| {
                ProviderError::Configuration(format!("Failed to create Databento client: {}", e))
            })?;

        Ok(Self {
            info: ProviderInfo {
                name: "databento".to_string(),
            },
            client: Mutex::new(client),
        })
    }

    /// Create from API key directly
    pub fn from_api_key(api_key: impl Into<String>) -> ProviderResult<Self> {
        let settings = DatabentoSettings {
            api_key: api_key.into(),
            ..DatabentoSettings::default()
        };
        Self::new(&settings)
    }

    /// Decode every `T` record of `schema` over the window's `[start, end)` range.
    ///
    /// Returns an empty vec when the provider reports no data for the range.
    async fn get_range<T, S>(
        &self,
        window: &IngestionWindow,
        schema: Schema,
        symbols: S,
        stype_in: SType,
    ) -> ProviderResult<Vec<T>>
    where
        T: databento::dbn::HasRType + Clone,
        S: Into<databento::Symbols>,
    {
        let start = midnight_utc(window.start)?;
        let end = midnight_utc(window.provider_end())?;
        let params = GetRangeParams::builder()
            .dataset(window.dataset.as_str())
            .date_time_range((start, end))
            .symbols(symbols)
            .stype_in(stype_in)
            .schema(schema)
            .build();
        debug!(
            "get_range {} {} [{}, {})",
            window.dataset,
            schema.as_str(),
            start,
            end
        );

        let mut client = self.client.lock().await;
        let mut decoder = match client.timeseries().get_range(&params).await {
            Ok(decoder) => decoder,
            Err(e) => {
                return match map_error(e) {
                    None => {
                        debug!("No {} data available for {}", schema.as_str(), window);
                        Ok(Vec::new())
                    }
                    Some(err) => Err(err),
                };
            }
        };

        let mut records = Vec::new();
        while let Some(record) = decoder
            .decode_record::<T>()
            .await
            .map_err(|e| ProviderError::Parse(format!("{}: {}", schema.as_str(), e)))?
        {
            records.push(record.clone());
        }
        Ok(records)
    }

    /// `symbology.resolve` to instrument ids over the window's `[start, end)` dates,
    /// keyed by requested symbol.
    async fn resolve_symbology(
        &self,
        window: &IngestionWindow,
        stype_in: SType,
    ) -> ProviderResult<HashMap<String, Vec<MappingInterval>>> {
        let params = ResolveParams::builder()
            .dataset(window.dataset.as_str())
            .symbols(window.symbols.clone())
            .stype_in(stype_in)
            .stype_out(SType::InstrumentId)
            .date_range((to_time_date(window.start)?, to_time_date(window.provider_end())?))
            .build();

        let mut client = self.client.lock().await;
        let resolution = match client.symbology().resolve(&params).await {
            Ok(resolution) => resolution,
            Err(e) => {
                return match map_error(e) {
                    None => Ok(HashMap::new()),
                    Some(err) => Err(err),
                };
            }
        };

        if !resolution.not_found.is_empty() {
            warn!("Symbols not found in {}: {:?}", window.dataset, resolution.not_found);
        }
        if !resolution.partial.is_empty() {
            debug!(
                "Symbols partially resolved in {}: {:?}",
                window.dataset, resolution.partial
            );
        }
        Ok(resolution.mappings)
    }

    /// Contract labels (`raw_symbol`) of the given instruments, from the definition schema.
    async fn fetch_definitions(
        &self,
        window: &IngestionWindow,
        instrument_ids: &BTreeSet<u32>,
    ) -> ProviderResult<HashMap<u32, String>> {
        if instrument_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let ids: Vec<u32> = instrument_ids.iter().copied().collect();
        let definitions: Vec<InstrumentDefMsg> = self
            .get_range(window, Schema::Definition, ids, SType::InstrumentId)
            .await?;

        let mut contracts = HashMap::new();
        for definition in &definitions {
            match definition.raw_symbol() {
                Ok(raw_symbol) if !raw_symbol.is_empty() => {
                    contracts.insert(definition.hd.instrument_id, raw_symbol.to_string());
                }
                Ok(_) => {}
                Err(e) => warn!(
                    "Unreadable raw_symbol for instrument {}: {}",
                    definition.hd.instrument_id, e
                ),
            }
        }
        Ok(contracts)
    }
}

/// Map a client error to a provider error. `None` means the provider reported that no
/// data exists for the requested range.
fn map_error(error: databento::Error) -> Option<ProviderError> {
    match error {
        databento::Error::Api(api) => {
            let status = api.status_code.as_u16();
            if is_no_data(status, &api.message) {
                None
            } else {
                Some(status_error(status, api.message))
            }
        }
        databento::Error::Http(e) if e.is_timeout() || e.is_connect() => {
            Some(ProviderError::Connection(e.to_string()))
        }
        databento::Error::Io(e) => Some(ProviderError::Connection(e.to_string())),
        databento::Error::Dbn(e) => Some(ProviderError::Parse(e.to_string())),
        other => Some(ProviderError::Request(other.to_string())),
    }
}

fn is_no_data(status: u16, message: &str) -> bool {
    status == 422 && message.contains(NO_DATA_CASE)
}

/// Map a non-success HTTP status to a provider error.
fn status_error(status: u16, message: String) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Authentication(message),
        429 => ProviderError::RateLimit(message),
        400 | 404 | 422 => ProviderError::InvalidRequest(message),
        s => ProviderError::Request(format!("HTTP {}: {}", s, message)),
    }
}

/// Map instrument ids back to the raw symbols they were requested as.
fn raw_symbol_lookup(mappings: &HashMap<String, Vec<MappingInterval>>) -> HashMap<u32, String> {
    let mut lookup = HashMap::new();
    for (symbol, intervals) in mappings {
        for interval in intervals {
            if let Ok(id) = interval.symbol.parse::<u32>() {
                lookup.insert(id, symbol.clone());
            }
        }
    }
    lookup
}

/// Expand symbology intervals into one reference row per day and continuous symbol.
///
/// Intervals are half-open `[start_date, end_date)` and clipped to the window.
/// Instruments without a definition are skipped, so rows on those days stay unmapped.
pub(crate) fn expand_reference(
    window: &IngestionWindow,
    mappings: &HashMap<String, Vec<MappingInterval>>,
    contracts: &HashMap<u32, String>,
) -> Vec<ReferenceRow> {
    let mut rows = Vec::new();

    for symbol in &window.symbols {
        let Some(intervals) = mappings.get(symbol) else {
            warn!("No symbology mapping for {} in {}", symbol, window);
            continue;
        };

        for interval in intervals {
            if interval.symbol.is_empty() {
                continue;
            }
            let Ok(instrument_id) = interval.symbol.parse::<u32>() else {
                warn!("Unexpected instrument id '{}' for {}", interval.symbol, symbol);
                continue;
            };
            let Some(contract) = contracts.get(&instrument_id) else {
                warn!(
                    "No definition for instrument {} backing {} from {}",
                    instrument_id, symbol, interval.start_date
                );
                continue;
            };
            let (Some(d0), Some(d1)) =
                (to_naive_date(interval.start_date), to_naive_date(interval.end_date))
            else {
                continue;
            };

            let first = d0.max(window.start);
            let last = d1.min(window.provider_end());
            rows.extend(first.iter_days().take_while(|d| *d < last).map(|date| {
                ReferenceRow {
                    date,
                    instrument_id,
                    contract: contract.clone(),
                    continuous_symbol: symbol.clone(),
                }
            }));
        }
    }

    rows
}

#[async_trait]
impl HistoricalDataProvider for DatabentoClient {
    fn info(&self) -> &ProviderInfo {
        &self.info
    }

    async fn fetch_ohlcv(
        &self,
        window: &IngestionWindow,
        symbology: Symbology,
    ) -> ProviderResult<Vec<RawMarketRow>> {
        let msgs: Vec<OhlcvMsg> = self
            .get_range(
                window,
                convert::schema(window.schema),
                window.symbols.clone(),
                convert::stype(symbology),
            )
            .await?;
        if msgs.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<RawMarketRow> = match symbology {
            Symbology::Continuous => msgs.iter().map(|m| ohlcv_to_raw_row(m, None)).collect(),
            Symbology::RawSymbol if window.symbols.len() == 1 => {
                let symbol = &window.symbols[0];
                msgs.iter()
                    .map(|m| ohlcv_to_raw_row(m, Some(symbol.clone())))
                    .collect()
            }
            Symbology::RawSymbol => {
                let mappings = self.resolve_symbology(window, SType::RawSymbol).await?;
                let lookup = raw_symbol_lookup(&mappings);
                msgs.iter()
                    .map(|m| ohlcv_to_raw_row(m, lookup.get(&m.hd.instrument_id).cloned()))
                    .collect()
            }
        };

        info!(
            "Databento returned {} bars for {:?} in {}",
            rows.len(),
            window.symbols,
            window
        );
        Ok(rows)
    }

    async fn fetch_reference(&self, window: &IngestionWindow) -> ProviderResult<Vec<ReferenceRow>> {
        let mappings = self.resolve_symbology(window, SType::Continuous).await?;

        let instrument_ids: BTreeSet<u32> = mappings
            .values()
            .flatten()
            .filter_map(|i| i.symbol.parse::<u32>().ok())
            .collect();

        let contracts = self.fetch_definitions(window, &instrument_ids).await?;
        debug!(
            "Resolved {} of {} instruments to contracts",
            contracts.len(),
            instrument_ids.len()
        );

        Ok(expand_reference(window, &mappings, &contracts))
    }
}
