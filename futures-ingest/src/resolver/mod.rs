//! Continuous-contract resolution
//!
//! Joins instrument-level bars with daily reference rows so each bar is stored under
//! the continuous symbol it backed on that date. The reference data is the only source
//! of truth for rolls: a bar with no matching reference entry is dropped, never guessed.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{debug, warn};

use crate::schema::{RawMarketRow, ReferenceRow};

/// Why a raw row could not be attributed to a stored symbol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("no reference entry for instrument {instrument_id} on {date}")]
    Unmapped { date: NaiveDate, instrument_id: u32 },

    #[error("{symbol} is backed by several instruments on {date}: {instrument_ids:?}")]
    Ambiguous {
        date: NaiveDate,
        symbol: String,
        instrument_ids: Vec<u32>,
    },

    #[error("instrument {instrument_id} on {date} has no provider symbol")]
    MissingSymbol { date: NaiveDate, instrument_id: u32 },
}

/// A raw row attributed to the symbol it will be stored under
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRow {
    pub row: RawMarketRow,
    /// Stored symbol (the continuous symbol, or the raw symbol as requested)
    pub symbol: String,
    /// Underlying contract label
    pub contract: String,
}

/// Per-run resolution counts
#[derive(Debug, Clone, Default)]
pub struct ResolutionReport {
    /// Raw rows that produced at least one resolved row
    pub matched: usize,
    /// Resolved rows emitted (one raw row can back several continuous symbols)
    pub resolved: usize,
    /// Raw rows without a reference entry or symbol
    pub unmapped: usize,
    /// Raw rows whose every target was ambiguous
    pub ambiguous: usize,
    pub errors: Vec<ResolutionError>,
}

impl ResolutionReport {
    /// Raw rows excluded from the run
    pub fn excluded(&self) -> usize {
        self.unmapped + self.ambiguous
    }

    fn reject(&mut self, error: ResolutionError) {
        warn!("Dropping row: {}", error);
        match error {
            ResolutionError::Ambiguous { .. } => self.ambiguous += 1,
            _ => self.unmapped += 1,
        }
        self.errors.push(error);
    }
}

#[derive(Debug, Clone)]
struct Target {
    symbol: String,
    contract: String,
    ambiguous: Option<Vec<u32>>,
}

/// Index of `(date, instrument id) -> backing continuous symbols`, built in one pass.
#[derive(Debug, Default)]
pub struct ContinuousResolver {
    index: HashMap<(NaiveDate, u32), Vec<Target>>,
}

impl ContinuousResolver {
    pub fn new(reference: &[ReferenceRow]) -> Self {
        let mut backing: HashMap<(NaiveDate, &str), BTreeSet<u32>> = HashMap::new();
        for r in reference {
            backing
                .entry((r.date, r.continuous_symbol.as_str()))
                .or_default()
                .insert(r.instrument_id);
        }

        let mut index: HashMap<(NaiveDate, u32), Vec<Target>> = HashMap::new();
        for r in reference {
            let targets = index.entry((r.date, r.instrument_id)).or_default();
            if targets.iter().any(|t| t.symbol == r.continuous_symbol) {
                continue;
            }

            let ids = &backing[&(r.date, r.continuous_symbol.as_str())];
            let ambiguous = (ids.len() > 1).then(|| ids.iter().copied().collect());
            targets.push(Target {
                symbol: r.continuous_symbol.clone(),
                contract: r.contract.clone(),
                ambiguous,
            });
        }

        debug!(
            "Built reference index with {} (date, instrument) entries",
            index.len()
        );
        Self { index }
    }

    /// Attribute every raw row, dropping the ones that cannot be resolved.
    pub fn resolve(&self, rows: Vec<RawMarketRow>) -> (Vec<ResolvedRow>, ResolutionReport) {
        let mut report = ResolutionReport::default();
        let mut resolved = Vec::with_capacity(rows.len());

        for row in rows {
            let date = row.date();
            let Some(targets) = self.index.get(&(date, row.instrument_id)) else {
                report.reject(ResolutionError::Unmapped {
                    date,
                    instrument_id: row.instrument_id,
                });
                continue;
            };

            let (clear, ambiguous): (Vec<&Target>, Vec<&Target>) =
                targets.iter().partition(|t| t.ambiguous.is_none());

            if clear.is_empty() {
                let first = &ambiguous[0];
                report.reject(ResolutionError::Ambiguous {
                    date,
                    symbol: first.symbol.clone(),
                    instrument_ids: first.ambiguous.clone().unwrap_or_default(),
                });
                continue;
            }

            for t in &ambiguous {
                warn!(
                    "Skipping ambiguous {} on {} for instrument {}",
                    t.symbol, date, row.instrument_id
                );
            }

            report.matched += 1;
            report.resolved += clear.len();
            resolved.extend(clear.into_iter().map(|t| ResolvedRow {
                row: row.clone(),
                symbol: t.symbol.clone(),
                contract: t.contract.clone(),
            }));
        }

        (resolved, report)
    }
}

/// Raw-symbol requests skip reference data: the provider symbol is the stored symbol.
pub fn attribute_raw(rows: Vec<RawMarketRow>) -> (Vec<ResolvedRow>, ResolutionReport) {
    let mut report = ResolutionReport::default();
    let mut resolved = Vec::with_capacity(rows.len());

    for row in rows {
        match row.symbol.clone() {
            Some(symbol) => {
                report.matched += 1;
                report.resolved += 1;
                resolved.push(ResolvedRow {
                    row,
                    contract: symbol.clone(),
                    symbol,
                });
            }
            None => report.reject(ResolutionError::MissingSymbol {
                date: row.date(),
                instrument_id: row.instrument_id,
            }),
        }
    }

    (resolved, report)
}
