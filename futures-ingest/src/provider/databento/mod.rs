//! Databento historical data provider
//!
//! - [`DatabentoClient`]: [`HistoricalDataProvider`](crate::provider::HistoricalDataProvider)
//!   over the official `databento` client
//! - [`convert`]: DBN record, date and enum conversions
//!
//! Continuous requests are answered with instrument-level bars. Attribution back to
//! the requested continuous symbol goes through `symbology.resolve` plus the
//! definition schema, which supplies each contract's `raw_symbol`.

mod client;
pub mod convert;

pub use client::DatabentoClient;
