//! Ingest command - fetch historical bars and upsert them

use anyhow::{anyhow, Result};
use clap::Args;
use tracing::{info, warn};

use crate::config::Settings;
use crate::driver::{ingest_with_settings, IngestConfig};
use crate::error::ErrorClassification;
use crate::schema::BarSchema;

use super::parse_date;

/// Arguments for the ingest command
#[derive(Args)]
pub struct IngestArgs {
    /// Symbols to ingest (comma-separated, e.g. ES.c.0,NQ.c.0 or ESH4)
    #[arg(long, short, value_delimiter = ',', required = true)]
    pub symbols: Vec<String>,

    /// Databento dataset (defaults to databento.default_dataset)
    #[arg(long, short)]
    pub dataset: Option<String>,

    /// Start date, inclusive (YYYY-MM-DD)
    #[arg(long)]
    pub start: String,

    /// End date, inclusive (YYYY-MM-DD)
    #[arg(long)]
    pub end: String,

    /// Bar schema (ohlcv-1d, ohlcv-1h, ohlcv-1m, ohlcv-1s)
    #[arg(long, default_value = "ohlcv-1d")]
    pub schema: String,

    /// Issue one provider request per symbol
    #[arg(long)]
    pub per_symbol: bool,

    /// Retry transient failures up to N times
    #[arg(long, default_value = "0")]
    pub max_retries: u32,

    /// Fetch and validate without writing to the database
    #[arg(long)]
    pub dry_run: bool,
}

/// Execute the ingest command
pub async fn execute(args: IngestArgs) -> Result<()> {
    let settings = Settings::load()?;

    let schema: BarSchema = args.schema.parse().map_err(|e: String| anyhow!(e))?;
    let mut config = IngestConfig::new(
        args.symbols.clone(),
        args.dataset
            .clone()
            .unwrap_or_else(|| settings.databento.default_dataset.clone()),
        parse_date(&args.start)?,
        parse_date(&args.end)?,
    );
    config.schema = schema;
    config.per_symbol = args.per_symbol;
    config.dry_run = args.dry_run;

    let api_key = settings.databento.api_key.clone();
    if api_key.is_empty() {
        return Err(anyhow!(
            "Databento API key not configured \
             (set DATABENTO_API_KEY or FUTURES_INGEST__DATABENTO__API_KEY)"
        ));
    }

    info!("=== Ingest Request ===");
    info!("Symbols:      {:?}", config.symbols);
    info!("Dataset:      {}", config.dataset);
    info!("Schema:       {}", config.schema);
    info!("Date Range:   {} to {} (inclusive)", config.start_date, config.end_date);

    let mut attempt = 0;
    let report = loop {
        match ingest_with_settings(&config, &api_key, &settings).await {
            Ok(report) => break report,
            Err(e) if e.is_transient() && attempt < args.max_retries => {
                attempt += 1;
                let delay = e.suggested_retry_delay().unwrap_or_default();
                warn!(
                    "Attempt {} failed ({}), retrying in {:?}",
                    attempt, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e.into()),
        }
    };

    info!("=== Ingest Complete ===");
    info!("Windows:      {}", report.windows);
    info!("Fetched:      {}", report.fetched);
    info!("Unresolved:   {}", report.unresolved);
    info!("Rejected:     {}", report.rejected);
    info!("Written:      {}", report.written);
    if config.dry_run {
        info!("Dry run - nothing was written to the database");
    }

    Ok(())
}
