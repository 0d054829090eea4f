//! Database management commands

use anyhow::{anyhow, Result};
use chrono::{Duration, NaiveTime};
use clap::{Args, Subcommand};
use tracing::info;

use crate::config::Settings;
use crate::schema::BarSchema;
use crate::storage::{OhlcvStore, PgOhlcvStore};

use super::parse_date;

/// Database subcommands
#[derive(Subcommand)]
pub enum DbCommands {
    /// Create the namespace and OHLCV table
    Migrate(MigrateArgs),
    /// Show per-symbol row counts and coverage
    Stats(StatsArgs),
    /// Print stored bars for a symbol
    Show(ShowArgs),
}

/// Arguments for migrate command
#[derive(Args)]
pub struct MigrateArgs {
    /// Bar schema whose table to create
    #[arg(long, default_value = "ohlcv-1d")]
    pub schema: String,
}

/// Arguments for stats command
#[derive(Args)]
pub struct StatsArgs {
    /// Only show this symbol
    #[arg(long, short)]
    pub symbol: Option<String>,

    #[arg(long, default_value = "ohlcv-1d")]
    pub schema: String,
}

/// Arguments for show command
#[derive(Args)]
pub struct ShowArgs {
    /// Symbols to show (comma-separated)
    #[arg(long, short, value_delimiter = ',', required = true)]
    pub symbol: Vec<String>,

    /// Start date, inclusive (YYYY-MM-DD)
    #[arg(long)]
    pub start: String,

    /// End date, inclusive (YYYY-MM-DD)
    #[arg(long)]
    pub end: String,

    #[arg(long, default_value = "ohlcv-1d")]
    pub schema: String,

    /// Print JSON lines instead of a table
    #[arg(long)]
    pub json: bool,
}

/// Execute database commands
pub async fn execute(cmd: DbCommands) -> Result<()> {
    let settings = Settings::load()?;
    let store = PgOhlcvStore::from_settings(&settings.database, &settings.storage).await?;

    match cmd {
        DbCommands::Migrate(args) => execute_migrate(&store, args).await,
        DbCommands::Stats(args) => execute_stats(&store, args).await,
        DbCommands::Show(args) => execute_show(&store, args).await,
    }
}

fn parse_schema(value: &str) -> Result<BarSchema> {
    value.parse().map_err(|e: String| anyhow!(e))
}

async fn execute_migrate(store: &PgOhlcvStore, args: MigrateArgs) -> Result<()> {
    let schema = parse_schema(&args.schema)?;

    info!("Running migrations for {}...", store.table(schema));
    store.ensure_schema(schema).await?;
    info!("Migrations completed");
    Ok(())
}

async fn execute_stats(store: &PgOhlcvStore, args: StatsArgs) -> Result<()> {
    let schema = parse_schema(&args.schema)?;
    let stats = store.stats(schema).await?;

    let stats: Vec<_> = stats
        .into_iter()
        .filter(|s| args.symbol.as_ref().map_or(true, |sym| &s.symbol == sym))
        .collect();

    info!("Statistics for {}:", store.table(schema));
    if stats.is_empty() {
        info!("  No data");
        return Ok(());
    }

    let total: u64 = stats.iter().map(|s| s.total_records).sum();
    info!("  Total records: {}", total);
    info!("  Symbols:       {}", stats.len());
    for s in &stats {
        info!(
            "  {}: {} records ({} - {})",
            s.symbol,
            s.total_records,
            s.earliest_time.date_naive(),
            s.latest_time.date_naive()
        );
    }
    Ok(())
}

async fn execute_show(store: &PgOhlcvStore, args: ShowArgs) -> Result<()> {
    let schema = parse_schema(&args.schema)?;
    let start = parse_date(&args.start)?;
    let end = parse_date(&args.end)?;
    if start > end {
        return Err(anyhow!("start {} is after end {}", start, end));
    }

    let start = start.and_time(NaiveTime::MIN).and_utc();
    let end = (end + Duration::days(1)).and_time(NaiveTime::MIN).and_utc();
    let records = store.fetch_range(schema, &args.symbol, start, end).await?;

    if args.json {
        for record in &records {
            println!("{}", serde_json::to_string(record)?);
        }
        return Ok(());
    }

    println!(
        "{:<25} {:<10} {:>12} {:>12} {:>12} {:>12} {:>10}",
        "time", "symbol", "open", "high", "low", "close", "volume"
    );
    for r in &records {
        println!(
            "{:<25} {:<10} {:>12.2} {:>12.2} {:>12.2} {:>12.2} {:>10}",
            r.time.to_rfc3339(),
            r.symbol,
            r.open,
            r.high,
            r.low,
            r.close,
            r.volume
        );
    }
    info!("{} rows", records.len());
    Ok(())
}
