//! Command-line interface
//!
//! Provides CLI commands for futures OHLCV ingestion.

pub mod db;
pub mod ingest;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// Futures Ingest CLI
#[derive(Parser)]
#[command(name = "futures-ingest")]
#[command(about = "Historical futures OHLCV ingestion into PostgreSQL/TimescaleDB")]
#[command(version)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Fetch bars from Databento and upsert them into the store
    Ingest(ingest::IngestArgs),
    /// Database operations
    #[command(subcommand)]
    Db(db::DbCommands),
}

/// Parse a `YYYY-MM-DD` argument
pub(crate) fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| anyhow!("invalid date '{}' (expected YYYY-MM-DD): {}", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ingest_command() {
        let cli = Cli::try_parse_from([
            "futures-ingest",
            "ingest",
            "--symbols",
            "ES.c.0,NQ.c.0",
            "--start",
            "2024-01-01",
            "--end",
            "2024-01-31",
            "--max-retries",
            "2",
        ])
        .unwrap();

        match cli.command {
            Commands::Ingest(args) => {
                assert_eq!(args.symbols, vec!["ES.c.0", "NQ.c.0"]);
                assert_eq!(args.schema, "ohlcv-1d");
                assert_eq!(args.max_retries, 2);
                assert!(args.dataset.is_none());
            }
            _ => panic!("expected ingest command"),
        }
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2024-01-31").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()
        );
        assert!(parse_date("01/31/2024").is_err());
    }
}
