//! Futures Ingest CLI
//!
//! Provides commands for:
//! - `ingest`: Fetch bars from Databento and upsert them
//! - `db`: Database operations

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use futures_ingest::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("futures_ingest=info".parse()?))
        .init();

    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest(args) => {
            futures_ingest::cli::ingest::execute(args).await?;
        }
        Commands::Db(cmd) => {
            futures_ingest::cli::db::execute(cmd).await?;
        }
    }

    Ok(())
}
