mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use disclosures_lib::IngestConfig;

use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "disclosures")]
#[command(about = "Ingest and query congressional trade disclosures")]
struct Cli {
    /// Output format: table, json, csv or markdown
    #[arg(long, default_value = "table", global = true)]
    output: String,

    /// SQLite database path (overrides DISCLOSURES_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Directory holding the grouped JSON archive (overrides DISCLOSURES_ARCHIVE_DIR)
    #[arg(long, global = true)]
    archive_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a batch of scraped rows into the archive and database
    Ingest(commands::ingest::IngestArgs),
    /// List filers
    Filers(commands::filers::FilersArgs),
    /// List security tickers
    Tickers(commands::tickers::TickersArgs),
    /// Latest transaction per filer and security
    Latest,
    /// Query stored transactions
    Transactions(commands::transactions::TransactionsArgs),
    /// Pair a filer's transactions in securities of the same asset class
    Pairs(commands::pairs::PairsArgs),
    /// Show the grouped archive
    Archive,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("disclosures=info".parse()?)
                .add_directive("disclosures_lib=info".parse()?),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let format = match cli.output.as_str() {
        "json" => OutputFormat::Json,
        "csv" => OutputFormat::Csv,
        "markdown" | "md" => OutputFormat::Markdown,
        _ => OutputFormat::Table,
    };

    let mut config = IngestConfig::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(dir) = cli.archive_dir {
        config.archive_dir = dir;
    }

    match &cli.command {
        Commands::Ingest(args) => commands::ingest::run(args, &config, &format).await?,
        Commands::Filers(args) => commands::filers::run(args, &config, &format)?,
        Commands::Tickers(args) => commands::tickers::run(args, &config, &format)?,
        Commands::Latest => commands::latest::run(&config, &format)?,
        Commands::Transactions(args) => commands::transactions::run(args, &config, &format)?,
        Commands::Pairs(args) => commands::pairs::run(args, &config, &format)?,
        Commands::Archive => commands::archive::run(&config, &format)?,
    }

    Ok(())
}
