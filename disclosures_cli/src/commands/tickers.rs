//! The `tickers` subcommand.

use anyhow::Result;
use clap::Args;
use disclosures_lib::IngestConfig;

use crate::output::{print_tickers, OutputFormat};

#[derive(Args)]
pub struct TickersArgs {
    /// Read tickers from the archive's ticker list instead of the database
    #[arg(long)]
    pub from_archive: bool,
}

pub fn run(args: &TickersArgs, config: &IngestConfig, format: &OutputFormat) -> Result<()> {
    let tickers = if args.from_archive {
        config.archive().load_tickers()?
    } else {
        config.open_db()?.tickers()?
    };
    eprintln!("{} tickers", tickers.len());
    print_tickers(&tickers, format)
}
