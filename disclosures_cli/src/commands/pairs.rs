//! The `pairs` subcommand: a filer's transactions grouped by asset class.

use anyhow::Result;
use clap::Args;
use disclosures_lib::IngestConfig;

use crate::output::{print_pairs, OutputFormat};

#[derive(Args)]
pub struct PairsArgs {
    /// Only pairs involving this ticker (exact, case-insensitive)
    #[arg(long)]
    pub ticker: Option<String>,

    /// Filer name (partial match)
    #[arg(long)]
    pub filer: Option<String>,
}

pub fn run(args: &PairsArgs, config: &IngestConfig, format: &OutputFormat) -> Result<()> {
    let db = config.open_db()?;
    let pairs = db.same_type_pairs(args.ticker.as_deref(), args.filer.as_deref())?;
    eprintln!("{} same-type pairs", pairs.len());
    print_pairs(&pairs, format)
}
