//! The `filers` subcommand.

use anyhow::Result;
use clap::Args;
use disclosures_lib::IngestConfig;

use crate::output::{print_filer_names, print_filers, OutputFormat};

#[derive(Args)]
pub struct FilersArgs {
    /// Read names from the archive's filer list instead of the database
    #[arg(long)]
    pub from_archive: bool,
}

pub fn run(args: &FilersArgs, config: &IngestConfig, format: &OutputFormat) -> Result<()> {
    if args.from_archive {
        let names = config.archive().load_filer_names()?;
        eprintln!("{} filers in {}", names.len(), config.archive_dir.display());
        return print_filer_names(&names, format);
    }

    let db = config.open_db()?;
    let filers = db.filers()?;
    eprintln!("{} filers in {}", filers.len(), config.db_path.display());
    print_filers(&filers, format)
}
