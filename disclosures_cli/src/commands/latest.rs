//! The `latest` subcommand: most recent transaction per filer and security.

use anyhow::Result;
use disclosures_lib::IngestConfig;

use crate::output::{print_latest, OutputFormat};

pub fn run(config: &IngestConfig, format: &OutputFormat) -> Result<()> {
    let db = config.open_db()?;
    let rows = db.latest_transactions()?;
    print_latest(&rows, format)
}
