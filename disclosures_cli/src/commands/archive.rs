//! The `archive` subcommand.

use anyhow::Result;
use disclosures_lib::archive;
use disclosures_lib::IngestConfig;

use crate::output::{print_archive, OutputFormat};

pub fn run(config: &IngestConfig, format: &OutputFormat) -> Result<()> {
    let store = config.archive();
    let grouped = store.load()?;
    eprintln!(
        "{} rows over {} disclosure dates in {}",
        archive::row_count(&grouped),
        grouped.len(),
        store.grouped_path().display()
    );
    print_archive(&grouped, format)
}
