//! The `ingest` subcommand: run a batch of scraped rows through the pipeline.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use disclosures_lib::{CancelToken, IngestConfig, IngestionPipeline, RawRow, RowOutcome};
use indicatif::{ProgressBar, ProgressStyle};

use crate::output::{print_archive_summary, print_report, OutputFormat};

/// Arguments for the `ingest` subcommand.
#[derive(Args)]
pub struct IngestArgs {
    /// JSON file holding an array of rows, each an array of cell strings
    #[arg(long)]
    pub input: PathBuf,

    /// Do not merge the batch into the grouped archive
    #[arg(long)]
    pub no_archive: bool,

    /// Only merge into the archive; leave the database untouched
    #[arg(long)]
    pub no_db: bool,
}

pub async fn run(args: &IngestArgs, config: &IngestConfig, format: &OutputFormat) -> Result<()> {
    if args.no_archive && args.no_db {
        bail!("--no-archive and --no-db together leave nothing to ingest");
    }

    let rows = read_rows(&args.input)?;
    eprintln!("Read {} rows from {}", rows.len(), args.input.display());

    if args.no_db {
        let store = config.archive();
        let summary = tokio::task::spawn_blocking(move || store.save_rows(&rows)).await??;
        print_archive_summary(&summary, format)?;
        return Ok(());
    }

    let db = config.open_db()?;
    let archive = (!args.no_archive).then(|| config.archive());
    eprintln!("Ingesting into {}", config.db_path.display());

    let cancel = CancelToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted: stopping after the current row");
                cancel.cancel();
            }
        })
    };

    let pb = ProgressBar::new(rows.len() as u64);
    pb.set_style(ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} ({eta}) {msg}",
    )?);
    pb.set_message("ingesting rows...");

    let progress = pb.clone();
    let report = tokio::task::spawn_blocking(move || {
        let mut pipeline = IngestionPipeline::new(db);
        if let Some(archive) = archive {
            pipeline = pipeline.with_archive(archive);
        }

        let mut accepted = 0usize;
        let mut skipped = 0usize;
        pipeline.run_with(&rows, &cancel, |_, outcome| {
            match outcome {
                RowOutcome::Accepted(_) => accepted += 1,
                RowOutcome::Skipped(_) => skipped += 1,
            }
            progress.set_message(format!("{} accepted, {} skipped", accepted, skipped));
            progress.inc(1);
        })
    })
    .await??;
    interrupt.abort();

    if report.cancelled {
        pb.abandon_with_message(format!(
            "Cancelled: {} accepted, {} skipped",
            report.accepted, report.skipped
        ));
    } else {
        pb.finish_with_message(format!(
            "Done: {} accepted, {} skipped",
            report.accepted, report.skipped
        ));
    }

    print_report(&report, format)
}

fn read_rows(path: &Path) -> Result<Vec<RawRow>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let rows: Vec<RawRow> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of string rows", path.display()))?;
    Ok(rows)
}
