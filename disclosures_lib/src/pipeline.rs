//! Batch ingestion: parse each raw row and upsert it, one row at a time.
//!
//! A run is single-writer and sequential. Each row gets its own unit of
//! work, so a failing row is skipped and reported without undoing the rows
//! before it. Cancellation is honoured between rows, never mid-upsert.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::archive::{ArchiveStore, ArchiveSummary};
use crate::db::{DbError, UpsertOutcome};
use crate::error::IngestError;
use crate::parse::{parse_row, ParsedTrade};
use crate::row::{self, RawRow, MIN_ROW_CELLS};

/// Write side of the relational store, as the pipeline needs it.
pub trait TradeStore {
    /// Upsert the entities of one trade atomically; `raw` is kept for audit.
    fn upsert_trade(&self, trade: &ParsedTrade, raw: &[String]) -> Result<UpsertOutcome, DbError>;
}

impl<S: TradeStore + ?Sized> TradeStore for &S {
    fn upsert_trade(&self, trade: &ParsedTrade, raw: &[String]) -> Result<UpsertOutcome, DbError> {
        (**self).upsert_trade(trade, raw)
    }
}

impl<S: TradeStore + ?Sized> TradeStore for Arc<S> {
    fn upsert_trade(&self, trade: &ParsedTrade, raw: &[String]) -> Result<UpsertOutcome, DbError> {
        (**self).upsert_trade(trade, raw)
    }
}

/// Shared flag that stops a run before its next row.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a row did not produce a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// Too few cells to normalize.
    Malformed { cells: usize },
    /// Filer and security were stored, but no transaction date parsed.
    MissingTransactionDate,
    /// The store rejected the row; its unit of work was rolled back.
    Store { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    /// Position of the row in the submitted batch.
    pub index: usize,
    pub filer_name: String,
    pub reason: SkipReason,
}

/// Per-row result handed to progress observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Accepted(UpsertOutcome),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    pub accepted: usize,
    pub skipped: usize,
    pub transactions_inserted: usize,
    pub duplicate_transactions: usize,
    /// Set when the run stopped early; rows after the stop are not counted.
    pub cancelled: bool,
    pub failures: Vec<RowFailure>,
    pub archive: Option<ArchiveSummary>,
}

impl IngestionReport {
    fn record(&mut self, index: usize, trade: Option<&ParsedTrade>, outcome: &RowOutcome) {
        match outcome {
            RowOutcome::Accepted(upsert) => {
                self.accepted += 1;
                if upsert.transaction_inserted {
                    self.transactions_inserted += 1;
                } else {
                    self.duplicate_transactions += 1;
                }
            }
            RowOutcome::Skipped(reason) => {
                self.skipped += 1;
                self.failures.push(RowFailure {
                    index,
                    filer_name: trade.map(|t| t.filer_name.clone()).unwrap_or_default(),
                    reason: reason.clone(),
                });
            }
        }
    }
}

pub struct IngestionPipeline<S> {
    store: S,
    archive: Option<ArchiveStore>,
}

impl<S: TradeStore> IngestionPipeline<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            archive: None,
        }
    }

    /// Also merge every batch into a grouped archive before upserting.
    pub fn with_archive(mut self, archive: ArchiveStore) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Parse and upsert every row. Never fails: bad rows are counted as
    /// skipped and listed in the report.
    pub fn ingest(&self, rows: &[RawRow]) -> IngestionReport {
        self.ingest_with(rows, &CancelToken::new(), |_, _| {})
    }

    /// Like [`Self::ingest`], stopping before the next row once `cancel`
    /// fires and calling `on_row` after each processed row.
    pub fn ingest_with<F>(
        &self,
        rows: &[RawRow],
        cancel: &CancelToken,
        mut on_row: F,
    ) -> IngestionReport
    where
        F: FnMut(usize, &RowOutcome),
    {
        let mut report = IngestionReport::default();

        for (index, raw) in rows.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!("Ingestion cancelled before row {} of {}", index, rows.len());
                report.cancelled = true;
                break;
            }

            if raw.len() < MIN_ROW_CELLS {
                tracing::warn!(
                    "Skipping malformed row {} ({} cells, filer {:?})",
                    index,
                    raw.len(),
                    row::cell(raw, row::FILER_CELL).lines().next().unwrap_or("")
                );
                let outcome = RowOutcome::Skipped(SkipReason::Malformed { cells: raw.len() });
                report.record(index, None, &outcome);
                on_row(index, &outcome);
                continue;
            }

            let trade = parse_row(raw);
            let outcome = self.upsert_one(index, &trade, raw);
            report.record(index, Some(&trade), &outcome);
            on_row(index, &outcome);
        }

        tracing::info!(
            "Ingested {} rows: {} accepted, {} skipped, {} new transactions",
            rows.len(),
            report.accepted,
            report.skipped,
            report.transactions_inserted
        );
        report
    }

    /// One ingestion run: merge the batch into the archive (if configured),
    /// then upsert row by row.
    ///
    /// An unreadable archive aborts the run before any row is written.
    pub fn run(
        &self,
        rows: &[RawRow],
        cancel: &CancelToken,
    ) -> Result<IngestionReport, IngestError> {
        self.run_with(rows, cancel, |_, _| {})
    }

    pub fn run_with<F>(
        &self,
        rows: &[RawRow],
        cancel: &CancelToken,
        on_row: F,
    ) -> Result<IngestionReport, IngestError>
    where
        F: FnMut(usize, &RowOutcome),
    {
        let archive = match self.archive {
            Some(ref store) => Some(store.save_rows(rows)?),
            None => None,
        };

        let mut report = self.ingest_with(rows, cancel, on_row);
        report.archive = archive;
        Ok(report)
    }

    fn upsert_one(&self, index: usize, trade: &ParsedTrade, raw: &[String]) -> RowOutcome {
        match self.store.upsert_trade(trade, raw) {
            Ok(upsert) if upsert.transaction_id.is_some() => {
                tracing::debug!(
                    "Row {}: {} {} {} (transaction {:?}, new: {})",
                    index,
                    trade.filer_name,
                    trade.transaction_type,
                    trade.security_ticker,
                    upsert.transaction_id,
                    upsert.transaction_inserted
                );
                RowOutcome::Accepted(upsert)
            }
            Ok(_) => {
                tracing::warn!(
                    "Row {} for {}: no transaction date, transaction not written",
                    index,
                    trade.filer_name
                );
                RowOutcome::Skipped(SkipReason::MissingTransactionDate)
            }
            Err(e) => {
                tracing::warn!("Error processing row {} for {}: {}", index, trade.filer_name, e);
                RowOutcome::Skipped(SkipReason::Store {
                    message: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::db::Db;

    fn row(cells: &[&str]) -> RawRow {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn dated_row(ticker: &str, filer: &str, tx_date: &str) -> RawRow {
        row(&[
            &format!("{}\n{} COMMON STOCK\nST", ticker, ticker),
            "Purchase\n$1,001 - $15,000",
            &format!("{}\nHouse / R", filer),
            "Jan. 07, 2026",
            tx_date,
        ])
    }

    fn test_db() -> Db {
        let db = Db::open_in_memory().expect("open in-memory db");
        db.init().expect("init schema");
        db
    }

    /// Store that fails for one filer and succeeds for everyone else.
    struct FlakyStore {
        failing_filer: &'static str,
        calls: RefCell<usize>,
    }

    impl TradeStore for FlakyStore {
        fn upsert_trade(
            &self,
            trade: &ParsedTrade,
            _raw: &[String],
        ) -> Result<UpsertOutcome, DbError> {
            *self.calls.borrow_mut() += 1;
            if trade.filer_name == self.failing_filer {
                return Err(DbError::Sqlite(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                    Some("unable to open database file".into()),
                )));
            }
            Ok(UpsertOutcome {
                filer_id: 1,
                security_id: 1,
                transaction_id: trade.transaction_date.map(|_| 1),
                transaction_inserted: trade.transaction_date.is_some(),
            })
        }
    }

    #[test]
    fn malformed_row_is_skipped_without_aborting() {
        let db = test_db();
        let pipeline = IngestionPipeline::new(&db);
        let rows = vec![
            dated_row("AAPL", "Jane Doe", "Dec. 01, 2025"),
            dated_row("MSFT", "Jane Doe", "Dec. 02, 2025"),
            row(&["NVDA\nNVIDIA", "Sale", "John Roe\nSenate / D"]),
            dated_row("AMZN", "John Roe", "Dec. 03, 2025"),
            dated_row("TSLA", "John Roe", "Dec. 04, 2025"),
        ];

        let report = pipeline.ingest(&rows);
        assert_eq!(report.accepted, 4);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failures[0].index, 2);
        assert_eq!(report.failures[0].reason, SkipReason::Malformed { cells: 3 });
        assert_eq!(db.transaction_count().unwrap(), 4);
        assert_eq!(db.tickers().unwrap(), vec!["AAPL", "AMZN", "MSFT", "TSLA"]);
    }

    #[test]
    fn reingesting_batch_counts_duplicates() {
        let db = test_db();
        let pipeline = IngestionPipeline::new(&db);
        let rows = vec![
            dated_row("AAPL", "Jane Doe", "Dec. 01, 2025"),
            dated_row("MSFT", "Jane Doe", "Dec. 02, 2025"),
        ];

        let first = pipeline.ingest(&rows);
        let second = pipeline.ingest(&rows);
        assert_eq!(first.transactions_inserted, 2);
        assert_eq!(second.accepted, 2);
        assert_eq!(second.transactions_inserted, 0);
        assert_eq!(second.duplicate_transactions, 2);
        assert_eq!(db.transaction_count().unwrap(), 2);
    }

    #[test]
    fn undated_row_is_skipped_but_entities_stored() {
        let db = test_db();
        let pipeline = IngestionPipeline::new(&db);
        let report = pipeline.ingest(&[dated_row("AAPL", "Jane Doe", "pending")]);

        assert_eq!(report.accepted, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failures[0].reason, SkipReason::MissingTransactionDate);
        assert_eq!(report.failures[0].filer_name, "Jane Doe");
        assert_eq!(db.filer_names().unwrap(), vec!["Jane Doe"]);
        assert_eq!(db.transaction_count().unwrap(), 0);
    }

    #[test]
    fn store_failure_isolated_to_its_row() {
        let store = FlakyStore {
            failing_filer: "John Roe",
            calls: RefCell::new(0),
        };
        let pipeline = IngestionPipeline::new(store);
        let rows = vec![
            dated_row("AAPL", "Jane Doe", "Dec. 01, 2025"),
            dated_row("MSFT", "John Roe", "Dec. 02, 2025"),
            dated_row("AMZN", "Jane Doe", "Dec. 03, 2025"),
        ];

        let report = pipeline.ingest(&rows);
        assert_eq!(report.accepted, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(*pipeline.store().calls.borrow(), 3);

        let failure = &report.failures[0];
        assert_eq!(failure.index, 1);
        assert_eq!(failure.filer_name, "John Roe");
        assert!(matches!(failure.reason, SkipReason::Store { .. }));
    }

    #[test]
    fn cancel_stops_at_row_boundary() {
        let db = test_db();
        let pipeline = IngestionPipeline::new(&db);
        let cancel = CancelToken::new();
        let rows = vec![
            dated_row("AAPL", "Jane Doe", "Dec. 01, 2025"),
            dated_row("MSFT", "Jane Doe", "Dec. 02, 2025"),
            dated_row("AMZN", "Jane Doe", "Dec. 03, 2025"),
        ];

        let mut seen = Vec::new();
        let report = pipeline.ingest_with(&rows, &cancel, |index, _| {
            seen.push(index);
            if index == 0 {
                cancel.cancel();
            }
        });

        assert!(report.cancelled);
        assert_eq!(report.accepted, 1);
        assert_eq!(seen, vec![0]);
        assert_eq!(db.transaction_count().unwrap(), 1);
    }

    #[test]
    fn run_merges_archive_then_upserts() {
        let dir = tempfile::tempdir().unwrap();
        let db = test_db();
        let pipeline = IngestionPipeline::new(&db).with_archive(ArchiveStore::new(dir.path()));
        let rows = vec![
            dated_row("AAPL", "Jane Doe", "Dec. 01, 2025"),
            row(&["bad"]),
        ];

        let report = pipeline.run(&rows, &CancelToken::new()).unwrap();
        let archive = report.archive.expect("archive summary");
        assert_eq!(archive.appended, 1);
        assert_eq!(report.accepted, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn corrupt_archive_aborts_run_before_upserts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path());
        std::fs::write(store.grouped_path(), "[1, 2").unwrap();

        let db = test_db();
        let pipeline = IngestionPipeline::new(&db).with_archive(store);
        let result = pipeline.run(
            &[dated_row("AAPL", "Jane Doe", "Dec. 01, 2025")],
            &CancelToken::new(),
        );

        assert!(matches!(result, Err(IngestError::Archive(_))));
        assert_eq!(db.transaction_count().unwrap(), 0);
    }
}
