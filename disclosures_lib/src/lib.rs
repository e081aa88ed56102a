//! Library layer for congressional trade disclosures: row parsing, the
//! grouped JSON archive, the pooled SQLite store, and the ingestion pipeline
//! that ties them together.
//!
//! Rows arrive as scraped table cells (`Vec<String>`). [`parse_row`] turns a
//! row into a [`ParsedTrade`], [`ArchiveStore`] merges rows into the on-disk
//! archive keyed by disclosure date, and [`Db`] upserts filers, securities and
//! transactions idempotently. [`IngestionPipeline`] runs a batch through both
//! and reports how many rows were accepted or skipped.

pub mod archive;
pub mod config;
pub mod db;
pub mod error;
pub mod parse;
pub mod pipeline;
pub mod row;

pub use archive::{merge, ArchiveError, ArchiveIndex, ArchiveStore, ArchiveSummary, GroupedArchive};
pub use config::IngestConfig;
pub use db::{
    Db, DbError, DbTransactionFilter, DbTransactionRow, FilerRow, LatestTransactionRow,
    PoolSettings, SameTypePairRow, SecurityRow, UpsertOutcome,
};
pub use error::IngestError;
pub use parse::{parse_row, ParsedTrade, TransactionType};
pub use pipeline::{
    CancelToken, IngestionPipeline, IngestionReport, RowFailure, RowOutcome, SkipReason,
    TradeStore,
};
pub use row::RawRow;
