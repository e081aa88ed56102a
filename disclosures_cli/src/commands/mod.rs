//! CLI subcommand implementations.

pub mod archive;
pub mod filers;
pub mod ingest;
pub mod latest;
pub mod pairs;
pub mod tickers;
pub mod transactions;
