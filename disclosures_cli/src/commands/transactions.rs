//! The `transactions` subcommand: filtered query over stored transactions.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::Args;
use disclosures_lib::{DbTransactionFilter, IngestConfig, TransactionType};

use crate::output::{print_transactions, OutputFormat};

#[derive(Args)]
pub struct TransactionsArgs {
    /// Filer name (partial match)
    #[arg(long)]
    pub filer: Option<String>,

    /// Security ticker (exact, case-insensitive)
    #[arg(long)]
    pub ticker: Option<String>,

    /// Transaction type: purchase, sale, exchange, other
    #[arg(long)]
    pub tx_type: Option<String>,

    /// Earliest transaction date (YYYY-MM-DD)
    #[arg(long)]
    pub since: Option<String>,

    /// Latest transaction date (YYYY-MM-DD)
    #[arg(long)]
    pub until: Option<String>,

    /// Maximum number of rows
    #[arg(long, default_value = "100")]
    pub limit: i64,
}

pub fn run(args: &TransactionsArgs, config: &IngestConfig, format: &OutputFormat) -> Result<()> {
    let filter = build_filter(args)?;
    let db = config.open_db()?;
    let rows = db.query_transactions(&filter)?;
    eprintln!("{} transactions", rows.len());
    print_transactions(&rows, format)
}

fn build_filter(args: &TransactionsArgs) -> Result<DbTransactionFilter> {
    if args.limit < 1 {
        bail!("--limit must be at least 1");
    }
    let since = args.since.as_deref().map(parse_date).transpose()?;
    let until = args.until.as_deref().map(parse_date).transpose()?;
    if let (Some(since), Some(until)) = (since, until) {
        if since > until {
            bail!("--since {} is after --until {}", since, until);
        }
    }

    Ok(DbTransactionFilter {
        filer: args.filer.clone(),
        ticker: args.ticker.clone(),
        transaction_type: args.tx_type.as_deref().map(parse_tx_type).transpose()?,
        since,
        until,
        limit: Some(args.limit),
    })
}

fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date {:?}, expected YYYY-MM-DD", text))
}

fn parse_tx_type(text: &str) -> Result<TransactionType> {
    match text.trim().to_ascii_lowercase().as_str() {
        "purchase" | "buy" => Ok(TransactionType::Purchase),
        "sale" | "sell" => Ok(TransactionType::Sale),
        "exchange" => Ok(TransactionType::Exchange),
        "other" => Ok(TransactionType::Other),
        other => bail!(
            "invalid transaction type {:?}, expected purchase, sale, exchange or other",
            other
        ),
    }
}
