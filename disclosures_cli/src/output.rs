use anyhow::Result;
use disclosures_lib::{
    ArchiveSummary, DbTransactionRow, FilerRow, GroupedArchive, IngestionReport,
    LatestTransactionRow, SameTypePairRow, SkipReason,
};
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Clone, Debug)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
    Markdown,
}

#[derive(Tabled, Serialize)]
struct FilerOutRow {
    #[tabled(rename = "Name")]
    #[serde(rename = "Name")]
    name: String,
    #[tabled(rename = "Chamber")]
    #[serde(rename = "Chamber")]
    chamber: String,
    #[tabled(rename = "Party")]
    #[serde(rename = "Party")]
    party: String,
}

#[derive(Tabled, Serialize)]
struct NameRow {
    #[tabled(rename = "Name")]
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Tabled, Serialize)]
struct TickerRow {
    #[tabled(rename = "Ticker")]
    #[serde(rename = "Ticker")]
    ticker: String,
}

#[derive(Tabled, Serialize)]
struct LatestRow {
    #[tabled(rename = "Ticker")]
    #[serde(rename = "Ticker")]
    ticker: String,
    #[tabled(rename = "Security")]
    #[serde(rename = "Security")]
    security: String,
    #[tabled(rename = "Filer")]
    #[serde(rename = "Filer")]
    filer: String,
    #[tabled(rename = "Date")]
    #[serde(rename = "Date")]
    date: String,
    #[tabled(rename = "Type")]
    #[serde(rename = "Type")]
    tx_type: String,
    #[tabled(rename = "Amount")]
    #[serde(rename = "Amount")]
    amount: String,
}

#[derive(Tabled, Serialize)]
struct TransactionOutRow {
    #[tabled(rename = "Date")]
    #[serde(rename = "Date")]
    tx_date: String,
    #[tabled(rename = "Disclosed")]
    #[serde(rename = "Disclosed")]
    disclosed: String,
    #[tabled(rename = "Filer")]
    #[serde(rename = "Filer")]
    filer: String,
    #[tabled(rename = "Party")]
    #[serde(rename = "Party")]
    party: String,
    #[tabled(rename = "Ticker")]
    #[serde(rename = "Ticker")]
    ticker: String,
    #[tabled(rename = "Type")]
    #[serde(rename = "Type")]
    tx_type: String,
    #[tabled(rename = "Amount")]
    #[serde(rename = "Amount")]
    amount: String,
}

#[derive(Tabled, Serialize)]
struct PairOutRow {
    #[tabled(rename = "Filer")]
    #[serde(rename = "Filer")]
    filer: String,
    #[tabled(rename = "Asset")]
    #[serde(rename = "Asset")]
    asset_type: String,
    #[tabled(rename = "First")]
    #[serde(rename = "First")]
    first: String,
    #[tabled(rename = "Second")]
    #[serde(rename = "Second")]
    second: String,
}

#[derive(Tabled, Serialize)]
struct MetricRow {
    #[tabled(rename = "Metric")]
    #[serde(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Value")]
    #[serde(rename = "Value")]
    value: String,
}

#[derive(Tabled, Serialize)]
struct FailureRow {
    #[tabled(rename = "Row")]
    #[serde(rename = "Row")]
    index: usize,
    #[tabled(rename = "Filer")]
    #[serde(rename = "Filer")]
    filer: String,
    #[tabled(rename = "Reason")]
    #[serde(rename = "Reason")]
    reason: String,
}

#[derive(Tabled, Serialize)]
struct ArchiveDateRow {
    #[tabled(rename = "Disclosure Date")]
    #[serde(rename = "Disclosure Date")]
    date: String,
    #[tabled(rename = "Rows")]
    #[serde(rename = "Rows")]
    rows: usize,
}

// -- Row builders --

fn build_filer_rows(filers: &[FilerRow]) -> Vec<FilerOutRow> {
    filers
        .iter()
        .map(|f| FilerOutRow {
            name: f.name.clone(),
            chamber: f.chamber.clone(),
            party: f.party.clone(),
        })
        .collect()
}

fn build_latest_rows(rows: &[LatestTransactionRow]) -> Vec<LatestRow> {
    rows.iter()
        .map(|r| LatestRow {
            ticker: r.ticker.clone(),
            security: r.security_name.clone().unwrap_or_default(),
            filer: r.filer_name.clone().unwrap_or_default(),
            date: r.transaction_date.clone().unwrap_or_default(),
            tx_type: r.transaction_type.clone().unwrap_or_default(),
            amount: r.amount_range.clone().unwrap_or_default(),
        })
        .collect()
}

fn build_transaction_rows(rows: &[DbTransactionRow]) -> Vec<TransactionOutRow> {
    rows.iter()
        .map(|r| TransactionOutRow {
            tx_date: r.transaction_date.clone(),
            disclosed: r.disclosure_date.clone().unwrap_or_default(),
            filer: r.filer_name.clone(),
            party: r.party.clone(),
            ticker: r.ticker.clone(),
            tx_type: r.transaction_type.clone(),
            amount: r.amount_range.clone(),
        })
        .collect()
}

fn build_pair_rows(pairs: &[SameTypePairRow]) -> Vec<PairOutRow> {
    pairs
        .iter()
        .map(|p| PairOutRow {
            filer: p.filer_name.clone(),
            asset_type: p.asset_type.clone(),
            first: format!("{} {} {}", p.first_date, p.first_type, p.first_ticker),
            second: format!("{} {} {}", p.second_date, p.second_type, p.second_ticker),
        })
        .collect()
}

fn build_report_rows(report: &IngestionReport) -> Vec<MetricRow> {
    let mut rows = vec![
        metric("Accepted", report.accepted),
        metric("Skipped", report.skipped),
        metric("New transactions", report.transactions_inserted),
        metric("Duplicate transactions", report.duplicate_transactions),
    ];
    if report.cancelled {
        rows.push(metric("Cancelled", "yes"));
    }
    if let Some(ref archive) = report.archive {
        rows.extend(build_archive_summary_rows(archive));
    }
    rows
}

fn build_archive_summary_rows(summary: &ArchiveSummary) -> Vec<MetricRow> {
    vec![
        metric("Archive rows appended", summary.appended),
        metric("Archive rows", summary.rows),
        metric("Archive dates", summary.dates),
        metric("Archive filers", summary.filers),
        metric("Archive tickers", summary.tickers),
    ]
}

fn build_failure_rows(report: &IngestionReport) -> Vec<FailureRow> {
    report
        .failures
        .iter()
        .map(|f| FailureRow {
            index: f.index,
            filer: f.filer_name.clone(),
            reason: describe_skip(&f.reason),
        })
        .collect()
}

fn build_archive_date_rows(archive: &GroupedArchive) -> Vec<ArchiveDateRow> {
    archive
        .iter()
        .map(|(date, rows)| ArchiveDateRow {
            date: date.clone(),
            rows: rows.len(),
        })
        .collect()
}

fn metric(name: &str, value: impl ToString) -> MetricRow {
    MetricRow {
        metric: name.to_string(),
        value: value.to_string(),
    }
}

fn describe_skip(reason: &SkipReason) -> String {
    match reason {
        SkipReason::Malformed { cells } => format!("malformed row ({} cells)", cells),
        SkipReason::MissingTransactionDate => "no transaction date".to_string(),
        SkipReason::Store { message } => format!("store error: {}", message),
    }
}

// -- Generic writers --

fn print_table<R: Tabled>(rows: Vec<R>) {
    println!("{}", Table::new(rows));
}

fn print_markdown<R: Tabled>(rows: Vec<R>) {
    let mut table = Table::new(rows);
    table.with(Style::markdown());
    println!("{}", table);
}

fn print_csv<R: Serialize>(rows: &[R]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(std::io::stdout());
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Table, markdown and CSV render `rows`; JSON renders `data` untouched.
fn print_rows<R, T>(rows: Vec<R>, data: &T, format: &OutputFormat) -> Result<()>
where
    R: Tabled + Serialize,
    T: Serialize + ?Sized,
{
    match format {
        OutputFormat::Table => print_table(rows),
        OutputFormat::Markdown => print_markdown(rows),
        OutputFormat::Csv => print_csv(&rows)?,
        OutputFormat::Json => print_json(data),
    }
    Ok(())
}

// -- Per-command output --

pub fn print_filers(filers: &[FilerRow], format: &OutputFormat) -> Result<()> {
    print_rows(build_filer_rows(filers), filers, format)
}

pub fn print_filer_names(names: &[String], format: &OutputFormat) -> Result<()> {
    let rows = names
        .iter()
        .map(|n| NameRow { name: n.clone() })
        .collect::<Vec<_>>();
    print_rows(rows, names, format)
}

pub fn print_tickers(tickers: &[String], format: &OutputFormat) -> Result<()> {
    let rows = tickers
        .iter()
        .map(|t| TickerRow { ticker: t.clone() })
        .collect::<Vec<_>>();
    print_rows(rows, tickers, format)
}

pub fn print_latest(rows: &[LatestTransactionRow], format: &OutputFormat) -> Result<()> {
    print_rows(build_latest_rows(rows), rows, format)
}

pub fn print_transactions(rows: &[DbTransactionRow], format: &OutputFormat) -> Result<()> {
    print_rows(build_transaction_rows(rows), rows, format)
}

pub fn print_pairs(pairs: &[SameTypePairRow], format: &OutputFormat) -> Result<()> {
    print_rows(build_pair_rows(pairs), pairs, format)
}

/// Prints the report; the failure list follows the summary for tabular formats.
pub fn print_report(report: &IngestionReport, format: &OutputFormat) -> Result<()> {
    print_rows(build_report_rows(report), report, format)?;
    if report.failures.is_empty() {
        return Ok(());
    }
    match format {
        OutputFormat::Table => print_table(build_failure_rows(report)),
        OutputFormat::Markdown => print_markdown(build_failure_rows(report)),
        OutputFormat::Csv => print_csv(&build_failure_rows(report))?,
        OutputFormat::Json => {}
    }
    Ok(())
}

pub fn print_archive_summary(summary: &ArchiveSummary, format: &OutputFormat) -> Result<()> {
    print_rows(build_archive_summary_rows(summary), summary, format)
}

/// JSON prints the full archive; other formats list row counts per date.
pub fn print_archive(archive: &GroupedArchive, format: &OutputFormat) -> Result<()> {
    print_rows(build_archive_date_rows(archive), archive, format)
}

// -- JSON output --

pub fn print_json<T: Serialize + ?Sized>(data: &T) {
    match serde_json::to_string_pretty(data) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize to JSON: {}", e),
    }
}
