//! Normalization of scraped disclosure rows into [`ParsedTrade`] records.
//!
//! Every step here is total: scraped text is uncontrolled, so each field
//! falls back to an empty string, [`TransactionType::Other`] or `None`
//! instead of failing. The company-name heuristics are best effort and will
//! mangle some issuer names; they are kept in one place so they can be
//! audited and tuned without touching the persistence layer.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::row::{self, line};

/// Ticker placeholder the listing shows for instruments without a symbol.
pub const NO_TICKER: &str = "-";
/// Longest pseudo-ticker derived from a `Company:` cell.
pub const MAX_TICKER_LEN: usize = 10;
/// Short names longer than this are cut again at the first `" - "`.
pub const MAX_SHORT_NAME_LEN: usize = 20;

const COMPANY_PREFIX: &str = "Company:";
const UNKNOWN: &str = "Unknown";

/// Direction of a disclosed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    Purchase,
    Sale,
    Exchange,
    Other,
}

impl TransactionType {
    /// Maps the first line of a transaction cell, case-insensitively.
    ///
    /// Partial and full sales (`Sale (Partial)`) both map to [`Self::Sale`].
    pub fn from_cell(text: &str) -> Self {
        let lower = text.trim().to_ascii_lowercase();
        if lower.starts_with("purchase") || lower.starts_with("buy") {
            Self::Purchase
        } else if lower.starts_with("sale") || lower.starts_with("sell") {
            Self::Sale
        } else if lower.starts_with("exchange") {
            Self::Exchange
        } else {
            Self::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "Purchase",
            Self::Sale => "Sale",
            Self::Exchange => "Exchange",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized disclosure row. Derived on every ingestion, never stored as is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedTrade {
    /// Uppercase ticker, a pseudo-ticker derived from the company cell, or `-`.
    pub security_ticker: String,
    pub security_company_name: String,
    /// Untouched second line of the security cell.
    pub security_full_description: String,
    /// Asset class code from the third line of the security cell (`ST`, `OT`, ...).
    pub security_asset_type: Option<String>,
    pub filer_name: String,
    pub filer_chamber: String,
    pub filer_party: String,
    pub transaction_type: TransactionType,
    /// Disclosed value bracket, kept as the listing prints it.
    pub amount_range: String,
    pub disclosure_date: Option<NaiveDate>,
    pub transaction_date: Option<NaiveDate>,
}

/// Security fields recovered from the security and company cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityFields {
    pub ticker: String,
    pub company_name: String,
    pub full_description: String,
    pub asset_type: Option<String>,
}

/// Filer fields recovered from the `Name\nChamber / Party` cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilerFields {
    pub name: String,
    pub chamber: String,
    pub party: String,
}

/// Parses one scraped row. Missing cells are read as empty text.
pub fn parse_row(row: &[String]) -> ParsedTrade {
    let security = parse_security(
        row::cell(row, row::SECURITY_CELL),
        row::cell(row, row::COMPANY_CELL),
    );
    let filer = parse_filer(row::cell(row, row::FILER_CELL));
    let (transaction_type, amount_range) =
        parse_transaction(row::cell(row, row::TRANSACTION_CELL));

    ParsedTrade {
        security_ticker: security.ticker,
        security_company_name: security.company_name,
        security_full_description: security.full_description,
        security_asset_type: security.asset_type,
        filer_name: filer.name,
        filer_chamber: filer.chamber,
        filer_party: filer.party,
        transaction_type,
        amount_range,
        disclosure_date: parse_disclosure_date(row::cell(row, row::DISCLOSURE_DATE_CELL)),
        transaction_date: parse_disclosure_date(row::cell(row, row::TRANSACTION_DATE_CELL)),
    }
}

/// Resolves ticker and company name, falling back to the `Company:` cell
/// when the listing shows no ticker.
pub fn parse_security(security_cell: &str, company_cell: &str) -> SecurityFields {
    let mut ticker = line(security_cell, 0).unwrap_or("").to_uppercase();
    let full_description = full_description(security_cell);
    let mut company_name = extract_company_name(security_cell);

    if ticker == NO_TICKER {
        match pseudo_ticker(company_cell) {
            Some(pseudo) => ticker = pseudo,
            None => company_name = full_description.clone(),
        }
    }

    SecurityFields {
        ticker,
        company_name,
        full_description,
        asset_type: asset_type(security_cell),
    }
}

/// Short company name from the second line of a security cell.
///
/// `"NETFLIX, INC. - COMMON STOCK"` becomes `"NETFLIX"`. Names without a
/// comma that run past [`MAX_SHORT_NAME_LEN`] are cut at the first `" - "`.
pub fn extract_company_name(security_cell: &str) -> String {
    let Some(company_line) = line(security_cell, 1) else {
        return String::new();
    };
    let mut name = company_line.split(',').next().unwrap_or("").trim();
    if name.chars().count() > MAX_SHORT_NAME_LEN {
        name = name.split(" - ").next().unwrap_or("").trim();
    }
    name.to_string()
}

/// Trimmed second line of the security cell, or empty.
pub fn full_description(security_cell: &str) -> String {
    line(security_cell, 1).unwrap_or("").to_string()
}

/// Trimmed third line of the security cell, if any.
pub fn asset_type(security_cell: &str) -> Option<String> {
    line(security_cell, 2)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
}

fn pseudo_ticker(company_cell: &str) -> Option<String> {
    let (_, rest) = company_cell.split_once(COMPANY_PREFIX)?;
    let name = rest.split('(').next().unwrap_or("").trim();
    if name.is_empty() {
        return None;
    }
    Some(name.chars().take(MAX_TICKER_LEN).collect())
}

/// Splits the filer cell into name, chamber and party.
pub fn parse_filer(filer_cell: &str) -> FilerFields {
    let name = line(filer_cell, 0).unwrap_or("").to_string();
    let (chamber, party) = match line(filer_cell, 1) {
        Some(chamber_party) => {
            let mut parts = chamber_party.split('/');
            let chamber = parts.next().unwrap_or("").trim().to_string();
            let party = parts.next().unwrap_or("").trim().to_string();
            (chamber, party)
        }
        None => (UNKNOWN.to_string(), UNKNOWN.to_string()),
    };
    FilerFields {
        name,
        chamber,
        party,
    }
}

/// Splits the transaction cell into its type and amount range text.
pub fn parse_transaction(transaction_cell: &str) -> (TransactionType, String) {
    let kind = TransactionType::from_cell(line(transaction_cell, 0).unwrap_or(""));
    let amount = line(transaction_cell, 1).unwrap_or("").to_string();
    (kind, amount)
}

/// Parses the listing's `"Mon. DD, YYYY"` dates, e.g. `"Jan. 07, 2026"`.
pub fn parse_disclosure_date(text: &str) -> Option<NaiveDate> {
    let cleaned = text.trim().replace('.', "").replacen("Sept ", "Sep ", 1);
    NaiveDate::parse_from_str(&cleaned, "%b %d, %Y").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn abt_row() -> Vec<String> {
        row(&[
            "ABT\nABBOTT LABORATORIES COMMON STOCK\nST",
            "Sale\n$1,001 - $15,000",
            "Byron Donalds\nHouse / R",
            "Jan. 07, 2026",
            "Dec. 04, 2025",
            "-",
            "-0.13%",
        ])
    }

    #[test]
    fn parses_listed_stock_row() {
        let trade = parse_row(&abt_row());
        assert_eq!(trade.security_ticker, "ABT");
        assert_eq!(trade.security_company_name, "ABBOTT LABORATORIES COMMON STOCK");
        assert_eq!(
            trade.security_full_description,
            "ABBOTT LABORATORIES COMMON STOCK"
        );
        assert_eq!(trade.security_asset_type.as_deref(), Some("ST"));
        assert_eq!(trade.filer_name, "Byron Donalds");
        assert_eq!(trade.filer_chamber, "House");
        assert_eq!(trade.filer_party, "R");
        assert_eq!(trade.transaction_type, TransactionType::Sale);
        assert_eq!(trade.amount_range, "$1,001 - $15,000");
        assert_eq!(trade.disclosure_date, NaiveDate::from_ymd_opt(2026, 1, 7));
        assert_eq!(trade.transaction_date, NaiveDate::from_ymd_opt(2025, 12, 4));
    }

    #[test]
    fn missing_ticker_uses_company_cell() {
        let trade = parse_row(&row(&[
            "-\nBofA Finance LLC Trigger Autocallable Contingent Yield Notes\nOther",
            "Purchase\n$1,001 - $15,000",
            "Bernie Moreno\nSenate / R",
            "Jan. 09, 2026",
            "Dec. 19, 2025",
            "Company: Bank of America Corporation",
            "-",
        ]));
        assert_eq!(trade.security_ticker, "Bank of Am");
        assert!(trade.security_ticker.chars().count() <= MAX_TICKER_LEN);
        assert_eq!(
            trade.security_company_name,
            "BofA Finance LLC Trigger Autocallable Contingent Yield Notes"
        );
        assert_eq!(trade.transaction_type, TransactionType::Purchase);
        assert_eq!(trade.filer_chamber, "Senate");
    }

    #[test]
    fn pseudo_ticker_stops_at_parenthesis() {
        let fields = parse_security("-\nSome Note\nOther", "Company: Acme (ACM)");
        assert_eq!(fields.ticker, "Acme");
    }

    #[test]
    fn missing_ticker_without_company_keeps_sentinel() {
        let fields = parse_security("-\nUS Treasury Bill, 4.1%\nGS", "-");
        assert_eq!(fields.ticker, NO_TICKER);
        assert_eq!(fields.company_name, "US Treasury Bill, 4.1%");
    }

    #[test]
    fn ticker_is_uppercased() {
        let fields = parse_security("  nflx \nNETFLIX, INC. - COMMON STOCK", "");
        assert_eq!(fields.ticker, "NFLX");
        assert_eq!(fields.company_name, "NETFLIX");
    }

    #[test]
    fn company_name_long_prefix_cut_at_dash() {
        assert_eq!(
            extract_company_name("VTI\nVANGUARD TOTAL STOCK MARKET - ETF"),
            "VANGUARD TOTAL STOCK MARKET"
        );
    }

    #[test]
    fn company_name_single_line_is_empty() {
        assert_eq!(extract_company_name("AAPL"), "");
        assert_eq!(full_description("AAPL"), "");
    }

    #[test]
    fn filer_without_chamber_line() {
        let filer = parse_filer("Jane Doe");
        assert_eq!(filer.name, "Jane Doe");
        assert_eq!(filer.chamber, "Unknown");
        assert_eq!(filer.party, "Unknown");
    }

    #[test]
    fn filer_without_party() {
        let filer = parse_filer("Jane Doe\nSenate");
        assert_eq!(filer.chamber, "Senate");
        assert_eq!(filer.party, "");
    }

    #[test]
    fn transaction_type_mapping() {
        assert_eq!(TransactionType::from_cell("PURCHASE"), TransactionType::Purchase);
        assert_eq!(TransactionType::from_cell("Sale (Partial)"), TransactionType::Sale);
        assert_eq!(TransactionType::from_cell("exchange"), TransactionType::Exchange);
        assert_eq!(TransactionType::from_cell("Received"), TransactionType::Other);
        assert_eq!(TransactionType::from_cell(""), TransactionType::Other);
    }

    #[test]
    fn transaction_without_amount() {
        let (kind, amount) = parse_transaction("Purchase");
        assert_eq!(kind, TransactionType::Purchase);
        assert_eq!(amount, "");
    }

    #[test]
    fn dates_with_and_without_periods() {
        assert_eq!(
            parse_disclosure_date("May 14, 2025"),
            NaiveDate::from_ymd_opt(2025, 5, 14)
        );
        assert_eq!(
            parse_disclosure_date("Sept. 5, 2025"),
            NaiveDate::from_ymd_opt(2025, 9, 5)
        );
        assert_eq!(parse_disclosure_date("yesterday"), None);
        assert_eq!(parse_disclosure_date(""), None);
        assert_eq!(parse_disclosure_date("Feb. 30, 2025"), None);
    }

    #[test]
    fn short_and_garbage_rows_never_panic() {
        let empty = parse_row(&[]);
        assert_eq!(empty.security_ticker, "");
        assert_eq!(empty.transaction_type, TransactionType::Other);
        assert_eq!(empty.transaction_date, None);

        let garbage = parse_row(&row(&["\n\n\n", "\n", "/\n/", "??", "\u{1F4C8}"]));
        assert_eq!(garbage.transaction_type, TransactionType::Other);
        assert_eq!(garbage.disclosure_date, None);
    }

    #[test]
    fn multibyte_company_cell_truncates_on_char_boundary() {
        let fields = parse_security("-\nNote", "Company: Société Générale Paris");
        assert_eq!(fields.ticker.chars().count(), MAX_TICKER_LEN);
        assert_eq!(fields.ticker, "Société Gé");
    }

    #[test]
    fn empty_company_name_keeps_sentinel() {
        let fields = parse_security("-\nX Note\nOT", "Company:  (XYZ)");
        assert_eq!(fields.ticker, NO_TICKER);
        assert_eq!(fields.company_name, "X Note");
        assert_eq!(fields.asset_type.as_deref(), Some("OT"));
    }

    #[test]
    fn asset_type_from_third_line() {
        assert_eq!(asset_type("NVDA\nNVIDIA CORP\n ST ").as_deref(), Some("ST"));
        assert_eq!(asset_type("-\nSome Notes\nOther").as_deref(), Some("Other"));
        assert_eq!(asset_type("NVDA\nNVIDIA CORP"), None);
        assert_eq!(asset_type("NVDA\nNVIDIA CORP\n  "), None);
    }
}
