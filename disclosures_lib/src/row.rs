//! Positional layout of a scraped disclosure table row.

/// One scraped table row: the inner text of each cell, left to right.
///
/// Some cells hold several `\n`-joined sub-fields (ticker over company name,
/// filer name over `Chamber / Party`).
pub type RawRow = Vec<String>;

/// Rows shorter than this cannot be grouped or normalized.
pub const MIN_ROW_CELLS: usize = 5;

pub const SECURITY_CELL: usize = 0;
pub const TRANSACTION_CELL: usize = 1;
pub const FILER_CELL: usize = 2;
pub const DISCLOSURE_DATE_CELL: usize = 3;
pub const TRANSACTION_DATE_CELL: usize = 4;
/// Optional `Company: X` cell, present when the security has no ticker.
pub const COMPANY_CELL: usize = 5;

/// Returns the cell at `idx`, or `""` when the row is too short.
pub fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(String::as_str).unwrap_or("")
}

/// Returns the trimmed `n`th line of a multi-line cell, if present.
pub(crate) fn line(text: &str, n: usize) -> Option<&str> {
    text.split('\n').nth(n).map(str::trim)
}
