//! Date-grouped JSON archive of raw scraped rows.
//!
//! The archive maps the disclosure-date cell (`"Jan. 07, 2026"`) to every
//! raw row ever merged under that date. Within a date, rows are unique by
//! the `security|filer|disclosure date` cell text. This key is looser than
//! the relational transaction key: two rows that differ only in amount range
//! collapse here but stay distinct in the database.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::row::{self, line, RawRow, MIN_ROW_CELLS};

pub const GROUPED_FILE: &str = "congresstrades_grouped.json";
pub const FILERS_FILE: &str = "congresspeople.json";
pub const TICKERS_FILE: &str = "tickers.json";
const LOCK_FILE: &str = ".archive.lock";

/// Disclosure-date cell text to the raw rows disclosed that day.
pub type GroupedArchive = BTreeMap<String, Vec<RawRow>>;

#[derive(thiserror::Error, Debug)]
pub enum ArchiveError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("archive {path} is not a valid grouped archive: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("archive is locked by another run ({0}); remove the lock file if no run is active")]
    Locked(PathBuf),
    #[error("json encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ArchiveError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Archive-level identity of a row: `cell0|cell2|cell3`.
///
/// Returns `None` for rows too short to carry a disclosure date.
pub fn archive_key(row: &[String]) -> Option<String> {
    if row.len() <= row::DISCLOSURE_DATE_CELL {
        return None;
    }
    Some(format!(
        "{}|{}|{}",
        row[row::SECURITY_CELL],
        row[row::FILER_CELL],
        row[row::DISCLOSURE_DATE_CELL]
    ))
}

/// Buckets rows by their disclosure-date cell, keeping input order per bucket.
/// Rows with fewer than [`MIN_ROW_CELLS`] cells are dropped.
pub fn group_by_disclosure_date(rows: &[RawRow]) -> GroupedArchive {
    let mut grouped = GroupedArchive::new();
    for (idx, row) in rows.iter().enumerate() {
        if row.len() < MIN_ROW_CELLS {
            tracing::warn!(
                "Dropping malformed row {} from archive merge ({} cells)",
                idx,
                row.len()
            );
            continue;
        }
        grouped
            .entry(row[row::DISCLOSURE_DATE_CELL].clone())
            .or_default()
            .push(row.clone());
    }
    grouped
}

/// Merges `incoming` rows into `existing`, appending only rows whose
/// [`archive_key`] is not already present under their date.
///
/// Duplicates inside `incoming` collapse as well, so merging the same batch
/// twice leaves the archive unchanged.
pub fn merge(mut existing: GroupedArchive, incoming: &[RawRow]) -> GroupedArchive {
    for (date, rows) in group_by_disclosure_date(incoming) {
        let bucket = existing.entry(date).or_default();
        let mut keys: HashSet<String> = bucket.iter().filter_map(|r| archive_key(r)).collect();
        for row in rows {
            if let Some(key) = archive_key(&row) {
                if keys.insert(key) {
                    bucket.push(row);
                }
            }
        }
    }
    existing
}

/// Total number of rows across all dates.
pub fn row_count(archive: &GroupedArchive) -> usize {
    archive.values().map(Vec::len).sum()
}

/// Filer names and tickers seen anywhere in an archive, sorted and unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveIndex {
    pub filer_names: Vec<String>,
    pub tickers: Vec<String>,
}

pub fn index_of(archive: &GroupedArchive) -> ArchiveIndex {
    let mut names = BTreeSet::new();
    let mut tickers = BTreeSet::new();

    for rows in archive.values() {
        for row in rows.iter().filter(|r| r.len() > row::FILER_CELL) {
            let name = line(&row[row::FILER_CELL], 0).unwrap_or("");
            if !name.is_empty() {
                names.insert(name.to_string());
            }

            let ticker = line(row[row::SECURITY_CELL].trim(), 0)
                .and_then(|l| l.split_whitespace().next())
                .unwrap_or("");
            if !ticker.is_empty() && ticker != crate::parse::NO_TICKER {
                tickers.insert(ticker.to_uppercase());
            }
        }
    }

    ArchiveIndex {
        filer_names: names.into_iter().collect(),
        tickers: tickers.into_iter().collect(),
    }
}

/// Outcome of one load-merge-save cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    pub dates: usize,
    pub rows: usize,
    pub appended: usize,
    pub filers: usize,
    pub tickers: usize,
}

/// File-backed archive rooted at a directory.
///
/// Writers are serialized with a lock file so two ingestion runs cannot
/// interleave their read-modify-write cycles; each file is replaced
/// atomically via a temp file in the same directory.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    dir: PathBuf,
}

impl ArchiveStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn grouped_path(&self) -> PathBuf {
        self.dir.join(GROUPED_FILE)
    }

    /// Loads the grouped archive. A missing file is an empty archive; an
    /// unparsable one is reported as [`ArchiveError::Corrupt`].
    pub fn load(&self) -> Result<GroupedArchive, ArchiveError> {
        let path = self.grouped_path();
        match read_json(&path)? {
            Some(archive) => Ok(archive),
            None => Ok(GroupedArchive::new()),
        }
    }

    /// Merges `rows` into the on-disk archive and refreshes the derived
    /// filer and ticker lists.
    pub fn save_rows(&self, rows: &[RawRow]) -> Result<ArchiveSummary, ArchiveError> {
        fs::create_dir_all(&self.dir).map_err(|e| ArchiveError::io(&self.dir, e))?;
        let _lock = ArchiveLock::acquire(&self.dir)?;

        let existing = self.load()?;
        let before = row_count(&existing);
        let merged = merge(existing, rows);
        let index = index_of(&merged);

        write_json_atomic(&self.dir, &self.grouped_path(), &merged)?;
        write_json_atomic(&self.dir, &self.dir.join(FILERS_FILE), &index.filer_names)?;
        write_json_atomic(&self.dir, &self.dir.join(TICKERS_FILE), &index.tickers)?;

        let summary = ArchiveSummary {
            dates: merged.len(),
            rows: row_count(&merged),
            appended: row_count(&merged) - before,
            filers: index.filer_names.len(),
            tickers: index.tickers.len(),
        };
        tracing::info!(
            "Archive {}: {} rows appended ({} rows over {} dates)",
            self.dir.display(),
            summary.appended,
            summary.rows,
            summary.dates
        );
        Ok(summary)
    }

    pub fn load_filer_names(&self) -> Result<Vec<String>, ArchiveError> {
        Ok(read_json(&self.dir.join(FILERS_FILE))?.unwrap_or_default())
    }

    pub fn load_tickers(&self) -> Result<Vec<String>, ArchiveError> {
        Ok(read_json(&self.dir.join(TICKERS_FILE))?.unwrap_or_default())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, ArchiveError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ArchiveError::io(path, e)),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| ArchiveError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

fn write_json_atomic<T: Serialize + ?Sized>(
    dir: &Path,
    path: &Path,
    value: &T,
) -> Result<(), ArchiveError> {
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| ArchiveError::io(dir, e))?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n").map_err(|e| ArchiveError::io(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| ArchiveError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| ArchiveError::io(path, e.error))?;
    Ok(())
}

/// Exclusive lock on an archive directory, released on drop.
struct ArchiveLock {
    path: PathBuf,
}

impl ArchiveLock {
    fn acquire(dir: &Path) -> Result<Self, ArchiveError> {
        let path = dir.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                // Best effort: the pid only helps a human clear a stale lock.
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(ArchiveError::Locked(path)),
            Err(e) => Err(ArchiveError::io(&path, e)),
        }
    }
}

impl Drop for ArchiveLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Failed to release archive lock {}: {}", self.path.display(), e);
        }
    }
}
