//! Errors that end an ingestion run.
//!
//! Row-level problems never show up here: malformed rows and store
//! failures on a single row are recorded in the
//! [`IngestionReport`](crate::pipeline::IngestionReport) instead.

use crate::archive::ArchiveError;
use crate::db::DbError;

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    /// The grouped archive could not be loaded, locked or written.
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
    /// The relational store could not be opened or initialised.
    #[error("store unavailable: {0}")]
    Store(#[from] DbError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn archive_errors_convert_and_display() {
        let err: IngestError = ArchiveError::Locked(PathBuf::from("/tmp/db/.archive.lock")).into();
        assert!(matches!(err, IngestError::Archive(_)));
        assert!(err.to_string().contains(".archive.lock"));
    }
}
