//! Runtime configuration read from the environment.
//!
//! | variable | default |
//! |---|---|
//! | `DISCLOSURES_DB` | `disclosures.db` |
//! | `DISCLOSURES_ARCHIVE_DIR` | `db` |
//! | `DISCLOSURES_POOL_SIZE` | `10` |
//! | `DISCLOSURES_POOL_TIMEOUT_MS` | `30000` |

use std::path::PathBuf;
use std::time::Duration;

use crate::archive::ArchiveStore;
use crate::db::{Db, PoolSettings};
use crate::error::IngestError;

pub const DEFAULT_DB_PATH: &str = "disclosures.db";
pub const DEFAULT_ARCHIVE_DIR: &str = "db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub db_path: PathBuf,
    pub archive_dir: PathBuf,
    pub pool: PoolSettings,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            archive_dir: PathBuf::from(DEFAULT_ARCHIVE_DIR),
            pool: PoolSettings::default(),
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or unparsable values fall
    /// back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let pool_size = parse_or(&lookup, "DISCLOSURES_POOL_SIZE", defaults.pool.max_size);
        let timeout_ms = parse_or(
            &lookup,
            "DISCLOSURES_POOL_TIMEOUT_MS",
            defaults.pool.connection_timeout.as_millis() as u64,
        );

        Self {
            db_path: non_empty(&lookup, "DISCLOSURES_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            archive_dir: non_empty(&lookup, "DISCLOSURES_ARCHIVE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.archive_dir),
            pool: PoolSettings {
                // r2d2 rejects an empty pool.
                max_size: pool_size.max(1),
                connection_timeout: Duration::from_millis(timeout_ms),
            },
        }
    }

    /// Open the configured database and bring its schema up to date.
    pub fn open_db(&self) -> Result<Db, IngestError> {
        let db = Db::open(&self.db_path, &self.pool)?;
        db.init()?;
        Ok(db)
    }

    pub fn archive(&self) -> ArchiveStore {
        ArchiveStore::new(&self.archive_dir)
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|val| !val.trim().is_empty())
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|val| val.trim().parse::<T>().ok())
        .unwrap_or(default)
}
