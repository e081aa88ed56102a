//! SQLite storage for normalized disclosures.
//!
//! Connections come from a bounded `r2d2` pool owned by [`Db`]. Every public
//! operation checks out one connection for its own scope, so a connection is
//! returned to the pool on every exit path, errors included.

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::parse::{ParsedTrade, TransactionType, NO_TICKER};
use crate::pipeline::TradeStore;

const SCHEMA_VERSION: i32 = 2;

const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON;
     PRAGMA journal_mode = WAL;
     PRAGMA synchronous = NORMAL;
     PRAGMA busy_timeout = 5000;";

#[derive(thiserror::Error, Debug)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Sizing for the connection pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_size: u32,
    pub connection_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 10,
            connection_timeout: Duration::from_secs(30),
        }
    }
}

pub struct Db {
    pool: Pool<SqliteConnectionManager>,
}

impl Db {
    pub fn open(path: impl AsRef<Path>, settings: &PoolSettings) -> Result<Self, DbError> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
        let pool = Pool::builder()
            .max_size(settings.max_size)
            .connection_timeout(settings.connection_timeout)
            .build(manager)?;
        Ok(Self { pool })
    }

    /// Open an in-memory database (for testing).
    ///
    /// Each in-memory connection is its own database, so the pool holds
    /// exactly one connection that is never reaped.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
        let pool = Pool::builder()
            .max_size(1)
            .min_idle(Some(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(Duration::from_secs(5))
            .build(manager)?;
        Ok(Self { pool })
    }

    /// Check out a pooled connection; it goes back to the pool when dropped.
    pub fn conn(&self) -> Result<DbConnection, DbError> {
        Ok(self.pool.get()?)
    }

    /// Connections currently parked in the pool.
    pub fn idle_connections(&self) -> u32 {
        self.pool.state().idle_connections
    }

    pub fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        // Migrations run before the DDL so that indexes created by the
        // schema can rely on migrated columns.
        let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            migrate_v1(&conn)?;
            conn.pragma_update(None, "user_version", 1)?;
        }

        if version < 2 {
            migrate_v2(&conn)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        let schema = include_str!("../../schema/sqlite.sql");
        conn.execute_batch(schema)?;

        Ok(())
    }

    /// Tear down the pool, closing every idle connection.
    pub fn close(self) {
        let state = self.pool.state();
        tracing::debug!(
            "Closing database pool ({} connections, {} idle)",
            state.connections,
            state.idle_connections
        );
        drop(self.pool);
    }

    /// Upsert the filer, security and (when dated) transaction of one trade
    /// inside a single SQLite transaction. Any error rolls the whole row back.
    pub fn upsert_trade(
        &self,
        trade: &ParsedTrade,
        raw: &[String],
    ) -> Result<UpsertOutcome, DbError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        record_raw_row(&tx, raw)?;
        let filer_id = upsert_filer(
            &tx,
            &trade.filer_name,
            &trade.filer_chamber,
            &trade.filer_party,
        )?;
        let security_id = upsert_security(
            &tx,
            &trade.security_ticker,
            &trade.security_full_description,
            &trade.security_company_name,
            trade.security_asset_type.as_deref(),
        )?;

        let written = match trade.transaction_date {
            Some(date) => Some(insert_transaction(
                &tx,
                &NewTransaction {
                    filer_id,
                    security_id,
                    transaction_type: trade.transaction_type,
                    transaction_date: date,
                    amount_range: &trade.amount_range,
                    disclosure_date: trade.disclosure_date,
                },
            )?),
            None => None,
        };

        tx.commit()?;
        Ok(UpsertOutcome {
            filer_id,
            security_id,
            transaction_id: written.map(|w| w.id),
            transaction_inserted: written.is_some_and(|w| w.inserted),
        })
    }

    pub fn filer_names(&self) -> Result<Vec<String>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM filers ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    pub fn filers(&self) -> Result<Vec<FilerRow>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name, chamber, party FROM filers ORDER BY name")?;
        let rows = stmt.query_map([], filer_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn filer(&self, name: &str) -> Result<Option<FilerRow>, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, chamber, party FROM filers WHERE name = ?1",
            params![name],
            filer_from_row,
        )
        .optional()
        .map_err(DbError::from)
    }

    pub fn tickers(&self) -> Result<Vec<String>, DbError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT ticker FROM securities WHERE ticker != ?1 ORDER BY ticker")?;
        let rows = stmt.query_map(params![NO_TICKER], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    pub fn security(&self, ticker: &str) -> Result<Option<SecurityRow>, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, ticker, name, company_name, asset_type FROM securities WHERE ticker = ?1",
            params![ticker],
            |row| {
                Ok(SecurityRow {
                    id: row.get(0)?,
                    ticker: row.get(1)?,
                    name: row.get(2)?,
                    company_name: row.get(3)?,
                    asset_type: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(DbError::from)
    }

    /// Latest transaction per (filer, security), oldest first.
    ///
    /// Securities without any transaction are listed with empty filer and
    /// transaction fields; securities without a ticker (`-`) are left out.
    pub fn latest_transactions(&self) -> Result<Vec<LatestTransactionRow>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT s.ticker, s.name, f.name, t.transaction_date, t.transaction_type,
                    t.amount_range
             FROM securities s
             LEFT JOIN (
                 SELECT tx.*,
                        ROW_NUMBER() OVER (
                            PARTITION BY tx.security_id, tx.filer_id
                            ORDER BY tx.transaction_date DESC, tx.id DESC
                        ) AS rn
                 FROM transactions tx
             ) t ON t.security_id = s.id AND t.rn = 1
             LEFT JOIN filers f ON f.id = t.filer_id
             WHERE s.ticker != ?1
             ORDER BY t.transaction_date IS NULL, t.transaction_date, s.ticker, f.name",
        )?;
        let rows = stmt.query_map(params![NO_TICKER], |row| {
            Ok(LatestTransactionRow {
                ticker: row.get(0)?,
                security_name: row.get(1)?,
                filer_name: row.get(2)?,
                transaction_date: row.get(3)?,
                transaction_type: row.get(4)?,
                amount_range: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Query transactions joined with their filer and security.
    pub fn query_transactions(
        &self,
        filter: &DbTransactionFilter,
    ) -> Result<Vec<DbTransactionRow>, DbError> {
        let mut sql = String::from(
            "SELECT t.id, t.transaction_date, t.disclosure_date, t.transaction_type,
                    t.amount_range, f.name, f.chamber, f.party,
                    s.ticker, s.name, s.company_name
             FROM transactions t
             JOIN filers f ON t.filer_id = f.id
             JOIN securities s ON t.security_id = s.id
             WHERE 1=1",
        );

        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref filer) = filter.filer {
            params_vec.push(Box::new(format!("%{}%", filer)));
            sql.push_str(&format!(" AND f.name LIKE ?{}", params_vec.len()));
        }
        if let Some(ref ticker) = filter.ticker {
            params_vec.push(Box::new(ticker.to_uppercase()));
            sql.push_str(&format!(" AND UPPER(s.ticker) = ?{}", params_vec.len()));
        }
        if let Some(tx_type) = filter.transaction_type {
            params_vec.push(Box::new(tx_type.as_str()));
            sql.push_str(&format!(" AND t.transaction_type = ?{}", params_vec.len()));
        }
        if let Some(since) = filter.since {
            params_vec.push(Box::new(since.to_string()));
            sql.push_str(&format!(" AND t.transaction_date >= ?{}", params_vec.len()));
        }
        if let Some(until) = filter.until {
            params_vec.push(Box::new(until.to_string()));
            sql.push_str(&format!(" AND t.transaction_date <= ?{}", params_vec.len()));
        }

        sql.push_str(" ORDER BY t.transaction_date DESC, t.id DESC");

        if let Some(n) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(DbTransactionRow {
                id: row.get(0)?,
                transaction_date: row.get(1)?,
                disclosure_date: row.get(2)?,
                transaction_type: row.get(3)?,
                amount_range: row.get(4)?,
                filer_name: row.get(5)?,
                chamber: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                party: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                ticker: row.get(8)?,
                security_name: row.get(9)?,
                company_name: row.get(10)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Pairs of transactions by the same filer in securities of the same
    /// asset class, earlier transaction first.
    ///
    /// `ticker` matches either side of a pair exactly (case-insensitive);
    /// `filer` is a partial, case-insensitive name match. Securities without
    /// an asset class never pair.
    pub fn same_type_pairs(
        &self,
        ticker: Option<&str>,
        filer: Option<&str>,
    ) -> Result<Vec<SameTypePairRow>, DbError> {
        let mut sql = String::from(
            "SELECT f.name, s1.asset_type,
                    t1.id, s1.ticker, t1.transaction_date, t1.transaction_type,
                    t2.id, s2.ticker, t2.transaction_date, t2.transaction_type
             FROM transactions t1
             JOIN transactions t2 ON t2.filer_id = t1.filer_id AND t1.id < t2.id
             JOIN securities s1 ON s1.id = t1.security_id
             JOIN securities s2 ON s2.id = t2.security_id
             JOIN filers f ON f.id = t1.filer_id
             WHERE s1.asset_type IS NOT NULL AND s1.asset_type = s2.asset_type",
        );

        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ticker) = ticker {
            params_vec.push(Box::new(ticker.to_uppercase()));
            let idx = params_vec.len();
            sql.push_str(&format!(
                " AND (UPPER(s1.ticker) = ?{idx} OR UPPER(s2.ticker) = ?{idx})"
            ));
        }
        if let Some(filer) = filer {
            params_vec.push(Box::new(format!("%{}%", filer)));
            sql.push_str(&format!(" AND f.name LIKE ?{}", params_vec.len()));
        }

        sql.push_str(" ORDER BY f.name, t1.transaction_date, t1.id, t2.id");

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(SameTypePairRow {
                filer_name: row.get(0)?,
                asset_type: row.get(1)?,
                first_id: row.get(2)?,
                first_ticker: row.get(3)?,
                first_date: row.get(4)?,
                first_type: row.get(5)?,
                second_id: row.get(6)?,
                second_ticker: row.get(7)?,
                second_date: row.get(8)?,
                second_type: row.get(9)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn transaction_count(&self) -> Result<i64, DbError> {
        self.count("transactions")
    }

    pub fn raw_row_count(&self) -> Result<i64, DbError> {
        self.count("raw_rows")
    }

    fn count(&self, table: &str) -> Result<i64, DbError> {
        let conn = self.conn()?;
        let sql = format!("SELECT COUNT(1) FROM {}", table);
        Ok(conn.query_row(&sql, [], |row| row.get(0))?)
    }
}

impl TradeStore for Db {
    fn upsert_trade(&self, trade: &ParsedTrade, raw: &[String]) -> Result<UpsertOutcome, DbError> {
        Db::upsert_trade(self, trade, raw)
    }
}

fn migrate_v1(conn: &Connection) -> Result<(), DbError> {
    run_migration(conn, &["ALTER TABLE transactions ADD COLUMN disclosure_date TEXT"])
}

fn migrate_v2(conn: &Connection) -> Result<(), DbError> {
    run_migration(conn, &["ALTER TABLE securities ADD COLUMN asset_type TEXT"])
}

fn run_migration(conn: &Connection, statements: &[&str]) -> Result<(), DbError> {
    for sql in statements {
        match conn.execute(sql, []) {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(_, Some(ref msg)))
                if msg.contains("duplicate column name") || msg.contains("no such table") => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Keep an audit copy of the raw row; identical rows are stored once.
pub fn record_raw_row(conn: &Connection, raw: &[String]) -> Result<(), DbError> {
    conn.execute(
        "INSERT OR IGNORE INTO raw_rows (raw_content) VALUES (?1)",
        params![serde_json::to_string(raw)?],
    )?;
    Ok(())
}

/// Insert a filer or refresh its chamber, returning its id.
///
/// Party is written on first sighting only.
pub fn upsert_filer(
    conn: &Connection,
    name: &str,
    chamber: &str,
    party: &str,
) -> Result<i64, DbError> {
    let id = conn.query_row(
        "INSERT INTO filers (name, chamber, party) VALUES (?1, ?2, ?3)
         ON CONFLICT(name) DO UPDATE SET chamber = excluded.chamber
         RETURNING id",
        params![name, chamber, party],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Insert a security or fill in its empty descriptive columns, returning its id.
///
/// `company_name` and `name` keep the first non-empty value ever seen. When
/// the short name already belongs to a different ticker, the security is
/// stored without a short name rather than failing the row.
pub fn upsert_security(
    conn: &Connection,
    ticker: &str,
    company_name: &str,
    name: &str,
    asset_type: Option<&str>,
) -> Result<i64, DbError> {
    let company_name = normalize_empty(Some(company_name));
    let name = normalize_empty(Some(name));
    let asset_type = normalize_empty(asset_type);
    let fields = SecurityColumns {
        ticker,
        company_name: company_name.as_deref(),
        name: name.as_deref(),
        asset_type: asset_type.as_deref(),
    };

    match security_upsert_stmt(conn, &fields) {
        Err(rusqlite::Error::SqliteFailure(_, Some(ref msg)))
            if name.is_some() && msg.contains("securities.name") =>
        {
            tracing::warn!(
                "Short name {:?} already belongs to another security; storing {} without it",
                name.as_deref().unwrap_or_default(),
                ticker
            );
            Ok(security_upsert_stmt(
                conn,
                &SecurityColumns {
                    name: None,
                    ..fields
                },
            )?)
        }
        other => Ok(other?),
    }
}

#[derive(Clone, Copy)]
struct SecurityColumns<'a> {
    ticker: &'a str,
    company_name: Option<&'a str>,
    name: Option<&'a str>,
    asset_type: Option<&'a str>,
}

fn security_upsert_stmt(
    conn: &Connection,
    fields: &SecurityColumns<'_>,
) -> Result<i64, rusqlite::Error> {
    conn.query_row(
        "INSERT INTO securities (ticker, company_name, name, asset_type) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(ticker) DO UPDATE SET
           company_name = COALESCE(NULLIF(securities.company_name, ''), excluded.company_name),
           name = COALESCE(NULLIF(securities.name, ''), excluded.name),
           asset_type = COALESCE(NULLIF(securities.asset_type, ''), excluded.asset_type)
         RETURNING id",
        params![
            fields.ticker,
            fields.company_name,
            fields.name,
            fields.asset_type
        ],
        |row| row.get(0),
    )
}

/// Column values for one transaction row.
pub struct NewTransaction<'a> {
    pub filer_id: i64,
    pub security_id: i64,
    pub transaction_type: TransactionType,
    pub transaction_date: NaiveDate,
    pub amount_range: &'a str,
    pub disclosure_date: Option<NaiveDate>,
}

/// Id of a transaction row and whether this call created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionWrite {
    pub id: i64,
    pub inserted: bool,
}

/// Insert a transaction unless its composite key already exists; either way
/// return the row id.
pub fn insert_transaction(
    conn: &Connection,
    new: &NewTransaction<'_>,
) -> Result<TransactionWrite, DbError> {
    let date = new.transaction_date.to_string();
    let inserted: Option<i64> = conn
        .query_row(
            "INSERT INTO transactions (
               filer_id, security_id, transaction_type, transaction_date, amount_range,
               disclosure_date
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(filer_id, security_id, transaction_date, amount_range, transaction_type)
             DO NOTHING
             RETURNING id",
            params![
                new.filer_id,
                new.security_id,
                new.transaction_type.as_str(),
                date,
                new.amount_range,
                new.disclosure_date.map(|d| d.to_string()),
            ],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(id) = inserted {
        return Ok(TransactionWrite { id, inserted: true });
    }

    let id = conn.query_row(
        "SELECT id FROM transactions
         WHERE filer_id = ?1 AND security_id = ?2 AND transaction_date = ?3
           AND amount_range = ?4 AND transaction_type = ?5",
        params![
            new.filer_id,
            new.security_id,
            date,
            new.amount_range,
            new.transaction_type.as_str(),
        ],
        |row| row.get(0),
    )?;
    Ok(TransactionWrite {
        id,
        inserted: false,
    })
}

fn filer_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FilerRow> {
    Ok(FilerRow {
        id: row.get(0)?,
        name: row.get(1)?,
        chamber: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        party: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
    })
}

fn normalize_empty(value: Option<&str>) -> Option<String> {
    match value {
        Some(val) if val.trim().is_empty() => None,
        Some(val) => Some(val.to_string()),
        None => None,
    }
}

/// Entity ids touched by [`Db::upsert_trade`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub filer_id: i64,
    pub security_id: i64,
    /// `None` when the trade had no parsable transaction date.
    pub transaction_id: Option<i64>,
    /// `false` when the transaction already existed.
    pub transaction_inserted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilerRow {
    pub id: i64,
    pub name: String,
    pub chamber: String,
    pub party: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityRow {
    pub id: i64,
    pub ticker: String,
    pub name: Option<String>,
    pub company_name: Option<String>,
    pub asset_type: Option<String>,
}

/// A row returned by [`Db::latest_transactions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LatestTransactionRow {
    pub ticker: String,
    pub security_name: Option<String>,
    pub filer_name: Option<String>,
    pub transaction_date: Option<String>,
    pub transaction_type: Option<String>,
    pub amount_range: Option<String>,
}

/// A fully-joined transaction row returned by [`Db::query_transactions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbTransactionRow {
    pub id: i64,
    pub transaction_date: String,
    pub disclosure_date: Option<String>,
    pub transaction_type: String,
    pub amount_range: String,
    pub filer_name: String,
    pub chamber: String,
    pub party: String,
    pub ticker: String,
    pub security_name: Option<String>,
    pub company_name: Option<String>,
}

/// A row returned by [`Db::same_type_pairs`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SameTypePairRow {
    pub filer_name: String,
    pub asset_type: String,
    pub first_id: i64,
    pub first_ticker: String,
    pub first_date: String,
    pub first_type: String,
    pub second_id: i64,
    pub second_ticker: String,
    pub second_date: String,
    pub second_type: String,
}

/// Filter parameters for [`Db::query_transactions`].
#[derive(Debug, Default)]
pub struct DbTransactionFilter {
    pub filer: Option<String>,
    pub ticker: Option<String>,
    pub transaction_type: Option<TransactionType>,
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub limit: Option<i64>,
}
