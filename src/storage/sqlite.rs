// SQLite-backed lock table, shareable between processes on one host

use super::{LeaseStore, StoreResult};
use crate::error::StoreError;
use crate::lease::{LockRow, RowFilter};
use crate::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{ConnectOptions, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, log};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS lease_lock (\
    id TEXT PRIMARY KEY NOT NULL, \
    expiry INTEGER NOT NULL)";

const CREATE_EXPIRY_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS lease_lock_expiry ON lease_lock (expiry)";

const SQL_INSERT: &str = "INSERT INTO lease_lock (id, expiry) VALUES (?, ?)";
const SQL_DELETE_ID: &str = "DELETE FROM lease_lock WHERE id = ?";
const SQL_DELETE_EXPIRED: &str = "DELETE FROM lease_lock WHERE expiry <= ?";
const SQL_SELECT_ALL: &str = "SELECT id, expiry FROM lease_lock ORDER BY id";

/// SQLite extended result codes for primary-key and unique violations
const SQLITE_CONSTRAINT_PRIMARYKEY: &str = "1555";
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";

/// How long a writer waits on SQLite's file lock before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Lock table stored in a SQLite database
///
/// The `lease_lock` table is created on open if it does not exist yet, so any
/// number of processes can point at the same file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Creates or opens the database file at `db_path`
    pub async fn open(db_path: &Path) -> Result<Self> {
        let mut options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        options.log_statements(log::LevelFilter::Off);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.initialize().await?;
        info!(?db_path, "Opened SQLite lock table");
        Ok(store)
    }

    /// Single-connection in-memory database, mostly for testing
    pub async fn in_memory() -> Result<Self> {
        let mut options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        options.log_statements(log::LevelFilter::Off);

        // Every connection to :memory: is a fresh database, so pin exactly one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Safe to call repeatedly; every statement is `IF NOT EXISTS`
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_EXPIRY_INDEX).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_sql_ms(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

fn convert_insert_err(id: &str, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        let code = db_err.code();
        let duplicate = matches!(
            code.as_deref(),
            Some(SQLITE_CONSTRAINT_PRIMARYKEY | SQLITE_CONSTRAINT_UNIQUE)
        ) || db_err.message().contains("UNIQUE constraint failed");
        if duplicate {
            return StoreError::Duplicate { id: id.to_string() };
        }
    }
    StoreError::Sqlx(err)
}

#[async_trait]
impl LeaseStore for SqliteStore {
    async fn insert(&self, row: LockRow) -> StoreResult<()> {
        sqlx::query(SQL_INSERT)
            .bind(&row.id)
            .bind(to_sql_ms(row.expiry))
            .execute(&self.pool)
            .await
            .map_err(|err| convert_insert_err(&row.id, err))?;
        Ok(())
    }

    async fn delete_where(&self, filter: RowFilter) -> StoreResult<u64> {
        let result = match filter {
            RowFilter::Id(id) => {
                sqlx::query(SQL_DELETE_ID)
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            }
            RowFilter::ExpiredAt(now) => {
                sqlx::query(SQL_DELETE_EXPIRED)
                    .bind(to_sql_ms(now))
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected())
    }

    async fn rows(&self) -> StoreResult<Vec<LockRow>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(SQL_SELECT_ALL)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id, expiry)| LockRow::new(id, u64::try_from(expiry).unwrap_or(0)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_insert_maps_to_duplicate() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert(LockRow::new("job", 100)).await.unwrap();

        let err = store.insert(LockRow::new("job", 200)).await.unwrap_err();
        assert!(err.is_duplicate(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_gc_and_keyed_delete() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert(LockRow::new("a", 10)).await.unwrap();
        store.insert(LockRow::new("b", 20)).await.unwrap();
        store.insert(LockRow::new("c", 30)).await.unwrap();

        assert_eq!(store.delete_where(RowFilter::ExpiredAt(20)).await.unwrap(), 2);
        assert!(store.remove("c").await.unwrap());
        assert!(!store.remove("c").await.unwrap());
        assert!(store.rows().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert(LockRow::new("kept", 42)).await.unwrap();
        store.initialize().await.unwrap();

        assert_eq!(store.rows().await.unwrap(), vec![LockRow::new("kept", 42)]);
    }
}
