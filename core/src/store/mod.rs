//! SQLite persistence for projects, repositories and mirrored history.
//!
//! All public operations are async: callers hold a cheap clonable
//! [`Store`] handle and every query runs on the blocking thread pool
//! against an r2d2-managed connection. Multi-statement writes go
//! through [`in_transaction`] with immediate behavior so writers take
//! the write lock up front.

mod changesets;
mod repositories;
mod schema;

pub use repositories::InsertRepository;
pub use schema::SCHEMA_VERSION;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use std::path::Path;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("{0} not found")]
    NotFound(&'static str),
}

pub type Result<T> = std::result::Result<T, StoreError>;

const DEFAULT_POOL_SIZE: u32 = 8;

/// Handle to the SQLite database. Clones share one connection pool.
#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    /// Open (creating if needed) the database at `path` and bring the
    /// schema up to [`SCHEMA_VERSION`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_pool_size(path, DEFAULT_POOL_SIZE)
    }

    pub fn open_with_pool_size(path: impl AsRef<Path>, pool_size: u32) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path.as_ref()).with_init(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "cache_size", "-32000")?;
            conn.pragma_update(None, "busy_timeout", "5000")?;
            Ok(())
        });
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        let store = Self { pool };
        let mut conn = store
            .pool
            .get()
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        schema::migrate(&mut conn)?;
        Ok(store)
    }

    /// Run `f` with a pooled connection on the blocking thread pool.
    pub(crate) async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| StoreError::Pool(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Transaction(format!("task join error: {e}")))?
    }
}

/// Execute `f` inside a transaction with the given behavior.
///
/// Commits when `f` returns `Ok`; any error path rolls back when the
/// transaction handle drops.
pub(crate) fn in_transaction<F, T>(
    conn: &mut Connection,
    behavior: TransactionBehavior,
    f: F,
) -> Result<T>
where
    F: FnOnce(&Transaction<'_>) -> Result<T>,
{
    let tx = conn.transaction_with_behavior(behavior)?;
    let result = f(&tx)?;
    tx.commit()?;
    Ok(result)
}

/// Map a unique-index violation to [`StoreError::Constraint`], leaving
/// other SQLite errors untouched.
pub(crate) fn constraint_error(err: rusqlite::Error, what: &str) -> StoreError {
    if let rusqlite::Error::SqliteFailure(inner, _) = &err {
        if inner.code == rusqlite::ErrorCode::ConstraintViolation {
            return StoreError::Constraint(what.to_string());
        }
    }
    StoreError::Sqlite(err)
}
