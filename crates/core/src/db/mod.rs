//! SQLite persistence layer.
//!
//! Provides a [`Database`] handle with WAL-mode journaling, automatic schema
//! migrations, and row-level query helpers for every table the converter
//! uses. Row helpers take a `&Connection` so they run unchanged inside a
//! transaction.

pub mod lookup;
pub mod mappings;
pub mod queries;
pub mod repos;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::errors::DatabaseError;

/// Main database handle wrapping a SQLite connection.
///
/// The connection uses `PRAGMA foreign_keys = ON`. The inner connection is
/// wrapped in a `Mutex` so that `Database` is `Send + Sync`, enabling use
/// inside `Arc`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` with default settings.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let config = DatabaseConfig {
            path: path.as_ref().to_path_buf(),
            ..DatabaseConfig::default()
        };
        Self::open(&config)
    }

    /// Open (or create) the database described by a [`DatabaseConfig`].
    pub fn open(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        info!(path = %config.path.display(), wal = config.wal, "opening database");

        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&config.path)?;
        if config.wal {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;

        debug!("database opened successfully");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run all schema migrations to bring the database up to date.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        info!("initializing database schema");
        let conn = self.conn();
        schema::run_migrations(&conn)?;
        debug!("database schema is up to date");
        Ok(())
    }

    /// Obtain a lock on the underlying connection.
    ///
    /// If the Mutex is poisoned (a previous holder panicked), the lock is
    /// recovered rather than propagating a panic.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Execute a closure inside a SQLite transaction. If the closure returns
    /// `Ok`, the transaction is committed; otherwise it is rolled back when
    /// the transaction is dropped.
    pub fn transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<DatabaseError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(DatabaseError::from)?;
        let result = f(&tx)?;
        tx.commit().map_err(DatabaseError::from)?;
        Ok(result)
    }
}

/// Current time in the RFC 3339 form stored in every timestamp column.
pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Parse a stored timestamp, falling back to the Unix epoch if the column
/// holds something unparseable.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

/// Encode a value for a JSON text column.
pub(crate) fn encode_json<T: Serialize>(column: &str, value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Encoding {
        column: column.to_string(),
        detail: e.to_string(),
    })
}

/// Decode a JSON text column inside a row mapper.
pub(crate) fn decode_json<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Decode a nullable JSON text column inside a row mapper.
pub(crate) fn decode_json_opt<T: DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        serde_json::from_str(&t)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().expect("failed to create in-memory db");
        db.initialize().expect("failed to initialize schema");
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        let db = Database::new(&path).expect("failed to create file db");
        db.initialize().expect("failed to initialize schema");
        assert!(path.exists());
    }

    #[test]
    fn test_transaction_commit() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        db.transaction(|conn| {
            conn.execute(
                "INSERT INTO clients (name, created_at, updated_at) VALUES (?1, ?2, ?2)",
                rusqlite::params!["acme", now()],
            )?;
            Ok::<_, DatabaseError>(())
        })
        .unwrap();

        let count: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM clients WHERE name = ?1",
                rusqlite::params!["acme"],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_transaction_rollback() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        let result: Result<(), DatabaseError> = db.transaction(|conn| {
            conn.execute(
                "INSERT INTO clients (name, created_at, updated_at) VALUES (?1, ?2, ?2)",
                rusqlite::params!["rollback_test", now()],
            )?;
            Err(DatabaseError::NotFound {
                entity: "test".into(),
                id: "forced".into(),
            })
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM clients WHERE name = ?1",
                rusqlite::params!["rollback_test"],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }
}
