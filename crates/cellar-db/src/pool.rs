//! Connection pool for the wine store.

use r2d2::{CustomizeConnection, Pool};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use std::time::Duration;
use thiserror::Error;

/// Path that selects a private in-memory database instead of a file.
pub const MEMORY_PATH: &str = ":memory:";

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections. Ignored for
    /// [`MEMORY_PATH`], which always uses exactly one.
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// Per-connection setup run whenever the pool opens a connection.
#[derive(Debug, Clone, Copy)]
struct ConnectionSetup {
    busy_timeout: Duration,
    wal: bool,
}

impl CustomizeConnection<Connection, rusqlite::Error> for ConnectionSetup {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", true)?;

        if self.wal {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            if !mode.eq_ignore_ascii_case("wal") {
                return Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                    Some(format!("database refused WAL journal mode (got {mode})")),
                ));
            }
        }
        Ok(())
    }
}

/// Opens the wine store at `db_path`.
///
/// A file database gets WAL journaling and up to `pool_max_size`
/// connections. [`MEMORY_PATH`] gets a single connection that is never
/// recycled, because every SQLite in-memory connection is its own database.
///
/// # Errors
///
/// Returns `PoolError::PoolInit` if the first connection cannot be opened
/// or configured.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let in_memory = db_path == MEMORY_PATH;
    let setup = ConnectionSetup {
        busy_timeout: Duration::from_millis(settings.busy_timeout_ms),
        wal: !in_memory,
    };

    let builder = DbPool::builder().connection_customizer(Box::new(setup));

    let pool = if in_memory {
        if settings.pool_max_size > 1 {
            tracing::debug!(
                requested = settings.pool_max_size,
                "in-memory store limited to one connection"
            );
        }
        builder
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(SqliteConnectionManager::memory())?
    } else {
        let manager = SqliteConnectionManager::file(db_path).with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        );
        builder.max_size(settings.pool_max_size).build(manager)?
    };

    tracing::debug!(
        path = db_path,
        max_size = pool.max_size(),
        "database pool created"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_pool_shares_one_database() {
        let pool = create_pool(MEMORY_PATH, DbRuntimeSettings::default()).unwrap();
        assert_eq!(pool.max_size(), 1);

        pool.get()
            .unwrap()
            .execute_batch("CREATE TABLE scratch (id INTEGER); INSERT INTO scratch VALUES (1);")
            .unwrap();

        // A later checkout sees the same data.
        let count: i64 = pool
            .get()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM scratch", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn connections_get_timeout_and_foreign_keys() {
        let settings = DbRuntimeSettings {
            busy_timeout_ms: 2_500,
            pool_max_size: 3,
        };
        let pool = create_pool(MEMORY_PATH, settings).unwrap();
        let conn = pool.get().unwrap();

        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);

        let busy_timeout: i64 = conn
            .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(busy_timeout, 2_500);
    }

    #[test]
    fn file_pool_uses_wal_and_requested_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cellar.db");

        let settings = DbRuntimeSettings {
            pool_max_size: 4,
            ..DbRuntimeSettings::default()
        };
        let pool = create_pool(path.to_str().unwrap(), settings).unwrap();
        assert_eq!(pool.max_size(), 4);

        let mode: String = pool
            .get()
            .unwrap()
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }
}
