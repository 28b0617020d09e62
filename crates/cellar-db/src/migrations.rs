//! Schema migrations for the wine store.
//!
//! The schema version lives in SQLite's `user_version` header field: a
//! database at version `n` has the first `n` entries of [`MIGRATIONS`]
//! applied. Each step and its version bump commit in one transaction.

use rusqlite::Connection;
use thiserror::Error;

/// Ordered schema steps. Append only; never reorder or edit a shipped entry.
const MIGRATIONS: &[(&str, &str)] = &[("001_wines", include_str!("migrations/001_wines.sql"))];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to read schema version: {0}")]
    Version(#[source] rusqlite::Error),

    /// The database was written by a newer build.
    #[error("database schema version {found} is newer than the {known} migrations this build knows")]
    UnknownVersion { found: usize, known: usize },

    #[error("migration '{name}' failed: {source}")]
    Step {
        name: &'static str,
        #[source]
        source: rusqlite::Error,
    },
}

/// Brings the schema up to date and returns the names of the migrations
/// applied by this call, in order. An up-to-date database yields an empty
/// list.
///
/// # Errors
///
/// Returns `MigrationError` if the version cannot be read, is ahead of this
/// build, or a step fails. A failed step leaves the database at the
/// previous version.
pub fn run_migrations(conn: &Connection) -> Result<Vec<&'static str>, MigrationError> {
    apply(conn, MIGRATIONS)
}

fn apply(
    conn: &Connection,
    migrations: &[(&'static str, &'static str)],
) -> Result<Vec<&'static str>, MigrationError> {
    let version: usize = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .map_err(MigrationError::Version)?;

    if version > migrations.len() {
        return Err(MigrationError::UnknownVersion {
            found: version,
            known: migrations.len(),
        });
    }

    let mut applied = Vec::new();
    for (index, &(name, sql)) in migrations.iter().enumerate().skip(version) {
        let step = || -> rusqlite::Result<()> {
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(sql)?;
            tx.pragma_update(None, "user_version", index + 1)?;
            tx.commit()
        };
        step().map_err(|source| MigrationError::Step { name, source })?;

        tracing::info!(migration = name, version = index + 1, "applied migration");
        applied.push(name);
    }

    Ok(applied)
}
