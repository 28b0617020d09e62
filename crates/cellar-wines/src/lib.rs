//! Wine catalogue persistence.
//!
//! A thin pass-through to the `wines` table. Every function takes a borrowed
//! [`Connection`] so callers decide how connections are pooled and which
//! thread the blocking SQLite call runs on.

use cellar_types::{Wine, WineDraft, WineId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

/// Errors that can occur during wine operations.
#[derive(Debug, Error)]
pub enum WineError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("wine with ID {0} not found")]
    NotFound(WineId),
}

const SELECT_COLUMNS: &str = "id, name, price, production_date, origin, alcohol_degree";

/// Inserts a new wine and returns it with its assigned id.
pub fn create_wine(conn: &Connection, draft: &WineDraft) -> Result<Wine, WineError> {
    let id: WineId = conn.query_row(
        "INSERT INTO wines (name, price, production_date, origin, alcohol_degree)
         VALUES (?1, ?2, ?3, ?4, ?5)
         RETURNING id",
        params![
            draft.name,
            draft.price,
            draft.production_date,
            draft.origin,
            draft.alcohol_degree,
        ],
        |row| row.get(0),
    )?;

    tracing::debug!(wine_id = id, "inserted wine row");
    Ok(Wine::from_draft(id, draft.clone()))
}

/// Retrieves a wine by id.
pub fn get_wine(conn: &Connection, id: WineId) -> Result<Wine, WineError> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM wines WHERE id = ?1"),
        [id],
        map_row_to_wine,
    )
    .optional()?
    .ok_or(WineError::NotFound(id))
}

/// Lists every wine, oldest first.
pub fn list_wines(conn: &Connection) -> Result<Vec<Wine>, WineError> {
    let mut stmt = conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM wines ORDER BY id ASC"))?;

    let rows = stmt.query_map([], map_row_to_wine)?;
    let mut wines = Vec::new();
    for row in rows {
        wines.push(row?);
    }
    Ok(wines)
}

/// Replaces every mutable field of an existing wine.
///
/// Returns the record as stored. A single `UPDATE` is issued, so a missing
/// row is detected from the affected-row count rather than a prior read.
pub fn update_wine(conn: &Connection, id: WineId, draft: &WineDraft) -> Result<Wine, WineError> {
    let count = conn.execute(
        "UPDATE wines
         SET name = ?1, price = ?2, production_date = ?3, origin = ?4,
             alcohol_degree = ?5, updated_at = datetime('now')
         WHERE id = ?6",
        params![
            draft.name,
            draft.price,
            draft.production_date,
            draft.origin,
            draft.alcohol_degree,
            id,
        ],
    )?;
    if count == 0 {
        return Err(WineError::NotFound(id));
    }
    Ok(Wine::from_draft(id, draft.clone()))
}

/// Deletes a wine.
pub fn delete_wine(conn: &Connection, id: WineId) -> Result<(), WineError> {
    let count = conn.execute("DELETE FROM wines WHERE id = ?1", [id])?;
    if count == 0 {
        return Err(WineError::NotFound(id));
    }
    Ok(())
}

fn map_row_to_wine(row: &Row) -> rusqlite::Result<Wine> {
    Ok(Wine {
        id: row.get(0)?,
        name: row.get(1)?,
        price: row.get(2)?,
        production_date: row.get(3)?,
        origin: row.get(4)?,
        alcohol_degree: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellar_db::run_migrations;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().expect("failed to open in-memory db");
        run_migrations(&conn).expect("failed to run migrations");
        conn
    }

    fn draft(name: &str) -> WineDraft {
        WineDraft {
            name: name.to_string(),
            price: 18.0,
            production_date: "2020-10-01".to_string(),
            origin: "Rioja".to_string(),
            alcohol_degree: 13.0,
        }
    }

    #[test]
    fn test_wine_crud() {
        let conn = setup_db();

        // Create
        let created = create_wine(&conn, &draft("Tempranillo")).expect("create failed");
        assert!(created.id > 0);
        assert_eq!(created.name, "Tempranillo");

        // Get
        let fetched = get_wine(&conn, created.id).expect("get failed");
        assert_eq!(fetched, created);

        // Update
        let mut changes = draft("Tempranillo Reserva");
        changes.price = 25.5;
        changes.origin.clear();
        let updated = update_wine(&conn, created.id, &changes).expect("update failed");
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.price, 25.5);

        let fetched = get_wine(&conn, created.id).expect("get updated failed");
        assert_eq!(fetched.name, "Tempranillo Reserva");
        assert_eq!(fetched.origin, "");

        // Delete
        delete_wine(&conn, created.id).expect("delete failed");
        match get_wine(&conn, created.id).unwrap_err() {
            WineError::NotFound(id) => assert_eq!(id, created.id),
            other => panic!("unexpected error type: {other:?}"),
        }
    }

    #[test]
    fn list_returns_wines_in_id_order() {
        let conn = setup_db();
        assert!(list_wines(&conn).expect("list failed").is_empty());

        let a = create_wine(&conn, &draft("Merlot")).unwrap();
        let b = create_wine(&conn, &draft("Syrah")).unwrap();
        assert!(b.id > a.id, "ids are assigned monotonically");

        let names: Vec<String> = list_wines(&conn)
            .unwrap()
            .into_iter()
            .map(|w| w.name)
            .collect();
        assert_eq!(names, vec!["Merlot", "Syrah"]);
    }

    #[test]
    fn update_missing_wine_is_not_found() {
        let conn = setup_db();
        let err = update_wine(&conn, 42, &draft("Ghost")).unwrap_err();
        assert!(matches!(err, WineError::NotFound(42)));
        assert!(list_wines(&conn).unwrap().is_empty(), "no row was created");
    }

    #[test]
    fn delete_missing_wine_is_not_found() {
        let conn = setup_db();
        let err = delete_wine(&conn, 7).unwrap_err();
        assert!(matches!(err, WineError::NotFound(7)));
        assert_eq!(err.to_string(), "wine with ID 7 not found");
    }

    #[test]
    fn deleted_ids_are_not_reused() {
        let conn = setup_db();
        let first = create_wine(&conn, &draft("Cabernet")).unwrap();
        delete_wine(&conn, first.id).unwrap();
        let second = create_wine(&conn, &draft("Cabernet")).unwrap();
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn missing_table_surfaces_database_error() {
        let conn = Connection::open_in_memory().unwrap();
        let err = list_wines(&conn).unwrap_err();
        assert!(matches!(err, WineError::Database(_)));
    }
}
