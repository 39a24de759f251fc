// src/db/schema.rs

//! History schema and migrations
//!
//! A revision is one applied transaction against a prefix. Its recorded
//! specs and package changes keep their order through a `position` column.

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version: Option<i32> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        _ => Err(Error::InitError(format!("Unknown migration version: {}", version))),
    }
}

/// Initial schema - Version 1
///
/// - revisions: one row per recorded transaction
/// - revision_specs: requested and removed specs, in request order
/// - revision_packages: unlinked and linked packages, in execution order
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE revisions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            prefix TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX idx_revisions_prefix ON revisions(prefix);

        CREATE TABLE revision_specs (
            revision_id INTEGER NOT NULL,
            action TEXT NOT NULL CHECK(action IN ('add', 'remove')),
            spec TEXT NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (revision_id, action, position),
            FOREIGN KEY (revision_id) REFERENCES revisions(id) ON DELETE CASCADE
        );

        CREATE TABLE revision_packages (
            revision_id INTEGER NOT NULL,
            action TEXT NOT NULL CHECK(action IN ('link', 'unlink')),
            dist TEXT NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (revision_id, action, position),
            FOREIGN KEY (revision_id) REFERENCES revisions(id) ON DELETE CASCADE
        );
        ",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 0);

        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'revision%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }
}
