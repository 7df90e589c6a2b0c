//! State store schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: key/value records
    r#"
    CREATE TABLE IF NOT EXISTS kv (
        key         TEXT PRIMARY KEY,
        value       JSON NOT NULL,
        updated_at  DATETIME NOT NULL
    );
    "#,
    // Version 2: store values as TEXT so SQLite never coerces JSON numbers
    r#"
    CREATE TABLE kv_text (
        key         TEXT PRIMARY KEY,
        value       TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    );
    INSERT INTO kv_text (key, value, updated_at)
        SELECT key, CAST(value AS TEXT), updated_at FROM kv;
    DROP TABLE kv;
    ALTER TABLE kv_text RENAME TO kv;
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    tracing::debug!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking state store migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running state store migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    Ok(())
}

/// Get the current schema version
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    Ok(conn.query_row("PRAGMA user_version", [], |r| r.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM kv", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_upgrade_keeps_numeric_values_readable() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0]).unwrap();
        conn.execute("PRAGMA user_version = 1", []).unwrap();
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES ('n', '42', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 2);
        let value: String = conn
            .query_row("SELECT value FROM kv WHERE key = 'n'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(value, "42");
    }
}
