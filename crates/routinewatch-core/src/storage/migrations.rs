//! Database schema migrations for routinewatch.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.
//!
//! Databases written by the original mobile backend already have the
//! `routines` table and sometimes the `user_id` column, so every step checks
//! what exists before altering anything.

use rusqlite::{Connection, Result as SqliteResult};
use tracing::{debug, warn};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 3;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }
    if current_version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    debug!(version, "schema version set");
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> SqliteResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Migration v1: the base `routines` table.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS routines (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            title         TEXT NOT NULL,
            routine_date  TEXT NOT NULL,
            routine_time  TEXT NOT NULL,
            status        TEXT NOT NULL DEFAULT 'pending',
            reminder_sent INTEGER NOT NULL DEFAULT 0,
            personality   TEXT NOT NULL DEFAULT 'hood',
            streak        INTEGER NOT NULL DEFAULT 0,
            failures      INTEGER NOT NULL DEFAULT 0
        );",
    )?;
    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: per-user partitioning.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    if !has_column(&tx, "routines", "user_id")? {
        tx.execute_batch("ALTER TABLE routines ADD COLUMN user_id TEXT NOT NULL DEFAULT 'default';")?;
    }
    tx.execute_batch("CREATE INDEX IF NOT EXISTS idx_routines_user_id ON routines(user_id);")?;
    set_schema_version(&tx, 2)?;
    tx.commit()
}

/// Migration v3: per-routine reminder and grace offsets.
///
/// Older rows get the defaults the client always assumed (10 and 5 minutes).
fn migrate_v3(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    if !has_column(&tx, "routines", "reminder_minutes_before")? {
        tx.execute_batch(
            "ALTER TABLE routines ADD COLUMN reminder_minutes_before INTEGER NOT NULL DEFAULT 10;",
        )?;
    }
    if !has_column(&tx, "routines", "grace_minutes_after")? {
        tx.execute_batch(
            "ALTER TABLE routines ADD COLUMN grace_minutes_after INTEGER NOT NULL DEFAULT 5;",
        )?;
    }
    tx.execute_batch("CREATE INDEX IF NOT EXISTS idx_routines_status ON routines(status);")?;
    set_schema_version(&tx, 3)?;
    tx.commit()
}
