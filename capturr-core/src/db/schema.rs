//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: outbox queue and device profiles
    r#"
    CREATE TABLE IF NOT EXISTS captures (
        id               TEXT PRIMARY KEY,
        content          TEXT NOT NULL,
        kind             TEXT NOT NULL DEFAULT 'note',
        status           TEXT NOT NULL DEFAULT 'pending',
        created_at       DATETIME NOT NULL,
        sent_at          DATETIME,

        -- Retry state (together with status this is the full recovery state)
        last_attempt_at  DATETIME,
        next_attempt_at  DATETIME,
        attempt_count    INTEGER NOT NULL DEFAULT 0,
        stamp_at         DATETIME,
        hard_error       INTEGER NOT NULL DEFAULT 0,
        last_error       TEXT
    );

    -- Tick scan: status IN (...) ordered by insertion, filtered on next_attempt_at
    CREATE INDEX IF NOT EXISTS idx_captures_status_next
        ON captures(status, next_attempt_at);
    CREATE INDEX IF NOT EXISTS idx_captures_created ON captures(created_at);

    CREATE TABLE IF NOT EXISTS profiles (
        id                 TEXT PRIMARY KEY,
        graph_name         TEXT,
        api_token          TEXT,
        default_tag        TEXT,
        add_timestamp      INTEGER NOT NULL DEFAULT 0,
        use_daily_notes    INTEGER NOT NULL DEFAULT 1,
        custom_location    TEXT,
        custom_block       TEXT,
        share_format_links INTEGER NOT NULL DEFAULT 0
    );
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
