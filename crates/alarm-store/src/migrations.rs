//! Schema migrations.
//!
//! Migrations run in order and are tracked in the `schema_migrations` table.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::StoreResult;

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version = schema_version(conn)?;
    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_alarms(conn)?;
    }
    if current_version < 2 {
        migrate_v2_sync_tasks(conn)?;
    }

    debug!("Migrations complete");
    Ok(())
}

/// Highest applied schema version, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> StoreResult<i32> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: alarms and the single-row migration flag.
fn migrate_v1_alarms(conn: &Connection) -> StoreResult<()> {
    info!("Applying migration v1: alarms");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS alarms (
            id TEXT PRIMARY KEY,
            trigger_json TEXT NOT NULL,
            enabled INTEGER NOT NULL,
            label TEXT NOT NULL,
            content_ref TEXT,
            sound_json TEXT NOT NULL,
            snooze_json TEXT NOT NULL,
            snooze_state_json TEXT NOT NULL,
            last_fired_at INTEGER,
            version INTEGER NOT NULL,
            sync_json TEXT NOT NULL,
            sync_status TEXT NOT NULL,
            origin TEXT NOT NULL,
            pending_delete INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_alarms_sync_status ON alarms(sync_status);

        CREATE TABLE IF NOT EXISTS migration_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            completed INTEGER NOT NULL DEFAULT 0,
            completed_at INTEGER,
            imported INTEGER NOT NULL DEFAULT 0
        );

        INSERT OR IGNORE INTO migration_state (id, completed, completed_at, imported)
        VALUES (1, 0, NULL, 0);
        ",
    )?;

    record_migration(conn, 1, "alarms")?;
    Ok(())
}

/// V2: persisted sync task queue, one row per (alarm, backend).
fn migrate_v2_sync_tasks(conn: &Connection) -> StoreResult<()> {
    info!("Applying migration v2: sync tasks");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sync_tasks (
            alarm_id TEXT NOT NULL,
            backend TEXT NOT NULL,
            op TEXT NOT NULL,
            target_version INTEGER NOT NULL,
            attempt INTEGER NOT NULL DEFAULT 0,
            next_retry_at INTEGER NOT NULL,
            last_error TEXT,
            enqueued_at INTEGER NOT NULL,
            PRIMARY KEY (alarm_id, backend)
        );

        CREATE INDEX IF NOT EXISTS idx_sync_tasks_due ON sync_tasks(next_retry_at);
        ",
    )?;

    record_migration(conn, 2, "sync_tasks")?;
    Ok(())
}
