//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::StoreError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: r#"
        CREATE TABLE IF NOT EXISTS medications (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            dosage TEXT NOT NULL DEFAULT '',
            frequency TEXT NOT NULL,
            times TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_medications_owner ON medications(owner_id);

        CREATE TABLE IF NOT EXISTS dose_records (
            medication_id TEXT NOT NULL REFERENCES medications(id) ON DELETE CASCADE,
            date TEXT NOT NULL,
            dose_index INTEGER NOT NULL,
            scheduled_time TEXT NOT NULL,
            taken INTEGER NOT NULL DEFAULT 0,
            missed INTEGER NOT NULL DEFAULT 0,
            taken_at TEXT,
            PRIMARY KEY (medication_id, date, dose_index)
        );
        CREATE INDEX IF NOT EXISTS idx_dose_records_date ON dose_records(date);

        CREATE TABLE IF NOT EXISTS reminders (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            medication_id TEXT NOT NULL REFERENCES medications(id) ON DELETE CASCADE,
            dose_index INTEGER NOT NULL,
            time TEXT NOT NULL,
            date TEXT NOT NULL,
            kind TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            last_fired_on TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_reminders_owner ON reminders(owner_id);
        CREATE INDEX IF NOT EXISTS idx_reminders_slot ON reminders(medication_id, dose_index);
        CREATE INDEX IF NOT EXISTS idx_reminders_status ON reminders(status);
    "#,
}];

/// Apply any migrations newer than the recorded schema version.
pub async fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| StoreError::Migration(format!("creating _migrations table: {e}")))?;

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| StoreError::Migration(format!("reading schema version: {e}")))?;

    let current: i64 = match rows
        .next()
        .await
        .map_err(|e| StoreError::Migration(format!("reading schema version: {e}")))?
    {
        Some(row) => row
            .get(0)
            .map_err(|e| StoreError::Migration(format!("reading schema version: {e}")))?,
        None => 0,
    };

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );

        conn.execute_batch(migration.sql)
            .await
            .map_err(|e| StoreError::Migration(format!("{}: {e}", migration.name)))?;

        conn.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            libsql::params![migration.version, migration.name],
        )
        .await
        .map_err(|e| StoreError::Migration(format!("recording {}: {e}", migration.name)))?;
    }

    Ok(())
}
