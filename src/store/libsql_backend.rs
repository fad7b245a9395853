//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. All timestamps are stored
//! as RFC 3339 text; wall-clock times and dates as `HH:MM:SS` /
//! `YYYY-MM-DD` text so the claim queries can compare them directly.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;
use crate::meds::{DoseRecord, Frequency, Medication};
use crate::reminders::{Reminder, ReminderKind, ReminderStatus};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Pool(format!("Failed to create database directory: {e}")))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.enable_foreign_keys().await?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.enable_foreign_keys().await?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Cascade deletes depend on this per-connection pragma.
    async fn enable_foreign_keys(&self) -> Result<(), StoreError> {
        self.conn
            .execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to enable foreign keys: {e}")))?;
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn parse_timestamp(s: &str) -> Result<DateTime<FixedOffset>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map_err(|e| StoreError::Serialization(format!("bad timestamp '{s}': {e}")))
}

fn parse_db_date(s: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| StoreError::Serialization(format!("bad date '{s}': {e}")))
}

fn parse_db_time(s: &str) -> Result<NaiveTime, StoreError> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .map_err(|e| StoreError::Serialization(format!("bad time '{s}': {e}")))
}

fn parse_db_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::Serialization(format!("bad uuid '{s}': {e}")))
}

fn times_to_json(times: &[NaiveTime]) -> Result<String, StoreError> {
    let raw: Vec<String> = times.iter().map(|t| t.format("%H:%M:%S").to_string()).collect();
    serde_json::to_string(&raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn times_from_json(raw: &str) -> Result<Vec<NaiveTime>, StoreError> {
    let raw: Vec<String> =
        serde_json::from_str(raw).map_err(|e| StoreError::Serialization(e.to_string()))?;
    raw.iter().map(|s| parse_db_time(s)).collect()
}

/// Convert `Option<String>` to a libsql value.
fn opt_text(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn query_err(e: libsql::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

// ── Row mappers ─────────────────────────────────────────────────────

const MEDICATION_COLUMNS: &str =
    "id, owner_id, name, dosage, frequency, times, start_date, end_date, notes, created_at, updated_at";

fn row_to_medication(row: &libsql::Row) -> Result<Medication, StoreError> {
    let id: String = row.get(0).map_err(query_err)?;
    let frequency_str: String = row.get(4).map_err(query_err)?;
    let times_str: String = row.get(5).map_err(query_err)?;
    let start_str: String = row.get(6).map_err(query_err)?;
    let end_str: Option<String> = row.get(7).ok();
    let created_str: String = row.get(9).map_err(query_err)?;
    let updated_str: String = row.get(10).map_err(query_err)?;

    Ok(Medication {
        id: parse_db_uuid(&id)?,
        owner_id: row.get(1).map_err(query_err)?,
        name: row.get(2).map_err(query_err)?,
        dosage: row.get(3).map_err(query_err)?,
        frequency: Frequency::from_str(&frequency_str).map_err(StoreError::Serialization)?,
        times: times_from_json(&times_str)?,
        start_date: parse_db_date(&start_str)?,
        end_date: end_str.as_deref().map(parse_db_date).transpose()?,
        notes: row.get(8).ok(),
        created_at: parse_timestamp(&created_str)?,
        updated_at: parse_timestamp(&updated_str)?,
    })
}

const DOSE_COLUMNS: &str =
    "medication_id, date, dose_index, scheduled_time, taken, missed, taken_at";

fn row_to_dose(row: &libsql::Row) -> Result<DoseRecord, StoreError> {
    let med_id: String = row.get(0).map_err(query_err)?;
    let date_str: String = row.get(1).map_err(query_err)?;
    let index: i64 = row.get(2).map_err(query_err)?;
    let time_str: String = row.get(3).map_err(query_err)?;
    let taken: i64 = row.get(4).map_err(query_err)?;
    let missed: i64 = row.get(5).map_err(query_err)?;
    let taken_at_str: Option<String> = row.get(6).ok();

    Ok(DoseRecord {
        medication_id: parse_db_uuid(&med_id)?,
        date: parse_db_date(&date_str)?,
        dose_index: index as usize,
        scheduled_time: parse_db_time(&time_str)?,
        taken: taken != 0,
        missed: missed != 0,
        taken_at: taken_at_str.as_deref().map(parse_timestamp).transpose()?,
    })
}

const REMINDER_COLUMNS: &str =
    "id, owner_id, medication_id, dose_index, time, date, kind, status, last_fired_on, created_at, updated_at";

fn row_to_reminder(row: &libsql::Row) -> Result<Reminder, StoreError> {
    let id: String = row.get(0).map_err(query_err)?;
    let med_id: String = row.get(2).map_err(query_err)?;
    let index: i64 = row.get(3).map_err(query_err)?;
    let time_str: String = row.get(4).map_err(query_err)?;
    let date_str: String = row.get(5).map_err(query_err)?;
    let kind_str: String = row.get(6).map_err(query_err)?;
    let status_str: String = row.get(7).map_err(query_err)?;
    let last_fired_str: Option<String> = row.get(8).ok();
    let created_str: String = row.get(9).map_err(query_err)?;
    let updated_str: String = row.get(10).map_err(query_err)?;

    Ok(Reminder {
        id: parse_db_uuid(&id)?,
        owner_id: row.get(1).map_err(query_err)?,
        medication_id: parse_db_uuid(&med_id)?,
        dose_index: index as usize,
        time: parse_db_time(&time_str)?,
        date: parse_db_date(&date_str)?,
        kind: ReminderKind::from_str(&kind_str).map_err(StoreError::Serialization)?,
        status: ReminderStatus::from_str(&status_str).map_err(StoreError::Serialization)?,
        last_fired_on: last_fired_str.as_deref().map(parse_db_date).transpose()?,
        created_at: parse_timestamp(&created_str)?,
        updated_at: parse_timestamp(&updated_str)?,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), StoreError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Medications ─────────────────────────────────────────────────

    async fn insert_medication(&self, med: &Medication) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO medications (id, owner_id, name, dosage, frequency, times, start_date, end_date, notes, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    med.id.to_string(),
                    med.owner_id.clone(),
                    med.name.clone(),
                    med.dosage.clone(),
                    med.frequency.type_tag(),
                    times_to_json(&med.times)?,
                    med.start_date.format("%Y-%m-%d").to_string(),
                    opt_text(med.end_date.map(|d| d.format("%Y-%m-%d").to_string())),
                    opt_text(med.notes.clone()),
                    med.created_at.to_rfc3339(),
                    med.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_medication(&self, id: Uuid) -> Result<Option<Medication>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MEDICATION_COLUMNS} FROM medications WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_medication(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_medications_for_owner(
        &self,
        owner_id: &str,
    ) -> Result<Vec<Medication>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MEDICATION_COLUMNS} FROM medications WHERE owner_id = ?1 ORDER BY name"
                ),
                params![owner_id],
            )
            .await
            .map_err(query_err)?;

        let mut meds = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            meds.push(row_to_medication(&row)?);
        }
        Ok(meds)
    }

    async fn list_medications(&self) -> Result<Vec<Medication>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MEDICATION_COLUMNS} FROM medications ORDER BY owner_id, name"),
                (),
            )
            .await
            .map_err(query_err)?;

        let mut meds = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            meds.push(row_to_medication(&row)?);
        }
        Ok(meds)
    }

    async fn update_medication(&self, med: &Medication) -> Result<(), StoreError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE medications SET name = ?2, dosage = ?3, frequency = ?4, times = ?5,
                        start_date = ?6, end_date = ?7, notes = ?8, updated_at = ?9
                 WHERE id = ?1",
                params![
                    med.id.to_string(),
                    med.name.clone(),
                    med.dosage.clone(),
                    med.frequency.type_tag(),
                    times_to_json(&med.times)?,
                    med.start_date.format("%Y-%m-%d").to_string(),
                    opt_text(med.end_date.map(|d| d.format("%Y-%m-%d").to_string())),
                    opt_text(med.notes.clone()),
                    med.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;

        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "medication".to_string(),
                id: med.id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_medication(&self, id: Uuid) -> Result<bool, StoreError> {
        let changed = self
            .conn()
            .execute(
                "DELETE FROM medications WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;
        Ok(changed > 0)
    }

    // ── Dose records ────────────────────────────────────────────────

    async fn get_dose_records(
        &self,
        medication_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<DoseRecord>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {DOSE_COLUMNS} FROM dose_records
                     WHERE medication_id = ?1 AND date = ?2 ORDER BY dose_index"
                ),
                params![
                    medication_id.to_string(),
                    date.format("%Y-%m-%d").to_string()
                ],
            )
            .await
            .map_err(query_err)?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            records.push(row_to_dose(&row)?);
        }
        Ok(records)
    }

    async fn replace_dose_records(
        &self,
        medication_id: Uuid,
        date: NaiveDate,
        records: &[DoseRecord],
    ) -> Result<(), StoreError> {
        let date_str = date.format("%Y-%m-%d").to_string();

        self.conn()
            .execute(
                "DELETE FROM dose_records WHERE medication_id = ?1 AND date = ?2",
                params![medication_id.to_string(), date_str.clone()],
            )
            .await
            .map_err(query_err)?;

        for record in records {
            self.conn()
                .execute(
                    "INSERT INTO dose_records (medication_id, date, dose_index, scheduled_time, taken, missed, taken_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        record.medication_id.to_string(),
                        record.date.format("%Y-%m-%d").to_string(),
                        record.dose_index as i64,
                        record.scheduled_time.format("%H:%M:%S").to_string(),
                        record.taken as i64,
                        record.missed as i64,
                        opt_text(record.taken_at.map(|t| t.to_rfc3339())),
                    ],
                )
                .await
                .map_err(query_err)?;
        }
        Ok(())
    }

    async fn update_dose_record(&self, record: &DoseRecord) -> Result<(), StoreError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE dose_records SET taken = ?4, missed = ?5, taken_at = ?6
                 WHERE medication_id = ?1 AND date = ?2 AND dose_index = ?3",
                params![
                    record.medication_id.to_string(),
                    record.date.format("%Y-%m-%d").to_string(),
                    record.dose_index as i64,
                    record.taken as i64,
                    record.missed as i64,
                    opt_text(record.taken_at.map(|t| t.to_rfc3339())),
                ],
            )
            .await
            .map_err(query_err)?;

        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "dose_record".to_string(),
                id: format!(
                    "{}/{}/{}",
                    record.medication_id, record.date, record.dose_index
                ),
            });
        }
        Ok(())
    }

    // ── Reminders ───────────────────────────────────────────────────

    async fn insert_reminder(&self, reminder: &Reminder) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO reminders (id, owner_id, medication_id, dose_index, time, date, kind, status, last_fired_on, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    reminder.id.to_string(),
                    reminder.owner_id.clone(),
                    reminder.medication_id.to_string(),
                    reminder.dose_index as i64,
                    reminder.time.format("%H:%M:%S").to_string(),
                    reminder.date.format("%Y-%m-%d").to_string(),
                    reminder.kind.type_tag(),
                    reminder.status.type_tag(),
                    opt_text(reminder.last_fired_on.map(|d| d.format("%Y-%m-%d").to_string())),
                    reminder.created_at.to_rfc3339(),
                    reminder.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_reminder(&self, id: Uuid) -> Result<Option<Reminder>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_reminder(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_reminder(&self, reminder: &Reminder) -> Result<(), StoreError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE reminders SET time = ?2, date = ?3, status = ?4, last_fired_on = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![
                    reminder.id.to_string(),
                    reminder.time.format("%H:%M:%S").to_string(),
                    reminder.date.format("%Y-%m-%d").to_string(),
                    reminder.status.type_tag(),
                    opt_text(reminder.last_fired_on.map(|d| d.format("%Y-%m-%d").to_string())),
                    reminder.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;

        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "reminder".to_string(),
                id: reminder.id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_reminder(&self, id: Uuid) -> Result<bool, StoreError> {
        let changed = self
            .conn()
            .execute(
                "DELETE FROM reminders WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;
        Ok(changed > 0)
    }

    async fn list_reminders_for_owner(
        &self,
        owner_id: &str,
    ) -> Result<Vec<Reminder>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {REMINDER_COLUMNS} FROM reminders WHERE owner_id = ?1 ORDER BY time"
                ),
                params![owner_id],
            )
            .await
            .map_err(query_err)?;

        let mut reminders = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            reminders.push(row_to_reminder(&row)?);
        }
        Ok(reminders)
    }

    async fn list_reminders_for_slot(
        &self,
        medication_id: Uuid,
        dose_index: usize,
    ) -> Result<Vec<Reminder>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {REMINDER_COLUMNS} FROM reminders
                     WHERE medication_id = ?1 AND dose_index = ?2 ORDER BY date"
                ),
                params![medication_id.to_string(), dose_index as i64],
            )
            .await
            .map_err(query_err)?;

        let mut reminders = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            reminders.push(row_to_reminder(&row)?);
        }
        Ok(reminders)
    }

    async fn list_active_reminders(&self) -> Result<Vec<Reminder>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {REMINDER_COLUMNS} FROM reminders
                     WHERE kind = 'daily' OR status = 'pending' ORDER BY time"
                ),
                (),
            )
            .await
            .map_err(query_err)?;

        let mut reminders = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            reminders.push(row_to_reminder(&row)?);
        }
        Ok(reminders)
    }

    async fn claim_single_fire(
        &self,
        id: Uuid,
        fired_on: NaiveDate,
    ) -> Result<bool, StoreError> {
        // Affected-row check makes the pending→sent transition exactly-once
        // under concurrent ticks or instances.
        let changed = self
            .conn()
            .execute(
                "UPDATE reminders SET status = 'sent', last_fired_on = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
                 WHERE id = ?1 AND kind = 'single' AND status = 'pending'",
                params![id.to_string(), fired_on.format("%Y-%m-%d").to_string()],
            )
            .await
            .map_err(query_err)?;
        Ok(changed > 0)
    }

    async fn release_single_fire(&self, id: Uuid) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "UPDATE reminders SET status = 'pending', last_fired_on = NULL, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
                 WHERE id = ?1 AND kind = 'single'",
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn claim_daily_fire(&self, id: Uuid, fired_on: NaiveDate) -> Result<bool, StoreError> {
        let fired_str = fired_on.format("%Y-%m-%d").to_string();
        let changed = self
            .conn()
            .execute(
                "UPDATE reminders SET status = 'sent', last_fired_on = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
                 WHERE id = ?1 AND kind = 'daily'
                   AND (last_fired_on IS NULL OR last_fired_on <> ?2)",
                params![id.to_string(), fired_str],
            )
            .await
            .map_err(query_err)?;
        Ok(changed > 0)
    }

    async fn reset_daily_reminders(&self) -> Result<usize, StoreError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE reminders SET status = 'pending', updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
                 WHERE kind = 'daily' AND status = 'sent'",
                (),
            )
            .await
            .map_err(query_err)?;
        Ok(changed as usize)
    }
}
