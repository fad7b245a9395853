//! Unified `Database` trait — single async interface for all persistence.
//!
//! The claim methods are conditional updates with affected-row checks so
//! that exactly-once reminder transitions hold under concurrent schedulers;
//! backends must implement them atomically.

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::StoreError;
use crate::meds::{DoseRecord, Medication};
use crate::reminders::Reminder;

/// Backend-agnostic database trait covering medications, dose records,
/// and reminders.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), StoreError>;

    // ── Medications ─────────────────────────────────────────────────

    /// Insert a new medication.
    async fn insert_medication(&self, med: &Medication) -> Result<(), StoreError>;

    /// Get a medication by ID.
    async fn get_medication(&self, id: Uuid) -> Result<Option<Medication>, StoreError>;

    /// All medications for one owner.
    async fn list_medications_for_owner(
        &self,
        owner_id: &str,
    ) -> Result<Vec<Medication>, StoreError>;

    /// All medications, every owner. Used by the sweeper.
    async fn list_medications(&self) -> Result<Vec<Medication>, StoreError>;

    /// Write back a medication's mutable fields (name, dosage, schedule,
    /// dates, notes).
    async fn update_medication(&self, med: &Medication) -> Result<(), StoreError>;

    /// Delete a medication; dose records and reminders cascade with it.
    /// Returns whether a row was deleted.
    async fn delete_medication(&self, id: Uuid) -> Result<bool, StoreError>;

    // ── Dose records ────────────────────────────────────────────────

    /// Dose records for one medication on one date, ordered by dose index.
    async fn get_dose_records(
        &self,
        medication_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<DoseRecord>, StoreError>;

    /// Replace all of a date's records for a medication with `records`.
    async fn replace_dose_records(
        &self,
        medication_id: Uuid,
        date: NaiveDate,
        records: &[DoseRecord],
    ) -> Result<(), StoreError>;

    /// Write back one dose record's mutable fields (taken/missed/taken_at).
    async fn update_dose_record(&self, record: &DoseRecord) -> Result<(), StoreError>;

    // ── Reminders ───────────────────────────────────────────────────

    /// Insert a new reminder.
    async fn insert_reminder(&self, reminder: &Reminder) -> Result<(), StoreError>;

    /// Get a reminder by ID.
    async fn get_reminder(&self, id: Uuid) -> Result<Option<Reminder>, StoreError>;

    /// Write back a reminder's mutable fields (time, date, status).
    async fn update_reminder(&self, reminder: &Reminder) -> Result<(), StoreError>;

    /// Delete a reminder. Returns whether a row was deleted.
    async fn delete_reminder(&self, id: Uuid) -> Result<bool, StoreError>;

    /// All reminders for one owner.
    async fn list_reminders_for_owner(&self, owner_id: &str)
    -> Result<Vec<Reminder>, StoreError>;

    /// All reminders targeting one dose slot.
    async fn list_reminders_for_slot(
        &self,
        medication_id: Uuid,
        dose_index: usize,
    ) -> Result<Vec<Reminder>, StoreError>;

    /// Reminders the engine must consider on a tick: pending singles plus
    /// every daily reminder.
    async fn list_active_reminders(&self) -> Result<Vec<Reminder>, StoreError>;

    /// Atomically transition a single reminder `pending → sent`.
    /// Returns false when another tick or instance already claimed it.
    async fn claim_single_fire(&self, id: Uuid, fired_on: NaiveDate)
    -> Result<bool, StoreError>;

    /// Roll a claimed single reminder back to `pending` after a total
    /// dispatch failure, so the next in-window tick can retry.
    async fn release_single_fire(&self, id: Uuid) -> Result<(), StoreError>;

    /// Atomically record a daily reminder's fire for `fired_on`.
    /// Returns false when it already fired on that date.
    async fn claim_daily_fire(&self, id: Uuid, fired_on: NaiveDate) -> Result<bool, StoreError>;

    /// Bulk `sent → pending` for daily reminders. Returns rows changed.
    async fn reset_daily_reminders(&self) -> Result<usize, StoreError>;
}
