//! Service facade — the core contract the HTTP layer (or any other
//! presentation layer) talks to. Stores and clocks only; no transport
//! types leak in either direction.

use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::clock::Clock;
use crate::doses::store::DoseStore;
use crate::doses::DoseStatus;
use crate::error::{DoseError, Error, Result};
use crate::meds::model::parse_date;
use crate::meds::{DoseRecord, Medication, NewMedication};
use crate::reminders::store::{ReminderStore, UpsertOutcome};
use crate::reminders::Reminder;
use crate::store::Database;

/// Entry point for every externally-triggered operation.
pub struct AdherenceService {
    db: Arc<dyn Database>,
    doses: Arc<DoseStore>,
    reminders: Arc<ReminderStore>,
    clock: Arc<dyn Clock>,
}

impl AdherenceService {
    pub fn new(
        db: Arc<dyn Database>,
        doses: Arc<DoseStore>,
        reminders: Arc<ReminderStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            doses,
            reminders,
            clock,
        }
    }

    // ── Medications ─────────────────────────────────────────────────

    /// Create a medication after validating the input.
    pub async fn create_medication(&self, input: NewMedication) -> Result<Medication> {
        let med = input.into_medication(self.clock.now())?;
        self.db.insert_medication(&med).await?;
        Ok(med)
    }

    /// All medications for one owner.
    pub async fn list_medications(&self, owner_id: &str) -> Result<Vec<Medication>> {
        Ok(self.db.list_medications_for_owner(owner_id).await?)
    }

    /// Delete a medication and everything it owns.
    pub async fn delete_medication(&self, owner_id: &str, medication_id: Uuid) -> Result<()> {
        let med = self.owned_medication(owner_id, medication_id).await?;
        self.db.delete_medication(med.id).await?;
        Ok(())
    }

    // ── Doses ───────────────────────────────────────────────────────

    /// Mark a dose taken. Fails with `OutOfWindow` outside ±action window.
    pub async fn take_dose(
        &self,
        owner_id: &str,
        medication_id: Uuid,
        date: &str,
        dose_index: usize,
    ) -> Result<DoseRecord> {
        let date = self.parse_dose_date(date)?;
        self.owned_medication(owner_id, medication_id).await?;
        self.doses.set_taken(medication_id, date, dose_index, true).await
    }

    /// Undo a taken dose. No window restriction.
    pub async fn undo_dose(
        &self,
        owner_id: &str,
        medication_id: Uuid,
        date: &str,
        dose_index: usize,
    ) -> Result<DoseRecord> {
        let date = self.parse_dose_date(date)?;
        self.owned_medication(owner_id, medication_id).await?;
        self.doses
            .set_taken(medication_id, date, dose_index, false)
            .await
    }

    /// Pure temporal status of one dose. No side effects beyond lazy
    /// record synthesis.
    pub async fn dose_status(
        &self,
        owner_id: &str,
        medication_id: Uuid,
        date: &str,
        dose_index: usize,
    ) -> Result<DoseStatus> {
        let date = self.parse_dose_date(date)?;
        self.owned_medication(owner_id, medication_id).await?;
        self.doses.status(medication_id, date, dose_index).await
    }

    // ── Reminders ───────────────────────────────────────────────────

    /// Create or update a reminder for a dose slot.
    pub async fn upsert_reminder(
        &self,
        owner_id: &str,
        medication_id: Uuid,
        dose_index: usize,
        reminder_time: &str,
        date: &str,
        kind: &str,
    ) -> Result<UpsertOutcome> {
        self.reminders
            .upsert(owner_id, medication_id, dose_index, reminder_time, date, kind)
            .await
    }

    /// Delete a reminder.
    pub async fn delete_reminder(&self, owner_id: &str, reminder_id: Uuid) -> Result<()> {
        self.reminders.delete(owner_id, reminder_id).await
    }

    /// All reminders for one owner.
    pub async fn list_reminders(&self, owner_id: &str) -> Result<Vec<Reminder>> {
        self.reminders.list_for_owner(owner_id).await
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn parse_dose_date(&self, raw: &str) -> Result<NaiveDate> {
        Ok(parse_date(raw)?)
    }

    async fn owned_medication(&self, owner_id: &str, medication_id: Uuid) -> Result<Medication> {
        self.db
            .get_medication(medication_id)
            .await?
            .filter(|m| m.owner_id == owner_id)
            .ok_or(Error::Dose(DoseError::MedicationNotFound { id: medication_id }))
    }
}
