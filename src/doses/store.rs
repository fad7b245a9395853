//! Authoritative per-medication dose records.
//!
//! Records for a date are synthesized lazily the first time the date is
//! touched. Every read-modify-write on one medication's records goes
//! through that medication's async mutex, so a user taking a dose and the
//! sweeper marking it missed cannot interleave: whichever enters the lock
//! first wins, and `set_taken` re-checks the action window inside the lock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::{Clock, local_instant};
use crate::doses::status::{self, DoseStatus};
use crate::error::{DoseError, Error, Result};
use crate::meds::{DoseRecord, Medication};
use crate::store::Database;

/// Dose record store with per-medication linearization.
pub struct DoseStore {
    db: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
    action_window: chrono::Duration,
    /// Per-medication mutexes. Unrelated medications never contend.
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl DoseStore {
    pub fn new(db: Arc<dyn Database>, clock: Arc<dyn Clock>, action_window: chrono::Duration) -> Self {
        Self {
            db,
            clock,
            action_window,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The mutex guarding one medication's records.
    async fn med_lock(&self, medication_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(medication_id).or_default())
    }

    /// Records for `date`, synthesizing defaults on first touch.
    ///
    /// If the medication's `times_per_day` changed since the date was
    /// populated, the date's records are rebuilt to the new length and
    /// prior taken/missed state for that date is discarded.
    pub async fn get_or_init(
        &self,
        medication_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<DoseRecord>> {
        let lock = self.med_lock(medication_id).await;
        let _guard = lock.lock().await;
        let med = self.load_medication(medication_id).await?;
        self.load_records(&med, date).await
    }

    /// Mark a dose taken or untaken.
    ///
    /// Marking taken requires `now` within ±action_window of the scheduled
    /// instant; undoing has no window restriction.
    pub async fn set_taken(
        &self,
        medication_id: Uuid,
        date: NaiveDate,
        dose_index: usize,
        taken: bool,
    ) -> Result<DoseRecord> {
        let lock = self.med_lock(medication_id).await;
        let _guard = lock.lock().await;

        let med = self.load_medication(medication_id).await?;
        let mut records = self.load_records(&med, date).await?;
        let count = records.len();
        let record = records
            .get_mut(dose_index)
            .ok_or(Error::Dose(DoseError::IndexOutOfRange {
                index: dose_index,
                count,
            }))?;

        let now = self.clock.now();
        if taken {
            let scheduled_at = local_instant(self.clock.offset(), date, record.scheduled_time);
            let window_start = scheduled_at - self.action_window;
            let window_end = scheduled_at + self.action_window;
            if now < window_start || now > window_end {
                return Err(Error::Dose(DoseError::OutOfWindow {
                    scheduled: scheduled_at,
                    window_start,
                    window_end,
                }));
            }
            record.taken = true;
            record.missed = false;
            record.taken_at = Some(now);
        } else {
            record.taken = false;
            record.taken_at = None;
        }

        self.db.update_dose_record(record).await?;
        info!(
            medication_id = %medication_id,
            %date,
            dose_index,
            taken,
            "Dose record updated"
        );
        Ok(record.clone())
    }

    /// Mark a dose missed or unmissed. Missing a dose clears any taken state.
    pub async fn set_missed(
        &self,
        medication_id: Uuid,
        date: NaiveDate,
        dose_index: usize,
        missed: bool,
    ) -> Result<DoseRecord> {
        let lock = self.med_lock(medication_id).await;
        let _guard = lock.lock().await;

        let med = self.load_medication(medication_id).await?;
        let mut records = self.load_records(&med, date).await?;
        let count = records.len();
        let record = records
            .get_mut(dose_index)
            .ok_or(Error::Dose(DoseError::IndexOutOfRange {
                index: dose_index,
                count,
            }))?;

        record.missed = missed;
        if missed {
            record.taken = false;
            record.taken_at = None;
        }

        self.db.update_dose_record(record).await?;
        debug!(medication_id = %medication_id, %date, dose_index, missed, "Dose missed state updated");
        Ok(record.clone())
    }

    /// Pure temporal status of one dose at the clock's current instant.
    pub async fn status(
        &self,
        medication_id: Uuid,
        date: NaiveDate,
        dose_index: usize,
    ) -> Result<DoseStatus> {
        let records = self.get_or_init(medication_id, date).await?;
        let count = records.len();
        let record = records
            .get(dose_index)
            .ok_or(Error::Dose(DoseError::IndexOutOfRange {
                index: dose_index,
                count,
            }))?;
        Ok(status::evaluate(record, self.clock.now(), self.action_window))
    }

    /// The configured ± action window.
    pub fn action_window(&self) -> chrono::Duration {
        self.action_window
    }

    async fn load_medication(&self, medication_id: Uuid) -> Result<Medication> {
        self.db
            .get_medication(medication_id)
            .await?
            .ok_or(Error::Dose(DoseError::MedicationNotFound { id: medication_id }))
    }

    /// Fetch-or-synthesize without locking; callers hold the medication lock.
    async fn load_records(&self, med: &Medication, date: NaiveDate) -> Result<Vec<DoseRecord>> {
        if !med.is_scheduled_on(date) {
            return Err(Error::Dose(DoseError::NotScheduled { id: med.id, date }));
        }

        let existing = self.db.get_dose_records(med.id, date).await?;
        if existing.len() == med.times_per_day() {
            return Ok(existing);
        }

        if !existing.is_empty() {
            // times_per_day changed after the date was populated: rebuild,
            // discarding the date's prior taken/missed state.
            info!(
                medication_id = %med.id,
                %date,
                old = existing.len(),
                new = med.times_per_day(),
                "Dose schedule length changed; rebuilding date records"
            );
        }

        let records: Vec<DoseRecord> = med
            .times
            .iter()
            .enumerate()
            .map(|(index, time)| DoseRecord::new_default(med.id, date, index, *time))
            .collect();
        self.db.replace_dose_records(med.id, date, &records).await?;
        Ok(records)
    }
}
