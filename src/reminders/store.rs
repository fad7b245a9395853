//! Reminder persistence and scheduling-constraint validation.
//!
//! One dose slot (medication + dose index) holds at most one daily
//! reminder, or any number of single reminders on distinct dates — never a
//! mix. Re-adding the same kind on the same effective date updates the
//! existing row instead of duplicating it.

use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::{Clock, local_instant};
use crate::error::{Error, ReminderError, Result};
use crate::meds::model::{parse_date, parse_time};
use crate::reminders::model::{Reminder, ReminderKind, ReminderStatus};
use crate::store::Database;

/// Result of an upsert: the stored reminder, and whether it was newly
/// created (false = an existing reminder was updated in place).
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub reminder: Reminder,
    pub created: bool,
}

/// Reminder store.
pub struct ReminderStore {
    db: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
    /// How far before the dose time a reminder may be scheduled.
    lead_window: chrono::Duration,
}

impl ReminderStore {
    pub fn new(db: Arc<dyn Database>, clock: Arc<dyn Clock>, lead_window: chrono::Duration) -> Self {
        Self {
            db,
            clock,
            lead_window,
        }
    }

    /// Create or update the reminder for a dose slot.
    ///
    /// `reminder_time` is `HH:MM:SS`, `date` is `YYYY-MM-DD`, `kind` is
    /// `single` or `daily`. The time must fall inside
    /// `[dose_time − lead_window, dose_time]` unless `date` is strictly in
    /// the future, and the resulting instant must not be in the past.
    pub async fn upsert(
        &self,
        owner_id: &str,
        medication_id: Uuid,
        dose_index: usize,
        reminder_time: &str,
        date: &str,
        kind: &str,
    ) -> Result<UpsertOutcome> {
        let kind = ReminderKind::from_str(kind).map_err(|_| {
            Error::Reminder(ReminderError::InvalidFormat {
                field: "type".into(),
                value: kind.to_string(),
            })
        })?;
        let time = parse_time(reminder_time).map_err(|_| {
            Error::Reminder(ReminderError::InvalidFormat {
                field: "reminder_time".into(),
                value: reminder_time.to_string(),
            })
        })?;
        let date = parse_date(date).map_err(|_| {
            Error::Reminder(ReminderError::InvalidFormat {
                field: "date".into(),
                value: date.to_string(),
            })
        })?;

        let med = self
            .db
            .get_medication(medication_id)
            .await?
            .filter(|m| m.owner_id == owner_id)
            .ok_or(Error::Reminder(ReminderError::MedicationNotFound {
                id: medication_id,
            }))?;

        let dose_time =
            med.scheduled_time(dose_index)
                .ok_or(Error::Reminder(ReminderError::IndexOutOfRange {
                    index: dose_index,
                    count: med.times_per_day(),
                }))?;

        let now = self.clock.now();
        let today = self.clock.today();
        let offset = self.clock.offset();

        let trigger_at = local_instant(offset, date, time);
        if trigger_at < now && date <= today {
            return Err(Error::Reminder(ReminderError::PastReminder));
        }

        // The lead-window constraint only binds for today-or-earlier dates;
        // a future date may be adjusted before it arrives.
        if date <= today {
            let dose_at = local_instant(offset, date, dose_time);
            let earliest = dose_at - self.lead_window;
            if trigger_at < earliest || trigger_at > dose_at {
                return Err(Error::Reminder(ReminderError::WindowViolation {
                    earliest: earliest.format("%H:%M:%S").to_string(),
                    latest: dose_at.format("%H:%M:%S").to_string(),
                }));
            }
        }

        let slot = self.db.list_reminders_for_slot(medication_id, dose_index).await?;

        if let Some(conflict) = slot.iter().find(|r| r.kind != kind) {
            return Err(Error::Reminder(ReminderError::TypeConflict {
                existing: conflict.kind.to_string(),
                requested: kind.to_string(),
            }));
        }

        let existing = slot.into_iter().find(|r| match kind {
            // At most one daily reminder per slot; its anchor date is
            // irrelevant for recurrence.
            ReminderKind::Daily => true,
            ReminderKind::Single => r.date == date,
        });

        if let Some(mut reminder) = existing {
            reminder.time = time;
            reminder.date = date;
            reminder.updated_at = now;
            if kind == ReminderKind::Single {
                // Rescheduling a single reminder re-arms it. A daily one
                // keeps its last-fired date so it cannot double-fire today.
                reminder.status = ReminderStatus::Pending;
                reminder.last_fired_on = None;
            }
            self.db.update_reminder(&reminder).await?;
            info!(reminder_id = %reminder.id, kind = %kind, "Reminder updated");
            return Ok(UpsertOutcome {
                reminder,
                created: false,
            });
        }

        let reminder = Reminder {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            medication_id,
            dose_index,
            time,
            date,
            kind,
            status: ReminderStatus::Pending,
            last_fired_on: None,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_reminder(&reminder).await?;
        info!(reminder_id = %reminder.id, kind = %kind, %date, "Reminder created");
        Ok(UpsertOutcome {
            reminder,
            created: true,
        })
    }

    /// Set a reminder's status.
    pub async fn update_status(&self, id: Uuid, status: ReminderStatus) -> Result<Reminder> {
        let mut reminder = self
            .db
            .get_reminder(id)
            .await?
            .ok_or(Error::Reminder(ReminderError::NotFound { id }))?;
        reminder.status = status;
        reminder.updated_at = self.clock.now();
        self.db.update_reminder(&reminder).await?;
        Ok(reminder)
    }

    /// Delete a reminder owned by `owner_id`.
    pub async fn delete(&self, owner_id: &str, id: Uuid) -> Result<()> {
        let reminder = self
            .db
            .get_reminder(id)
            .await?
            .filter(|r| r.owner_id == owner_id)
            .ok_or(Error::Reminder(ReminderError::NotFound { id }))?;
        self.db.delete_reminder(reminder.id).await?;
        debug!(reminder_id = %id, "Reminder deleted");
        Ok(())
    }

    /// All reminders for one owner.
    pub async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Reminder>> {
        Ok(self.db.list_reminders_for_owner(owner_id).await?)
    }

    /// Nightly bulk `sent → pending` for daily reminders.
    pub async fn reset_daily_to_pending(&self) -> Result<usize> {
        let count = self.db.reset_daily_reminders().await?;
        if count > 0 {
            info!(count, "Daily reminders reset to pending");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, FixedOffset, NaiveTime};

    use super::*;
    use crate::clock::ManualClock;
    use crate::meds::{Frequency, Medication};
    use crate::store::LibSqlBackend;

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    async fn setup(hour: u32, minute: u32) -> (ReminderStore, Uuid) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let med = Medication {
            id: Uuid::new_v4(),
            owner_id: "u1".into(),
            name: "Metformin".into(),
            dosage: "500 mg".into(),
            frequency: Frequency::Daily,
            times: vec![NaiveTime::from_hms_opt(8, 0, 0).unwrap()],
            start_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            end_date: None,
            notes: None,
            created_at: DateTime::parse_from_rfc3339("2024-03-01T08:00:00+00:00").unwrap(),
            updated_at: DateTime::parse_from_rfc3339("2024-03-01T08:00:00+00:00").unwrap(),
        };
        let med_id = med.id;
        db.insert_medication(&med).await.unwrap();

        let clock = Arc::new(ManualClock::at(
            offset(),
            today(),
            NaiveTime::from_hms_opt(hour, minute, 0).unwrap(),
        ));
        (ReminderStore::new(db, clock, Duration::hours(2)), med_id)
    }

    #[tokio::test]
    async fn creates_within_lead_window() {
        let (store, med_id) = setup(6, 0).await;
        let outcome = store
            .upsert("u1", med_id, 0, "07:30:00", "2024-03-10", "single")
            .await
            .unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.reminder.status, ReminderStatus::Pending);
        assert_eq!(
            outcome.reminder.time,
            NaiveTime::from_hms_opt(7, 30, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn accepts_window_bounds() {
        let (store, med_id) = setup(5, 0).await;
        // Exactly 2h before the dose, and exactly at the dose time.
        assert!(
            store
                .upsert("u1", med_id, 0, "06:00:00", "2024-03-10", "single")
                .await
                .unwrap()
                .created
        );
        store.delete("u1", store.list_for_owner("u1").await.unwrap()[0].id)
            .await
            .unwrap();
        assert!(
            store
                .upsert("u1", med_id, 0, "08:00:00", "2024-03-10", "single")
                .await
                .unwrap()
                .created
        );
    }

    #[tokio::test]
    async fn rejects_past_reminder() {
        let (store, med_id) = setup(7, 45).await;
        let err = store
            .upsert("u1", med_id, 0, "07:30:00", "2024-03-10", "single")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Reminder(ReminderError::PastReminder)));
    }

    #[tokio::test]
    async fn rejects_outside_window_today() {
        let (store, med_id) = setup(5, 0).await;

        // After the dose time
        let err = store
            .upsert("u1", med_id, 0, "08:30:00", "2024-03-10", "single")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Reminder(ReminderError::WindowViolation { .. })
        ));

        // More than 2h before the dose
        let err = store
            .upsert("u1", med_id, 0, "05:30:00", "2024-03-10", "single")
            .await
            .unwrap_err();
        match err {
            Error::Reminder(ReminderError::WindowViolation { earliest, latest }) => {
                assert_eq!(earliest, "06:00:00");
                assert_eq!(latest, "08:00:00");
            }
            other => panic!("expected WindowViolation, got {other}"),
        }
    }

    #[tokio::test]
    async fn future_date_waives_window() {
        let (store, med_id) = setup(5, 0).await;
        // 08:30 is after the dose time, but the date is strictly future.
        let outcome = store
            .upsert("u1", med_id, 0, "08:30:00", "2024-03-11", "single")
            .await
            .unwrap();
        assert!(outcome.created);
    }

    #[tokio::test]
    async fn same_kind_updates_in_place() {
        let (store, med_id) = setup(5, 0).await;
        let first = store
            .upsert("u1", med_id, 0, "07:00:00", "2024-03-10", "daily")
            .await
            .unwrap();
        assert!(first.created);

        let second = store
            .upsert("u1", med_id, 0, "07:30:00", "2024-03-10", "daily")
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.reminder.id, first.reminder.id);
        assert_eq!(
            second.reminder.time,
            NaiveTime::from_hms_opt(7, 30, 0).unwrap()
        );
        assert_eq!(store.list_for_owner("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn singles_on_distinct_dates_coexist() {
        let (store, med_id) = setup(5, 0).await;
        store
            .upsert("u1", med_id, 0, "07:00:00", "2024-03-10", "single")
            .await
            .unwrap();
        let other = store
            .upsert("u1", med_id, 0, "07:00:00", "2024-03-11", "single")
            .await
            .unwrap();
        assert!(other.created);
        assert_eq!(store.list_for_owner("u1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cross_kind_is_a_conflict() {
        let (store, med_id) = setup(5, 0).await;
        store
            .upsert("u1", med_id, 0, "07:00:00", "2024-03-10", "single")
            .await
            .unwrap();

        let err = store
            .upsert("u1", med_id, 0, "07:30:00", "2024-03-10", "daily")
            .await
            .unwrap_err();
        match err {
            Error::Reminder(ReminderError::TypeConflict { existing, requested }) => {
                assert_eq!(existing, "single");
                assert_eq!(requested, "daily");
            }
            other => panic!("expected TypeConflict, got {other}"),
        }
    }

    #[tokio::test]
    async fn rejects_malformed_input() {
        let (store, med_id) = setup(5, 0).await;
        for (time, date, kind) in [
            ("7:30", "2024-03-10", "single"),
            ("07:30:00", "03/10/2024", "single"),
            ("07:30:00", "2024-03-10", "hourly"),
        ] {
            let err = store
                .upsert("u1", med_id, 0, time, date, kind)
                .await
                .unwrap_err();
            assert!(
                matches!(err, Error::Reminder(ReminderError::InvalidFormat { .. })),
                "expected InvalidFormat for ({time}, {date}, {kind})"
            );
        }
    }

    #[tokio::test]
    async fn rejects_unknown_slot() {
        let (store, med_id) = setup(5, 0).await;

        let err = store
            .upsert("u1", med_id, 4, "07:30:00", "2024-03-10", "single")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Reminder(ReminderError::IndexOutOfRange { index: 4, count: 1 })
        ));

        let err = store
            .upsert("u2", med_id, 0, "07:30:00", "2024-03-10", "single")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Reminder(ReminderError::MedicationNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn update_status_roundtrip() {
        let (store, med_id) = setup(5, 0).await;
        let outcome = store
            .upsert("u1", med_id, 0, "07:30:00", "2024-03-10", "single")
            .await
            .unwrap();

        let updated = store
            .update_status(outcome.reminder.id, ReminderStatus::Sent)
            .await
            .unwrap();
        assert_eq!(updated.status, ReminderStatus::Sent);

        let err = store
            .update_status(Uuid::new_v4(), ReminderStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Reminder(ReminderError::NotFound { .. })));
    }

    #[tokio::test]
    async fn delete_requires_owner() {
        let (store, med_id) = setup(5, 0).await;
        let outcome = store
            .upsert("u1", med_id, 0, "07:30:00", "2024-03-10", "single")
            .await
            .unwrap();

        let err = store.delete("u2", outcome.reminder.id).await.unwrap_err();
        assert!(matches!(err, Error::Reminder(ReminderError::NotFound { .. })));

        store.delete("u1", outcome.reminder.id).await.unwrap();
        assert!(store.list_for_owner("u1").await.unwrap().is_empty());
    }
}
