//! Reminder scheduling engine.
//!
//! Runs on a fixed-interval tick. Each tick loads the reminders still in
//! play, resolves the instant each one would fire today, and dispatches the
//! ones whose instant is within the trigger tolerance of "now".
//!
//! Exactly-once firing does not rely on process memory: before dispatching,
//! the engine claims the fire with a conditional store update and only
//! proceeds when the update reports a changed row. Overlapping ticks,
//! restarts, and concurrent instances all race on that same row.

use std::sync::Arc;

use chrono::NaiveTime;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, local_instant};
use crate::config::SchedulerConfig;
use crate::notify::{Dispatcher, Notification};
use crate::reminders::model::{Reminder, ReminderKind};
use crate::reminders::store::ReminderStore;
use crate::store::Database;

/// The reminder scheduler.
pub struct ReminderEngine {
    db: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<Dispatcher>,
    config: SchedulerConfig,
}

impl ReminderEngine {
    pub fn new(
        db: Arc<dyn Database>,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<Dispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            db,
            clock,
            dispatcher,
            config,
        }
    }

    /// Evaluate every active reminder once. Returns the number dispatched.
    ///
    /// Per-reminder failures are logged and never abort the tick.
    pub async fn tick(&self) -> usize {
        let reminders = match self.db.list_active_reminders().await {
            Ok(r) => r,
            Err(e) => {
                error!("Failed to load reminders: {e}");
                return 0;
            }
        };

        let mut fired = 0;
        for reminder in reminders {
            match self.process_reminder(&reminder).await {
                Ok(true) => {
                    fired += 1;
                    // Pace consecutive dispatches for downstream rate limits.
                    if !self.config.dispatch_delay.is_zero() {
                        tokio::time::sleep(self.config.dispatch_delay).await;
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(reminder_id = %reminder.id, "Reminder processing failed: {e}");
                }
            }
        }

        if fired > 0 {
            info!(fired, "Reminder tick dispatched");
        }
        fired
    }

    /// Handle one reminder. Returns whether a notification was dispatched.
    async fn process_reminder(&self, reminder: &Reminder) -> crate::error::Result<bool> {
        let now = self.clock.now();
        let today = self.clock.today();

        // A daily reminder fires at most once per calendar date; a single
        // reminder only on its own date.
        match reminder.kind {
            ReminderKind::Daily => {
                if reminder.last_fired_on == Some(today) {
                    return Ok(false);
                }
            }
            ReminderKind::Single => {
                if reminder.date != today {
                    return Ok(false);
                }
            }
        }

        let trigger_at = local_instant(
            self.clock.offset(),
            reminder.effective_date(today),
            reminder.time,
        );
        let tolerance = self.config.trigger_tolerance_chrono();

        if now < trigger_at - tolerance {
            return Ok(false);
        }
        if now > trigger_at + tolerance {
            // The trigger window has fully elapsed; never fire late.
            debug!(reminder_id = %reminder.id, %trigger_at, "Trigger window elapsed, skipping");
            return Ok(false);
        }

        // Claim the fire. Losing the race means another tick or instance
        // already owns this occurrence.
        let claimed = match reminder.kind {
            ReminderKind::Single => self.db.claim_single_fire(reminder.id, today).await?,
            ReminderKind::Daily => self.db.claim_daily_fire(reminder.id, today).await?,
        };
        if !claimed {
            debug!(reminder_id = %reminder.id, "Fire already claimed");
            return Ok(false);
        }

        let delivered = self.dispatch(reminder).await;
        if !delivered && reminder.kind == ReminderKind::Single {
            // Re-arm so the next tick inside the trigger window can retry.
            self.db.release_single_fire(reminder.id).await?;
            return Ok(false);
        }
        Ok(delivered)
    }

    /// Build the payload and fan it out. Returns whether any channel
    /// delivered.
    async fn dispatch(&self, reminder: &Reminder) -> bool {
        let med = match self.db.get_medication(reminder.medication_id).await {
            Ok(Some(med)) => med,
            Ok(None) => {
                warn!(reminder_id = %reminder.id, "Reminder points at a deleted medication");
                return false;
            }
            Err(e) => {
                warn!(reminder_id = %reminder.id, "Failed to load medication: {e}");
                return false;
            }
        };

        let dose_time = med
            .scheduled_time(reminder.dose_index)
            .unwrap_or(reminder.time);

        let note = Notification {
            owner_id: reminder.owner_id.clone(),
            title: format!("Time for {}", med.name),
            body: format!(
                "{} ({}) is scheduled at {}. Reminder set for {}.",
                med.name,
                med.dosage,
                dose_time.format("%H:%M"),
                reminder.time.format("%H:%M"),
            ),
        };

        match self.dispatcher.dispatch(&note).await {
            Ok(outcome) => {
                if outcome.any_delivered() {
                    info!(
                        reminder_id = %reminder.id,
                        channels = ?outcome.delivered,
                        "Reminder dispatched"
                    );
                    true
                } else {
                    warn!(reminder_id = %reminder.id, "All notification channels failed");
                    false
                }
            }
            Err(e) => {
                warn!(reminder_id = %reminder.id, "Dispatch failed: {e}");
                false
            }
        }
    }
}

/// Spawn the engine tick loop.
pub fn spawn_ticker(
    engine: Arc<ReminderEngine>,
    interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            engine.tick().await;
        }
    })
}

/// Spawn the midnight reset loop: once per local-midnight boundary, flip
/// sent daily reminders back to pending.
pub fn spawn_midnight_reset(
    store: Arc<ReminderStore>,
    clock: Arc<dyn Clock>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = clock.now();
            let next_midnight = local_instant(
                clock.offset(),
                now.date_naive() + chrono::Duration::days(1),
                NaiveTime::MIN,
            );
            let until = (next_midnight - now)
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(60));
            tokio::time::sleep(until).await;

            if let Err(e) = store.reset_daily_to_pending().await {
                error!("Midnight reset failed: {e}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, FixedOffset, NaiveDate};
    use uuid::Uuid;

    use super::*;
    use crate::clock::ManualClock;
    use crate::error::DispatchError;
    use crate::meds::{Frequency, Medication};
    use crate::notify::Notifier;
    use crate::reminders::model::ReminderStatus;
    use crate::store::LibSqlBackend;

    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
        fail: bool,
    }

    impl RecordingNotifier {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail,
            })
        }

        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, note: &Notification) -> Result<(), DispatchError> {
            if self.fail {
                return Err(DispatchError::ChannelFailed {
                    channel: "recording".into(),
                    reason: "forced failure".into(),
                });
            }
            self.sent.lock().unwrap().push(note.clone());
            Ok(())
        }
    }

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    fn test_config() -> SchedulerConfig {
        SchedulerConfig {
            dispatch_delay: StdDuration::ZERO,
            ..SchedulerConfig::default()
        }
    }

    struct Harness {
        db: Arc<LibSqlBackend>,
        clock: Arc<ManualClock>,
        notifier: Arc<RecordingNotifier>,
        engine: ReminderEngine,
        med_id: Uuid,
    }

    async fn setup(fail_dispatch: bool) -> Harness {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let med = Medication {
            id: Uuid::new_v4(),
            owner_id: "u1".into(),
            name: "Metformin".into(),
            dosage: "500 mg".into(),
            frequency: Frequency::Daily,
            times: vec![chrono::NaiveTime::from_hms_opt(8, 0, 0).unwrap()],
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
            chrono::NaiveTime::from_hms_opt(7, 30, 10).unwrap(),
        ));
        let notifier = RecordingNotifier::new(fail_dispatch);
        let dispatcher = Arc::new(Dispatcher::new(
            vec![notifier.clone()],
            StdDuration::from_secs(1),
        ));
        let engine = ReminderEngine::new(db.clone(), clock.clone(), dispatcher, test_config());

        Harness {
            db,
            clock,
            notifier,
            engine,
            med_id,
        }
    }

    fn reminder(med_id: Uuid, kind: ReminderKind, date: NaiveDate) -> Reminder {
        Reminder {
            id: Uuid::new_v4(),
            owner_id: "u1".into(),
            medication_id: med_id,
            dose_index: 0,
            time: chrono::NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
            date,
            kind,
            status: ReminderStatus::Pending,
            last_fired_on: None,
            created_at: DateTime::parse_from_rfc3339("2024-03-01T08:00:00+00:00").unwrap(),
            updated_at: DateTime::parse_from_rfc3339("2024-03-01T08:00:00+00:00").unwrap(),
        }
    }

    #[tokio::test]
    async fn single_fires_exactly_once() {
        let h = setup(false).await;
        let rem = reminder(h.med_id, ReminderKind::Single, today());
        h.db.insert_reminder(&rem).await.unwrap();

        // now = 07:30:10, inside the ±30s window around 07:30:00
        assert_eq!(h.engine.tick().await, 1);
        assert_eq!(h.notifier.count(), 1);

        // A second tick 10 seconds later, still inside the window
        h.clock.advance(Duration::seconds(10));
        assert_eq!(h.engine.tick().await, 0);
        assert_eq!(h.notifier.count(), 1);

        let stored = h.db.get_reminder(rem.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Sent);
    }

    #[tokio::test]
    async fn payload_names_the_medication() {
        let h = setup(false).await;
        let rem = reminder(h.med_id, ReminderKind::Single, today());
        h.db.insert_reminder(&rem).await.unwrap();

        h.engine.tick().await;
        let sent = h.notifier.sent.lock().unwrap();
        assert!(sent[0].title.contains("Metformin"));
        assert!(sent[0].body.contains("08:00"));
        assert!(sent[0].body.contains("07:30"));
    }

    #[tokio::test]
    async fn not_due_before_tolerance() {
        let h = setup(false).await;
        let rem = reminder(h.med_id, ReminderKind::Single, today());
        h.db.insert_reminder(&rem).await.unwrap();

        h.clock.set(local_instant(
            offset(),
            today(),
            chrono::NaiveTime::from_hms_opt(7, 29, 0).unwrap(),
        ));
        assert_eq!(h.engine.tick().await, 0);
        assert_eq!(h.notifier.count(), 0);
    }

    #[tokio::test]
    async fn elapsed_window_never_fires_late() {
        let h = setup(false).await;
        let rem = reminder(h.med_id, ReminderKind::Single, today());
        h.db.insert_reminder(&rem).await.unwrap();

        h.clock.set(local_instant(
            offset(),
            today(),
            chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        ));
        assert_eq!(h.engine.tick().await, 0);
        assert_eq!(h.notifier.count(), 0);

        let stored = h.db.get_reminder(rem.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Pending);
    }

    #[tokio::test]
    async fn future_single_does_not_fire_today() {
        let h = setup(false).await;
        let rem = reminder(
            h.med_id,
            ReminderKind::Single,
            today() + Duration::days(2),
        );
        h.db.insert_reminder(&rem).await.unwrap();

        assert_eq!(h.engine.tick().await, 0);
        assert_eq!(h.notifier.count(), 0);
    }

    #[tokio::test]
    async fn daily_fires_once_per_day_and_again_next_day() {
        let h = setup(false).await;
        let rem = reminder(h.med_id, ReminderKind::Daily, today());
        h.db.insert_reminder(&rem).await.unwrap();

        assert_eq!(h.engine.tick().await, 1);
        h.clock.advance(Duration::seconds(15));
        assert_eq!(h.engine.tick().await, 0);
        assert_eq!(h.notifier.count(), 1);

        // Next day, same time-of-day. No midnight reset has run; the
        // last-fired date alone re-arms the reminder.
        h.clock.set(local_instant(
            offset(),
            today() + Duration::days(1),
            chrono::NaiveTime::from_hms_opt(7, 30, 10).unwrap(),
        ));
        assert_eq!(h.engine.tick().await, 1);
        assert_eq!(h.notifier.count(), 2);
    }

    #[tokio::test]
    async fn daily_does_not_fire_twice_even_after_reset() {
        let h = setup(false).await;
        let rem = reminder(h.med_id, ReminderKind::Daily, today());
        h.db.insert_reminder(&rem).await.unwrap();

        assert_eq!(h.engine.tick().await, 1);

        // A midnight reset running early (or twice) flips the status, but
        // last_fired_on still blocks a same-day re-fire.
        h.db.reset_daily_reminders().await.unwrap();
        h.clock.advance(Duration::seconds(15));
        assert_eq!(h.engine.tick().await, 0);
        assert_eq!(h.notifier.count(), 1);
    }

    #[tokio::test]
    async fn failed_dispatch_rearms_single() {
        let h = setup(true).await;
        let rem = reminder(h.med_id, ReminderKind::Single, today());
        h.db.insert_reminder(&rem).await.unwrap();

        assert_eq!(h.engine.tick().await, 0);
        assert_eq!(h.notifier.count(), 0);

        // Still pending: the claim was rolled back for an in-window retry.
        let stored = h.db.get_reminder(rem.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReminderStatus::Pending);

        // A healthy dispatcher on the next tick delivers it.
        let ok_notifier = RecordingNotifier::new(false);
        let engine = ReminderEngine::new(
            h.db.clone(),
            h.clock.clone(),
            Arc::new(Dispatcher::new(
                vec![ok_notifier.clone()],
                StdDuration::from_secs(1),
            )),
            test_config(),
        );
        h.clock.advance(Duration::seconds(10));
        assert_eq!(engine.tick().await, 1);
        assert_eq!(ok_notifier.count(), 1);
    }
}
