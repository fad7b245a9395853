//! Missed-dose sweeper.
//!
//! Periodically walks today's doses for every medication and marks the
//! ones whose action window has closed without being taken. Runs through
//! the same `DoseStore` mutations as the API, so it takes the same
//! per-medication locks and can never race a concurrent take.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::doses::status;
use crate::doses::store::DoseStore;
use crate::store::Database;

/// Marks overdue doses missed.
pub struct MissedDoseSweeper {
    db: Arc<dyn Database>,
    doses: Arc<DoseStore>,
    clock: Arc<dyn Clock>,
}

impl MissedDoseSweeper {
    pub fn new(db: Arc<dyn Database>, doses: Arc<DoseStore>, clock: Arc<dyn Clock>) -> Self {
        Self { db, doses, clock }
    }

    /// One pass over today's doses. Returns how many were marked missed.
    ///
    /// Per-medication failures are logged and do not abort the pass.
    pub async fn sweep(&self) -> usize {
        let meds = match self.db.list_medications().await {
            Ok(meds) => meds,
            Err(e) => {
                error!("Failed to load medications for sweep: {e}");
                return 0;
            }
        };

        let today = self.clock.today();
        let now = self.clock.now();
        let window = self.doses.action_window();
        let mut marked = 0;

        for med in meds {
            if !med.is_scheduled_on(today) {
                continue;
            }

            let records = match self.doses.get_or_init(med.id, today).await {
                Ok(records) => records,
                Err(e) => {
                    error!(medication_id = %med.id, "Sweep failed to load doses: {e}");
                    continue;
                }
            };

            for record in records {
                if record.taken || record.missed {
                    continue;
                }
                if !status::window_closed(record.date, record.scheduled_time, now, window) {
                    continue;
                }

                match self
                    .doses
                    .set_missed(med.id, today, record.dose_index, true)
                    .await
                {
                    Ok(_) => {
                        debug!(
                            medication_id = %med.id,
                            dose_index = record.dose_index,
                            "Dose marked missed"
                        );
                        marked += 1;
                    }
                    Err(e) => {
                        error!(
                            medication_id = %med.id,
                            dose_index = record.dose_index,
                            "Failed to mark dose missed: {e}"
                        );
                    }
                }
            }
        }

        if marked > 0 {
            info!(count = marked, "Missed doses swept");
        }
        marked
    }
}

/// Spawn a background task that periodically sweeps for missed doses.
pub fn spawn_sweeper(
    sweeper: Arc<MissedDoseSweeper>,
    interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            sweeper.sweep().await;
        }
    })
}
