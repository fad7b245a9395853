//! Reminders — model, store, and the scheduling engine.

pub mod engine;
pub mod model;
pub mod store;

pub use engine::{ReminderEngine, spawn_midnight_reset, spawn_ticker};
pub use model::{Reminder, ReminderKind, ReminderStatus};
pub use store::{ReminderStore, UpsertOutcome};
