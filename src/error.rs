//! Error types for MedTrack.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate};
use uuid::Uuid;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Dose error: {0}")]
    Dose(#[from] DoseError),

    #[error("Reminder error: {0}")]
    Reminder(#[from] ReminderError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Persistence-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Dose state-transition errors.
#[derive(Debug, thiserror::Error)]
pub enum DoseError {
    #[error("Medication {id} not found")]
    MedicationNotFound { id: Uuid },

    #[error("Dose index {index} out of range: medication has {count} daily doses")]
    IndexOutOfRange { index: usize, count: usize },

    #[error(
        "Dose scheduled at {scheduled} can only be taken between {window_start} and {window_end}"
    )]
    OutOfWindow {
        scheduled: DateTime<FixedOffset>,
        window_start: DateTime<FixedOffset>,
        window_end: DateTime<FixedOffset>,
    },

    #[error("Medication {id} is not scheduled on {date}")]
    NotScheduled { id: Uuid, date: NaiveDate },

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Reminder scheduling errors.
#[derive(Debug, thiserror::Error)]
pub enum ReminderError {
    #[error("Reminder {id} not found")]
    NotFound { id: Uuid },

    #[error("Medication {id} not found")]
    MedicationNotFound { id: Uuid },

    #[error("Dose index {index} out of range: medication has {count} daily doses")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("Reminder time is in the past; pick a future time or a future date")]
    PastReminder,

    #[error(
        "Reminder must fall between {earliest} and {latest} (up to 2 hours before the dose); \
         only future dates may schedule outside this window"
    )]
    WindowViolation { earliest: String, latest: String },

    #[error(
        "A {existing} reminder already exists for this dose; delete it before adding a {requested} one"
    )]
    TypeConflict { existing: String, requested: String },

    #[error("Invalid {field}: {value}")]
    InvalidFormat { field: String, value: String },
}

/// Notification dispatch errors. Non-fatal to the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Channel {channel} failed: {reason}")]
    ChannelFailed { channel: String, reason: String },

    #[error("Channel {channel} timed out after {timeout:?}")]
    Timeout { channel: String, timeout: Duration },

    #[error("No notification channels configured")]
    NoChannels,
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
