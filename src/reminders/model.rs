//! Reminder types.
//!
//! A reminder targets one dose slot (medication + dose index). Single
//! reminders fire once on their anchor date and are terminal afterwards.
//! Daily reminders recur every day at the same time-of-day; their
//! idempotence is keyed on `last_fired_on` rather than the binary status,
//! so a missed or doubled midnight reset can never re-fire or suppress an
//! occurrence.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Single-shot or daily recurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    Single,
    Daily,
}

impl ReminderKind {
    /// The string tag stored in the DB kind column.
    pub fn type_tag(&self) -> &'static str {
        match self {
            ReminderKind::Single => "single",
            ReminderKind::Daily => "daily",
        }
    }
}

impl fmt::Display for ReminderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_tag())
    }
}

impl FromStr for ReminderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(ReminderKind::Single),
            "daily" => Ok(ReminderKind::Daily),
            other => Err(format!("unknown reminder type: {other}")),
        }
    }
}

/// Pending/sent lifecycle status.
///
/// Terminal for single reminders once sent. For daily reminders this is
/// display state ("sent today"); the nightly reset flips it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    Pending,
    Sent,
}

impl ReminderStatus {
    pub fn type_tag(&self) -> &'static str {
        match self {
            ReminderStatus::Pending => "pending",
            ReminderStatus::Sent => "sent",
        }
    }
}

impl fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_tag())
    }
}

impl FromStr for ReminderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReminderStatus::Pending),
            "sent" => Ok(ReminderStatus::Sent),
            other => Err(format!("unknown reminder status: {other}")),
        }
    }
}

/// A scheduled reminder for one dose slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub owner_id: String,
    pub medication_id: Uuid,
    pub dose_index: usize,
    /// Time-of-day the reminder fires.
    pub time: NaiveTime,
    /// Anchor date. Used verbatim for single reminders; for daily ones it
    /// only records when the reminder was created.
    pub date: NaiveDate,
    pub kind: ReminderKind,
    pub status: ReminderStatus,
    /// Last calendar date this reminder fired on. Authoritative recurrence
    /// guard for daily reminders.
    pub last_fired_on: Option<NaiveDate>,
    pub created_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
}

impl Reminder {
    /// The date this reminder would fire on, seen from `today`.
    ///
    /// Daily reminders always resolve to today; single reminders resolve
    /// to their own anchor date.
    pub fn effective_date(&self, today: NaiveDate) -> NaiveDate {
        match self.kind {
            ReminderKind::Daily => today,
            ReminderKind::Single => self.date,
        }
    }
}
