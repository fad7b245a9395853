//! Core types for the medication aggregate.
//!
//! A medication owns its per-date dose records and its reminders; deleting
//! the medication removes both. `times` is the ordered list of daily
//! dose times-of-day, one entry per dose index.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DoseError;

/// How often the medication repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    /// The string tag stored in the DB frequency column.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_tag())
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            other => Err(format!("unknown frequency: {other}")),
        }
    }
}

/// A tracked medication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Medication {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    /// Free-text dosage ("10 mg", "2 tablets").
    pub dosage: String,
    pub frequency: Frequency,
    /// Ordered daily dose times; the dose index is the position here.
    pub times: Vec<NaiveTime>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub created_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
}

impl Medication {
    /// Number of doses per day.
    pub fn times_per_day(&self) -> usize {
        self.times.len()
    }

    /// Scheduled time-of-day for a dose index, if in range.
    pub fn scheduled_time(&self, dose_index: usize) -> Option<NaiveTime> {
        self.times.get(dose_index).copied()
    }

    /// Whether any dose of this medication is due on `date`.
    ///
    /// Weekly medications recur on the start date's weekday; monthly ones
    /// on the start date's day-of-month.
    pub fn is_scheduled_on(&self, date: NaiveDate) -> bool {
        if date < self.start_date {
            return false;
        }
        if let Some(end) = self.end_date
            && date > end
        {
            return false;
        }
        match self.frequency {
            Frequency::Daily => true,
            Frequency::Weekly => date.weekday() == self.start_date.weekday(),
            Frequency::Monthly => date.day() == self.start_date.day(),
        }
    }
}

/// Input for creating a medication, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMedication {
    pub owner_id: String,
    pub name: String,
    pub dosage: String,
    pub frequency: Frequency,
    /// `HH:MM:SS` times-of-day, one per daily dose.
    pub times: Vec<String>,
    /// `YYYY-MM-DD`.
    pub start_date: String,
    pub end_date: Option<String>,
    pub notes: Option<String>,
}

impl NewMedication {
    /// Validate and build a `Medication`.
    pub fn into_medication(self, now: DateTime<FixedOffset>) -> Result<Medication, DoseError> {
        if self.name.trim().is_empty() {
            return Err(DoseError::Validation("medication name is required".into()));
        }
        if self.times.is_empty() {
            return Err(DoseError::Validation(
                "at least one dose time is required".into(),
            ));
        }

        let times = self
            .times
            .iter()
            .map(|raw| parse_time(raw))
            .collect::<Result<Vec<_>, _>>()?;

        let start_date = parse_date(&self.start_date)?;
        let end_date = self.end_date.as_deref().map(parse_date).transpose()?;
        if let Some(end) = end_date
            && end < start_date
        {
            return Err(DoseError::Validation(
                "end_date must not be before start_date".into(),
            ));
        }

        Ok(Medication {
            id: Uuid::new_v4(),
            owner_id: self.owner_id,
            name: self.name.trim().to_string(),
            dosage: self.dosage,
            frequency: self.frequency,
            times,
            start_date,
            end_date,
            notes: self.notes,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Parse a strict `HH:MM:SS` time-of-day.
pub fn parse_time(raw: &str) -> Result<NaiveTime, DoseError> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .map_err(|_| DoseError::Validation(format!("invalid time '{raw}', expected HH:MM:SS")))
}

/// Parse a strict `YYYY-MM-DD` date.
pub fn parse_date(raw: &str) -> Result<NaiveDate, DoseError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| DoseError::Validation(format!("invalid date '{raw}', expected YYYY-MM-DD")))
}

/// One scheduled dose occurrence on a calendar date.
///
/// Keyed by (medication id, date, dose index). `taken` and `missed` are
/// mutually exclusive; `taken_at` is set iff `taken`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoseRecord {
    pub medication_id: Uuid,
    pub date: NaiveDate,
    pub dose_index: usize,
    /// Copied from `medication.times[dose_index]` at creation.
    pub scheduled_time: NaiveTime,
    pub taken: bool,
    pub missed: bool,
    pub taken_at: Option<DateTime<FixedOffset>>,
}

impl DoseRecord {
    /// Default (untaken, unmissed) record for a dose slot.
    pub fn new_default(
        medication_id: Uuid,
        date: NaiveDate,
        dose_index: usize,
        scheduled_time: NaiveTime,
    ) -> Self {
        Self {
            medication_id,
            date,
            dose_index,
            scheduled_time,
            taken: false,
            missed: false,
            taken_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_medication(frequency: Frequency, start: NaiveDate) -> Medication {
        Medication {
            id: Uuid::new_v4(),
            owner_id: "u1".into(),
            name: "Metformin".into(),
            dosage: "500 mg".into(),
            frequency,
            times: vec![NaiveTime::from_hms_opt(8, 0, 0).unwrap()],
            start_date: start,
            end_date: None,
            notes: None,
            created_at: DateTime::parse_from_rfc3339("2024-01-01T00:00:00+00:00").unwrap(),
            updated_at: DateTime::parse_from_rfc3339("2024-01-01T00:00:00+00:00").unwrap(),
        }
    }

    #[test]
    fn frequency_display_parse() {
        for freq in [Frequency::Daily, Frequency::Weekly, Frequency::Monthly] {
            let parsed: Frequency = freq.to_string().parse().unwrap();
            assert_eq!(parsed, freq);
        }
        assert!("hourly".parse::<Frequency>().is_err());
    }

    #[test]
    fn parse_time_strict() {
        assert!(parse_time("08:00:00").is_ok());
        assert!(parse_time("8:00").is_err());
        assert!(parse_time("25:00:00").is_err());
        assert!(parse_time("").is_err());
    }

    #[test]
    fn daily_scheduled_every_day_in_range() {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut med = base_medication(Frequency::Daily, start);
        med.end_date = NaiveDate::from_ymd_opt(2024, 3, 31);

        assert!(med.is_scheduled_on(start));
        assert!(med.is_scheduled_on(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()));
        assert!(!med.is_scheduled_on(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()));
        assert!(!med.is_scheduled_on(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()));
    }

    #[test]
    fn weekly_scheduled_on_start_weekday() {
        // 2024-03-04 is a Monday
        let start = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let med = base_medication(Frequency::Weekly, start);

        assert!(med.is_scheduled_on(NaiveDate::from_ymd_opt(2024, 3, 11).unwrap()));
        assert!(!med.is_scheduled_on(NaiveDate::from_ymd_opt(2024, 3, 12).unwrap()));
    }

    #[test]
    fn monthly_scheduled_on_start_day() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let med = base_medication(Frequency::Monthly, start);

        assert!(med.is_scheduled_on(NaiveDate::from_ymd_opt(2024, 2, 15).unwrap()));
        assert!(!med.is_scheduled_on(NaiveDate::from_ymd_opt(2024, 2, 16).unwrap()));
    }

    #[test]
    fn new_medication_validation() {
        let now = DateTime::parse_from_rfc3339("2024-03-01T09:00:00+00:00").unwrap();
        let input = NewMedication {
            owner_id: "u1".into(),
            name: "Lisinopril".into(),
            dosage: "10 mg".into(),
            frequency: Frequency::Daily,
            times: vec!["08:00:00".into(), "20:00:00".into()],
            start_date: "2024-03-01".into(),
            end_date: None,
            notes: None,
        };

        let med = input.into_medication(now).unwrap();
        assert_eq!(med.times_per_day(), 2);
        assert_eq!(
            med.scheduled_time(1),
            NaiveTime::from_hms_opt(20, 0, 0)
        );
        assert!(med.scheduled_time(2).is_none());
    }

    #[test]
    fn new_medication_rejects_bad_input() {
        let now = DateTime::parse_from_rfc3339("2024-03-01T09:00:00+00:00").unwrap();
        let base = NewMedication {
            owner_id: "u1".into(),
            name: "Lisinopril".into(),
            dosage: "10 mg".into(),
            frequency: Frequency::Daily,
            times: vec!["08:00:00".into()],
            start_date: "2024-03-01".into(),
            end_date: None,
            notes: None,
        };

        let mut no_name = base.clone();
        no_name.name = "  ".into();
        assert!(no_name.into_medication(now).is_err());

        let mut no_times = base.clone();
        no_times.times.clear();
        assert!(no_times.into_medication(now).is_err());

        let mut bad_time = base.clone();
        bad_time.times = vec!["8am".into()];
        assert!(bad_time.into_medication(now).is_err());

        let mut bad_range = base;
        bad_range.end_date = Some("2024-02-01".into());
        assert!(bad_range.into_medication(now).is_err());
    }
}
