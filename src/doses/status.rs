//! Pure dose-state evaluation. No I/O.
//!
//! Given a dose record, its anchor date, and "now", computes where the
//! dose sits relative to its action window. Callers always supply an
//! explicit dose index; nothing here guesses one from the time of day.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate};
use serde::Serialize;

use crate::clock::local_instant;
use crate::meds::DoseRecord;

/// Temporal state of one dose at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct DoseStatus {
    pub is_taken: bool,
    pub is_missed: bool,
    /// Anchor date + scheduled time-of-day, in the configured offset.
    pub scheduled_at: DateTime<FixedOffset>,
    pub window_start: DateTime<FixedOffset>,
    pub window_end: DateTime<FixedOffset>,
    /// now ∈ [window_start, window_end], inclusive both ends.
    pub is_within_window: bool,
    /// now ≥ scheduled_at.
    pub is_time_to_take: bool,
    /// Untaken, unmissed, inside the window, and the anchor date is today.
    pub can_take: bool,
}

/// Evaluate a dose record against `now`.
///
/// `action_window` is the half-width of the window (±2h by default policy).
pub fn evaluate(
    record: &DoseRecord,
    now: DateTime<FixedOffset>,
    action_window: Duration,
) -> DoseStatus {
    let scheduled_at = local_instant(*now.offset(), record.date, record.scheduled_time);
    let window_start = scheduled_at - action_window;
    let window_end = scheduled_at + action_window;

    let is_within_window = now >= window_start && now <= window_end;
    let is_time_to_take = now >= scheduled_at;
    let today = now.date_naive();
    let is_today = record.date == today;

    DoseStatus {
        is_taken: record.taken,
        is_missed: record.missed,
        scheduled_at,
        window_start,
        window_end,
        is_within_window,
        is_time_to_take,
        can_take: !record.taken && !record.missed && is_within_window && is_today,
    }
}

/// Whether the action window for `(date, time)` has fully elapsed at `now`.
///
/// This is the sweeper's eligibility test: strictly past `window_end`.
pub fn window_closed(
    date: NaiveDate,
    scheduled_time: chrono::NaiveTime,
    now: DateTime<FixedOffset>,
    action_window: Duration,
) -> bool {
    let scheduled_at = local_instant(*now.offset(), date, scheduled_time);
    now > scheduled_at + action_window
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};
    use uuid::Uuid;

    use super::*;
    use crate::clock::local_instant;

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn record(date: NaiveDate, time: NaiveTime) -> DoseRecord {
        DoseRecord::new_default(Uuid::new_v4(), date, 0, time)
    }

    fn at(date: (i32, u32, u32), time: (u32, u32, u32)) -> DateTime<FixedOffset> {
        local_instant(
            offset(),
            NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            NaiveTime::from_hms_opt(time.0, time.1, time.2).unwrap(),
        )
    }

    fn window() -> Duration {
        Duration::hours(2)
    }

    #[test]
    fn within_window_bounds_inclusive() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let rec = record(date, NaiveTime::from_hms_opt(8, 0, 0).unwrap());

        // Exactly at window_start and window_end
        let start = evaluate(&rec, at((2024, 3, 10), (6, 0, 0)), window());
        assert!(start.is_within_window);
        assert!(!start.is_time_to_take);

        let end = evaluate(&rec, at((2024, 3, 10), (10, 0, 0)), window());
        assert!(end.is_within_window);
        assert!(end.is_time_to_take);

        // One second outside either bound
        let before = evaluate(&rec, at((2024, 3, 10), (5, 59, 59)), window());
        assert!(!before.is_within_window);

        let after = evaluate(&rec, at((2024, 3, 10), (10, 0, 1)), window());
        assert!(!after.is_within_window);
    }

    #[test]
    fn can_take_requires_anchor_date_today() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        // Late dose: 23:30, window stretches into the next day
        let rec = record(date, NaiveTime::from_hms_opt(23, 30, 0).unwrap());

        let same_day = evaluate(&rec, at((2024, 3, 10), (23, 45, 0)), window());
        assert!(same_day.can_take);

        // Still inside the ±2h window, but the calendar day has rolled over
        let next_day = evaluate(&rec, at((2024, 3, 11), (0, 30, 0)), window());
        assert!(next_day.is_within_window);
        assert!(!next_day.can_take);
    }

    #[test]
    fn taken_or_missed_blocks_can_take() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let now = at((2024, 3, 10), (8, 5, 0));

        let mut rec = record(date, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        rec.taken = true;
        let status = evaluate(&rec, now, window());
        assert!(status.is_taken);
        assert!(!status.can_take);

        rec.taken = false;
        rec.missed = true;
        let status = evaluate(&rec, now, window());
        assert!(status.is_missed);
        assert!(!status.can_take);
    }

    #[test]
    fn time_to_take_at_exact_schedule() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let rec = record(date, NaiveTime::from_hms_opt(8, 0, 0).unwrap());

        let status = evaluate(&rec, at((2024, 3, 10), (8, 0, 0)), window());
        assert!(status.is_time_to_take);
        assert!(status.can_take);
    }

    #[test]
    fn window_closed_is_strict() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let time = NaiveTime::from_hms_opt(8, 0, 0).unwrap();

        assert!(!window_closed(date, time, at((2024, 3, 10), (10, 0, 0)), window()));
        assert!(window_closed(date, time, at((2024, 3, 10), (10, 0, 1)), window()));
    }

    #[test]
    fn respects_configured_offset() {
        let offset = FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let rec = record(date, NaiveTime::from_hms_opt(8, 0, 0).unwrap());

        let now = local_instant(offset, date, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        let status = evaluate(&rec, now, window());
        assert_eq!(status.scheduled_at, now);
        assert!(status.can_take);
    }
}
