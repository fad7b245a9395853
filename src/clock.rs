//! Clock capability — injectable "now" pinned to a configured UTC offset.
//!
//! All wall-clock reasoning (dose windows, reminder triggers, midnight
//! boundaries) goes through a `Clock` so the schedulers can be driven
//! deterministically in tests instead of depending on process time.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// Source of "now" for everything time-dependent.
pub trait Clock: Send + Sync {
    /// Current instant, expressed in the configured local offset.
    fn now(&self) -> DateTime<FixedOffset>;

    /// Current calendar date in the configured local offset.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// The configured local offset.
    fn offset(&self) -> FixedOffset;
}

/// Combine a local date and time-of-day into an instant at `offset`.
///
/// Fixed offsets have exactly one UTC instant per local datetime, so this
/// is plain arithmetic with no DST ambiguity.
pub fn local_instant(
    offset: FixedOffset,
    date: NaiveDate,
    time: NaiveTime,
) -> DateTime<FixedOffset> {
    let local: NaiveDateTime = date.and_time(time);
    let utc = local - Duration::seconds(i64::from(offset.local_minus_utc()));
    DateTime::from_naive_utc_and_offset(utc, offset)
}

/// Wall-clock system time at a fixed offset.
#[derive(Debug, Clone)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// System clock pinned to UTC.
    pub fn utc() -> Self {
        Self {
            offset: FixedOffset::east_opt(0).expect("zero offset is representable"),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

/// Settable clock for deterministic tests.
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<FixedOffset>>,
}

impl ManualClock {
    pub fn new(now: DateTime<FixedOffset>) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    /// Build from a local date, time-of-day, and offset.
    pub fn at(offset: FixedOffset, date: NaiveDate, time: NaiveTime) -> Self {
        Self::new(local_instant(offset, date, time))
    }

    /// Jump to a new instant.
    pub fn set(&self, now: DateTime<FixedOffset>) {
        *self.now.lock().expect("clock lock poisoned") = now;
    }

    /// Move forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<FixedOffset> {
        *self.now.lock().expect("clock lock poisoned")
    }

    fn offset(&self) -> FixedOffset {
        self.now.lock().expect("clock lock poisoned").offset().to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offset_east(hours: i32) -> FixedOffset {
        FixedOffset::east_opt(hours * 3600).unwrap()
    }

    #[test]
    fn local_instant_applies_offset() {
        let offset = offset_east(2);
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let time = NaiveTime::from_hms_opt(8, 0, 0).unwrap();

        let instant = local_instant(offset, date, time);
        assert_eq!(instant.to_rfc3339(), "2024-03-10T08:00:00+02:00");
        assert_eq!(
            instant.with_timezone(&Utc).to_rfc3339(),
            "2024-03-10T06:00:00+00:00"
        );
    }

    #[test]
    fn manual_clock_advance() {
        let clock = ManualClock::at(
            offset_east(0),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        );
        clock.advance(Duration::minutes(90));
        assert_eq!(clock.now().time(), NaiveTime::from_hms_opt(13, 30, 0).unwrap());
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[test]
    fn manual_clock_crosses_midnight() {
        let clock = ManualClock::at(
            offset_east(0),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveTime::from_hms_opt(23, 30, 0).unwrap(),
        );
        clock.advance(Duration::hours(1));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
    }
}
