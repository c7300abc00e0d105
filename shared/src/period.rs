use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime};

use super::*;

pub const FOCUS_PERIOD_DAYS: i64 = 14;

/// Goals a member is nudged to reach during the first days of a period.
pub const MINIMUM_GOALS: usize = 3;

/// Period days (1-based) on which members with pending goals get a reminder.
pub const REMINDER_DAYS: [u32; 5] = [3, 7, 10, 12, 13];

/// Period days on which members below [`MINIMUM_GOALS`] get nudged.
pub const INSUFFICIENT_GOALS_DAYS: [u32; 2] = [2, 3];

pub fn start_of_day(moment: NaiveDateTime) -> NaiveDateTime {
    moment.date().and_time(NaiveTime::MIN)
}

/// Half-open `[start, end)` interval in server-local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Window {
    pub const fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    /// Two-week focus period starting at midnight of `now`'s day.
    pub fn focus_period(now: NaiveDateTime) -> Self {
        let start = start_of_day(now);
        Self {
            start,
            end: start + Duration::days(FOCUS_PERIOD_DAYS),
        }
    }

    /// Window of `days` days starting at midnight of `now`'s day, or `None`
    /// when the end is past the last representable date.
    pub fn days_from(now: NaiveDateTime, days: u32) -> Option<Self> {
        let start = start_of_day(now);
        let end = start.checked_add_signed(Duration::days(days as i64))?;
        Some(Self { start, end })
    }

    /// The calendar month before the one containing `now`.
    pub fn previous_month(now: NaiveDateTime) -> Option<Self> {
        let first_of_month = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)?;
        let first_of_previous = first_of_month.checked_sub_months(Months::new(1))?;
        Some(Self {
            start: first_of_previous.and_time(NaiveTime::MIN),
            end: first_of_month.and_time(NaiveTime::MIN),
        })
    }

    pub fn contains(&self, now: NaiveDateTime) -> bool {
        self.start <= now && now < self.end
    }

    pub fn has_ended(&self, now: NaiveDateTime) -> bool {
        now >= self.end
    }

    pub fn day_number(&self, now: NaiveDateTime) -> u32 {
        day_number(self.start, self.end, now)
    }

    pub fn days_remaining(&self, now: NaiveDateTime) -> u32 {
        days_remaining(self.end, now)
    }

    pub fn is_reminder_day(&self, now: NaiveDateTime) -> bool {
        REMINDER_DAYS.contains(&self.day_number(now))
    }
}

/// 1-based day of the window `now` falls on: 0 before the start, capped at
/// the window length once it is over.
pub fn day_number(start: NaiveDateTime, end: NaiveDateTime, now: NaiveDateTime) -> u32 {
    let elapsed = now - start;
    if elapsed < Duration::zero() {
        return 0;
    }
    let last_day = (end - start).num_days().max(0);
    let day = elapsed.num_hours() / 24 + 1;
    day.min(last_day) as u32
}

/// Whole days left until `end`, never negative.
pub fn days_remaining(end: NaiveDateTime, now: NaiveDateTime) -> u32 {
    let remaining = end - now;
    if remaining < Duration::zero() {
        return 0;
    }
    (remaining.num_hours() / 24) as u32
}
