use std::collections::BTreeSet;

use anyhow::{bail, Result};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Working hours, working days, and holidays for one SLA policy.
///
/// All date and weekday decisions are made after shifting instants into the
/// calendar's fixed UTC offset, so a policy for a Sydney client and one for a
/// Denver client can disagree about which day it is. Holidays are date-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessCalendar {
    /// Hour of day work opens (0-23).
    pub hours_start: u32,
    /// Hour of day work closes (0-23, strictly after `hours_start`).
    pub hours_end: u32,
    /// ISO weekday numbers, 1 = Monday .. 7 = Sunday.
    pub working_weekdays: BTreeSet<u8>,
    pub holidays: BTreeSet<NaiveDate>,
    /// Offset from UTC in minutes, east positive.
    pub utc_offset_minutes: i32,
}

impl BusinessCalendar {
    pub fn new(
        hours_start: u32,
        hours_end: u32,
        working_weekdays: BTreeSet<u8>,
        holidays: BTreeSet<NaiveDate>,
        utc_offset_minutes: i32,
    ) -> Result<Self> {
        if hours_start > 23 || hours_end > 23 {
            bail!("Business hours must be within 0-23");
        }
        if hours_end <= hours_start {
            bail!(
                "hours_end ({}) must be after hours_start ({})",
                hours_end,
                hours_start
            );
        }
        if working_weekdays.is_empty() {
            bail!("At least one working weekday is required");
        }
        if let Some(&day) = working_weekdays.iter().find(|&&d| d < 1 || d > 7) {
            bail!("Invalid weekday number {} (expected 1-7, 1 = Monday)", day);
        }
        if FixedOffset::east_opt(utc_offset_minutes * 60).is_none() {
            bail!("Invalid UTC offset: {} minutes", utc_offset_minutes);
        }
        Ok(Self {
            hours_start,
            hours_end,
            working_weekdays,
            holidays,
            utc_offset_minutes,
        })
    }

    /// Nine to five, Monday through Friday, no holidays, UTC.
    pub fn standard() -> Self {
        Self {
            hours_start: 9,
            hours_end: 17,
            working_weekdays: (1..=5).collect(),
            holidays: BTreeSet::new(),
            utc_offset_minutes: 0,
        }
    }

    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"))
    }

    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        let weekday = date.weekday().number_from_monday() as u8;
        self.working_weekdays.contains(&weekday) && !self.holidays.contains(&date)
    }

    /// Local instant at `hour` on `date` in this calendar's offset.
    fn at_hour(&self, date: NaiveDate, hour: u32) -> DateTime<FixedOffset> {
        let tz = self.offset();
        let local = date
            .and_hms_opt(hour, 0, 0)
            .unwrap_or_else(|| date.and_time(chrono::NaiveTime::MIN));
        let utc_naive = local - Duration::seconds(tz.local_minus_utc() as i64);
        DateTime::from_naive_utc_and_offset(utc_naive, tz)
    }

    fn day_open(&self, date: NaiveDate) -> DateTime<FixedOffset> {
        self.at_hour(date, self.hours_start)
    }

    fn day_close(&self, date: NaiveDate) -> DateTime<FixedOffset> {
        self.at_hour(date, self.hours_end)
    }
}

// A calendar whose holidays blot out ten years of working days is a data
// entry error, not a deadline.
const MAX_WALK_DAYS: u32 = 3660;

const EPSILON_HOURS: f64 = 1e-9;

/// Add `hours` of business time to `start`, skipping non-working time.
///
/// Walks forward one working day at a time, consuming whatever fits between
/// the cursor and that day's close. Fractional hours are honoured to the
/// second. `hours <= 0` returns `start` unchanged, with no clamping into the
/// business window.
pub fn compute_deadline(
    start: DateTime<Utc>,
    hours: f64,
    calendar: &BusinessCalendar,
) -> DateTime<Utc> {
    if hours <= 0.0 {
        return start;
    }

    let mut cursor = start.with_timezone(&calendar.offset());
    let mut remaining = hours;
    let mut walked = 0u32;

    loop {
        let date = cursor.date_naive();

        if walked > MAX_WALK_DAYS {
            tracing::warn!(
                %start,
                hours,
                "deadline walk exceeded {} days; calendar has no reachable working time",
                MAX_WALK_DAYS
            );
            return cursor.with_timezone(&Utc);
        }

        if !calendar.is_working_day(date) {
            cursor = calendar.day_open(next_date(date));
            walked += 1;
            continue;
        }

        let open = calendar.day_open(date);
        let close = calendar.day_close(date);

        if cursor < open {
            // Same working day, before opening: no hours consumed.
            cursor = open;
            continue;
        }
        if cursor >= close {
            cursor = calendar.day_open(next_date(date));
            walked += 1;
            continue;
        }

        let available = (close - cursor).num_seconds() as f64 / 3600.0;
        let consumed = remaining.min(available);
        cursor += Duration::seconds((consumed * 3600.0).round() as i64);
        remaining -= consumed;

        if remaining <= EPSILON_HOURS {
            return cursor.with_timezone(&Utc);
        }

        cursor = calendar.day_open(next_date(cursor.date_naive()));
        walked += 1;
    }
}

fn next_date(date: NaiveDate) -> NaiveDate {
    date.succ_opt().unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn standard() -> BusinessCalendar {
        BusinessCalendar::standard()
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    // 2026-01-05 is a Monday.

    #[test]
    fn zero_hours_returns_start_unchanged() {
        let cal = standard();
        // Saturday, well outside business hours: still returned verbatim.
        let start = utc(2026, 1, 3, 22, 30);
        assert_eq!(compute_deadline(start, 0.0, &cal), start);
    }

    #[test]
    fn spills_into_next_working_day() {
        let cal = standard();
        // Monday 10:00 + 10h: 7h to close, 3h from Tuesday 09:00.
        let start = utc(2026, 1, 5, 10, 0);
        assert_eq!(compute_deadline(start, 10.0, &cal), utc(2026, 1, 6, 12, 0));
    }

    #[test]
    fn skips_weekend() {
        let cal = standard();
        // Friday 16:00 + 2h: 1h to close, 1h from Monday 09:00.
        let start = utc(2026, 1, 9, 16, 0);
        assert_eq!(compute_deadline(start, 2.0, &cal), utc(2026, 1, 12, 10, 0));
    }

    #[test]
    fn clamps_before_hours_without_consuming() {
        let cal = standard();
        // Monday 06:30: the clock starts at 09:00.
        let start = utc(2026, 1, 5, 6, 30);
        assert_eq!(compute_deadline(start, 2.0, &cal), utc(2026, 1, 5, 11, 0));
    }

    #[test]
    fn rolls_after_hours_to_next_day() {
        let cal = standard();
        // Monday 18:00 is past close; work starts Tuesday 09:00.
        let start = utc(2026, 1, 5, 18, 0);
        assert_eq!(compute_deadline(start, 1.0, &cal), utc(2026, 1, 6, 10, 0));
    }

    #[test]
    fn skips_holidays() {
        let mut cal = standard();
        cal.holidays
            .insert(NaiveDate::from_ymd_opt(2026, 1, 6).unwrap());
        // Monday 16:00 + 2h: 1h Monday, Tuesday is a holiday, 1h Wednesday.
        let start = utc(2026, 1, 5, 16, 0);
        assert_eq!(compute_deadline(start, 2.0, &cal), utc(2026, 1, 7, 10, 0));
    }

    #[test]
    fn fractional_hours() {
        let cal = standard();
        let start = utc(2026, 1, 5, 10, 0);
        assert_eq!(
            compute_deadline(start, 1.5, &cal),
            utc(2026, 1, 5, 11, 30)
        );
    }

    #[test]
    fn honours_utc_offset() {
        let mut cal = standard();
        cal.utc_offset_minutes = 600; // UTC+10
        // 23:00 UTC Sunday is 09:00 Monday local; two local business hours.
        let start = utc(2026, 1, 4, 23, 0);
        assert_eq!(compute_deadline(start, 2.0, &cal), utc(2026, 1, 5, 1, 0));
    }

    #[test]
    fn multi_day_budget() {
        let cal = standard();
        // Monday 09:00 + 24h = three full 8h days, ending Wednesday 17:00.
        let start = utc(2026, 1, 5, 9, 0);
        assert_eq!(compute_deadline(start, 24.0, &cal), utc(2026, 1, 7, 17, 0));
    }

    #[test]
    fn rejects_inverted_hours() {
        assert!(BusinessCalendar::new(17, 9, (1..=5).collect(), BTreeSet::new(), 0).is_err());
        assert!(BusinessCalendar::new(9, 9, (1..=5).collect(), BTreeSet::new(), 0).is_err());
    }

    #[test]
    fn rejects_empty_working_week() {
        assert!(BusinessCalendar::new(9, 17, BTreeSet::new(), BTreeSet::new(), 0).is_err());
    }

    #[test]
    fn rejects_bad_weekday_numbers() {
        let days: BTreeSet<u8> = [0, 1, 2].into_iter().collect();
        assert!(BusinessCalendar::new(9, 17, days, BTreeSet::new(), 0).is_err());
    }

    proptest! {
        // A positive budget always lands on a working day, inside the
        // business window (inclusive of close: a budget that exactly fills
        // the day ends at closing time).
        #[test]
        fn deadline_lands_in_business_window(
            start_day in 0i64..365,
            start_minute in 0i64..1440,
            hours in 0.1f64..80.0,
        ) {
            let cal = standard();
            let base = utc(2026, 1, 1, 0, 0);
            let start = base + Duration::days(start_day) + Duration::minutes(start_minute);
            let deadline = compute_deadline(start, hours, &cal);
            let local = deadline.with_timezone(&cal.offset());

            prop_assert!(cal.is_working_day(local.date_naive()));

            let open = local.date_naive().and_hms_opt(cal.hours_start, 0, 0).unwrap();
            let close = local.date_naive().and_hms_opt(cal.hours_end, 0, 0).unwrap();
            prop_assert!(local.naive_local() >= open);
            prop_assert!(local.naive_local() <= close);
        }

        #[test]
        fn deadline_never_precedes_start(
            start_minute in 0i64..525_600,
            hours in 0.0f64..80.0,
        ) {
            let cal = standard();
            let start = utc(2026, 1, 1, 0, 0) + Duration::minutes(start_minute);
            prop_assert!(compute_deadline(start, hours, &cal) >= start);
        }
    }
}
