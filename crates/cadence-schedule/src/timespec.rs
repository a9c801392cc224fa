//! Calendar matching for multi-field recurrence rules.
//!
//! A [`TimeSpec`] is a set of allowed months, days, and times of day. Days
//! are either explicit month-days (with a `last` token) or ordinal weekdays
//! such as "2nd Tuesday". Matching walks forward month by month in the
//! rule's time zone and returns the first candidate strictly after the
//! reference instant.

use std::collections::BTreeSet;

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike, Utc,
};
use chrono_tz::Tz;
use tracing::debug;

/// Months searched before a rule is declared unsatisfiable (one Gregorian cycle).
const MAX_MONTHS_SEARCHED: u32 = 400 * 12;

/// Longest spring-forward gap probed when a wall-clock time does not exist.
const MAX_GAP_MINUTES: i64 = 24 * 60;

/// A day of the month, or the last day of whichever month is being matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MonthDay {
    Day(u32),
    Last,
}

/// Which occurrence of a weekday within a month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Ordinal {
    /// 1st through 5th occurrence.
    Nth(u32),
    /// Final occurrence in the month.
    Last,
}

/// Number of days in a calendar month.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 31,
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Explicit sets of months, days and times of day.
///
/// Weekdays are numbered from Sunday (0) to Saturday (6). When month-days are
/// present they take precedence over the weekday and ordinal sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSpec {
    months: BTreeSet<u32>,
    monthdays: BTreeSet<MonthDay>,
    weekdays: BTreeSet<u32>,
    ordinals: BTreeSet<Ordinal>,
    hours: BTreeSet<u32>,
    minutes: BTreeSet<u32>,
    seconds: BTreeSet<u32>,
}

impl Default for TimeSpec {
    fn default() -> Self {
        Self {
            months: (1..=12).collect(),
            monthdays: BTreeSet::new(),
            weekdays: (0..7).collect(),
            ordinals: (1..=5).map(Ordinal::Nth).collect(),
            hours: BTreeSet::from([0]),
            minutes: BTreeSet::from([0]),
            seconds: BTreeSet::from([0]),
        }
    }
}

impl TimeSpec {
    /// Every day at midnight; narrow it with the `with_*` setters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to these months (1-12). An empty set keeps every month.
    pub fn with_months(mut self, months: impl IntoIterator<Item = u32>) -> Self {
        let months: BTreeSet<u32> = months.into_iter().collect();
        if !months.is_empty() {
            self.months = months;
        }
        self
    }

    pub fn with_monthdays(mut self, days: impl IntoIterator<Item = MonthDay>) -> Self {
        self.monthdays = days.into_iter().collect();
        self
    }

    /// Restrict to these weekdays (0 = Sunday). An empty set keeps every weekday.
    pub fn with_weekdays(mut self, weekdays: impl IntoIterator<Item = u32>) -> Self {
        let weekdays: BTreeSet<u32> = weekdays.into_iter().collect();
        if !weekdays.is_empty() {
            self.weekdays = weekdays;
        }
        self
    }

    /// Restrict weekdays to these occurrences. An empty set keeps every occurrence.
    pub fn with_ordinals(mut self, ordinals: impl IntoIterator<Item = Ordinal>) -> Self {
        let ordinals: BTreeSet<Ordinal> = ordinals.into_iter().collect();
        if !ordinals.is_empty() {
            self.ordinals = ordinals;
        }
        self
    }

    pub fn with_hours(mut self, hours: impl IntoIterator<Item = u32>) -> Self {
        self.hours = hours.into_iter().collect();
        self
    }

    pub fn with_minutes(mut self, minutes: impl IntoIterator<Item = u32>) -> Self {
        self.minutes = minutes.into_iter().collect();
        self
    }

    pub fn with_seconds(mut self, seconds: impl IntoIterator<Item = u32>) -> Self {
        self.seconds = seconds.into_iter().collect();
        self
    }

    /// Check every field is within its calendar range.
    pub fn validate(&self) -> Result<(), String> {
        check_range("month", &self.months, 1, 12)?;
        check_range("weekday", &self.weekdays, 0, 6)?;
        check_range("hour", &self.hours, 0, 23)?;
        check_range("minute", &self.minutes, 0, 59)?;
        check_range("second", &self.seconds, 0, 59)?;
        for day in &self.monthdays {
            if let MonthDay::Day(d) = day {
                if !(1..=31).contains(d) {
                    return Err(format!("month day {d} is outside 1-31"));
                }
            }
        }
        for ordinal in &self.ordinals {
            if let Ordinal::Nth(n) = ordinal {
                if !(1..=5).contains(n) {
                    return Err(format!("ordinal {n} is outside 1-5"));
                }
            }
        }
        if self.hours.is_empty() || self.minutes.is_empty() || self.seconds.is_empty() {
            return Err("time of day is empty".to_string());
        }
        Ok(())
    }

    /// Days of `year`/`month` selected by this spec, ascending.
    pub fn matching_days(&self, year: i32, month: u32) -> Vec<u32> {
        let last = days_in_month(year, month);

        let mut days: Vec<u32> = if !self.monthdays.is_empty() {
            self.monthdays
                .iter()
                .map(|day| match day {
                    MonthDay::Day(d) => *d,
                    MonthDay::Last => last,
                })
                .filter(|d| *d <= last)
                .collect()
        } else {
            let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
                return Vec::new();
            };
            let first_weekday = first.weekday().num_days_from_sunday();

            let mut out = Vec::new();
            for weekday in &self.weekdays {
                let first_occurrence = (weekday + 7 - first_weekday) % 7 + 1;
                for ordinal in &self.ordinals {
                    let day = match ordinal {
                        Ordinal::Nth(n) => first_occurrence + 7 * n.saturating_sub(1),
                        Ordinal::Last => first_occurrence + 7 * ((last - first_occurrence) / 7),
                    };
                    if day <= last {
                        out.push(day);
                    }
                }
            }
            out
        };

        days.sort_unstable();
        days.dedup();
        days
    }

    /// Times of day selected by this spec that fall strictly after `after`.
    fn times_after(&self, after: Option<NaiveTime>) -> impl Iterator<Item = NaiveTime> + '_ {
        self.hours
            .iter()
            .flat_map(move |h| {
                self.minutes.iter().flat_map(move |m| {
                    self.seconds
                        .iter()
                        .filter_map(move |s| NaiveTime::from_hms_opt(*h, *m, *s))
                })
            })
            .filter(move |t| after.is_none_or(|a| *t > a))
    }

    /// First instant strictly after `reference` that matches, evaluated in `tz`.
    ///
    /// Returns `None` when nothing matches within one full Gregorian cycle.
    pub fn next_match(&self, reference: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let start = reference.with_timezone(&tz).naive_local();
        let (mut year, mut month) = (start.year(), start.month());

        for _ in 0..MAX_MONTHS_SEARCHED {
            if self.months.contains(&month) {
                for day in self.matching_days(year, month) {
                    let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
                        continue;
                    };
                    if date < start.date() {
                        continue;
                    }
                    let after = (date == start.date()).then(|| start.time());
                    for time in self.times_after(after) {
                        match localize(tz, date.and_time(time)) {
                            Some(instant) if instant > reference => return Some(instant),
                            _ => {}
                        }
                    }
                }
            }

            if month == 12 {
                month = 1;
                year += 1;
            } else {
                month += 1;
            }
        }

        None
    }
}

fn check_range(field: &str, values: &BTreeSet<u32>, min: u32, max: u32) -> Result<(), String> {
    match values.iter().find(|v| **v < min || **v > max) {
        Some(v) => Err(format!("{field} {v} is outside {min}-{max}")),
        None => Ok(()),
    }
}

/// Resolve a wall-clock time in `tz` to an instant.
///
/// Repeated times resolve to their first occurrence. Skipped times resolve to
/// the first wall-clock minute after the gap.
pub(crate) fn localize(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            let mut probe = naive.with_second(0)?.with_nanosecond(0)?;
            for _ in 0..MAX_GAP_MINUTES {
                probe += Duration::minutes(1);
                if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
                    debug!(requested = %naive, resolved = %probe, tz = %tz, "wall-clock time skipped by DST");
                    return Some(dt.with_timezone(&Utc));
                }
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::US::Pacific;
    use proptest::prelude::*;
    use test_case::test_case;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn pacific(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Pacific
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .earliest()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
        (to - from).num_seconds() as f64 / 3600.0
    }

    // === Unit Tests ===

    #[test_case(2023, 1 => 31)]
    #[test_case(2023, 2 => 28)]
    #[test_case(2024, 2 => 29)]
    #[test_case(1900, 2 => 28)]
    #[test_case(2000, 2 => 29)]
    #[test_case(2023, 3 => 31)]
    #[test_case(2023, 4 => 30)]
    #[test_case(2023, 5 => 31)]
    #[test_case(2023, 6 => 30)]
    #[test_case(2023, 7 => 31)]
    #[test_case(2023, 8 => 31)]
    #[test_case(2023, 9 => 30)]
    #[test_case(2023, 10 => 31)]
    #[test_case(2023, 11 => 30)]
    #[test_case(2023, 12 => 31)]
    fn test_last_day_of_month(year: i32, month: u32) -> u32 {
        let spec = TimeSpec::new().with_monthdays([MonthDay::Last]);
        let days = spec.matching_days(year, month);
        assert_eq!(days.len(), 1);
        assert_eq!(days[0], days_in_month(year, month));
        days[0]
    }

    #[test]
    fn test_last_day_matches_across_year() {
        let spec = TimeSpec::new().with_monthdays([MonthDay::Last]);
        let mut t = utc(2024, 1, 1, 0, 0);
        let mut seen = Vec::new();
        for _ in 0..12 {
            t = spec.next_match(t, Tz::UTC).unwrap();
            seen.push((t.month(), t.day()));
        }
        assert_eq!(
            seen,
            vec![
                (1, 31),
                (2, 29),
                (3, 31),
                (4, 30),
                (5, 31),
                (6, 30),
                (7, 31),
                (8, 31),
                (9, 30),
                (10, 31),
                (11, 30),
                (12, 31)
            ]
        );
    }

    #[test]
    fn test_explicit_monthday_skips_short_months() {
        let spec = TimeSpec::new().with_monthdays([MonthDay::Day(31)]);
        let next = spec.next_match(utc(2023, 4, 1, 0, 0), Tz::UTC).unwrap();
        assert_eq!(next, utc(2023, 5, 31, 0, 0));
    }

    #[test]
    fn test_second_tuesday() {
        let spec = TimeSpec::new()
            .with_weekdays([2])
            .with_ordinals([Ordinal::Nth(2)])
            .with_hours([9])
            .with_minutes([30]);
        // March 2023 starts on a Wednesday; the 2nd Tuesday is the 14th.
        let next = spec.next_match(utc(2023, 3, 1, 0, 0), Tz::UTC).unwrap();
        assert_eq!(next, utc(2023, 3, 14, 9, 30));
        // After it passes, April 11th.
        let next = spec.next_match(next, Tz::UTC).unwrap();
        assert_eq!(next, utc(2023, 4, 11, 9, 30));
    }

    #[test]
    fn test_last_friday() {
        let spec = TimeSpec::new()
            .with_weekdays([5])
            .with_ordinals([Ordinal::Last]);
        assert_eq!(spec.matching_days(2023, 3), vec![31]);
        assert_eq!(spec.matching_days(2023, 2), vec![24]);
    }

    #[test]
    fn test_fifth_weekday_missing_in_short_month() {
        let spec = TimeSpec::new()
            .with_weekdays([1])
            .with_ordinals([Ordinal::Nth(5)]);
        // February 2023 has four Mondays.
        assert!(spec.matching_days(2023, 2).is_empty());
        assert_eq!(spec.matching_days(2023, 1), vec![30]);
    }

    #[test]
    fn test_same_day_later_time() {
        let spec = TimeSpec::new().with_hours([6, 18]);
        let next = spec.next_match(utc(2023, 6, 1, 7, 0), Tz::UTC).unwrap();
        assert_eq!(next, utc(2023, 6, 1, 18, 0));
    }

    #[test]
    fn test_exact_match_moves_forward() {
        let spec = TimeSpec::new().with_hours([6]);
        let next = spec.next_match(utc(2023, 6, 1, 6, 0), Tz::UTC).unwrap();
        assert_eq!(next, utc(2023, 6, 2, 6, 0));
    }

    #[test]
    fn test_month_filter_wraps_year() {
        let spec = TimeSpec::new().with_months([1]).with_monthdays([MonthDay::Day(1)]);
        let next = spec.next_match(utc(2023, 6, 1, 0, 0), Tz::UTC).unwrap();
        assert_eq!(next, utc(2024, 1, 1, 0, 0));
    }

    #[test]
    fn test_impossible_spec_never_matches() {
        let spec = TimeSpec::new().with_months([2]).with_monthdays([MonthDay::Day(30)]);
        assert!(spec.next_match(utc(2023, 1, 1, 0, 0), Tz::UTC).is_none());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        assert!(TimeSpec::new().with_hours([24]).validate().is_err());
        assert!(TimeSpec::new().with_months([13]).validate().is_err());
        assert!(
            TimeSpec::new()
                .with_ordinals([Ordinal::Nth(6)])
                .validate()
                .is_err()
        );
        assert!(TimeSpec::new().with_seconds([]).validate().is_err());
        assert!(TimeSpec::new().validate().is_ok());
    }

    #[test]
    fn test_hourly_through_spring_forward() {
        // 2011-03-13: 02:00 PST jumps to 03:00 PDT.
        let spec = TimeSpec::new().with_hours(0..5);
        let start = pacific(2011, 3, 13, 1, 0);
        let first = spec.next_match(start, Pacific).unwrap();
        assert_eq!(first, pacific(2011, 3, 13, 3, 0));
        let second = spec.next_match(first, Pacific).unwrap();
        assert_eq!(second, pacific(2011, 3, 13, 4, 0));
    }

    #[test]
    fn test_hourly_through_fall_back() {
        // 2011-11-06: 02:00 PDT falls back to 01:00 PST. Only the first 1AM runs.
        let spec = TimeSpec::new().with_hours(0..5);
        let start = pacific(2011, 11, 6, 0, 0);
        let first = spec.next_match(start, Pacific).unwrap();
        assert_eq!(first, utc(2011, 11, 6, 8, 0));
        let second = spec.next_match(first, Pacific).unwrap();
        assert_eq!(second, utc(2011, 11, 6, 10, 0));
    }

    #[test]
    fn test_daily_midnight_fall_back_vantage_points() {
        let spec = TimeSpec::new();
        // 00:50 PDT and 01:10 PST on the fall-back day, 80 minutes apart.
        let before = utc(2011, 11, 6, 7, 50);
        let after = utc(2011, 11, 6, 9, 10);

        let s1a = spec.next_match(before, Pacific).unwrap();
        let s2a = spec.next_match(after, Pacific).unwrap();
        assert_eq!(s1a, s2a);

        let s1b = spec.next_match(s1a, Pacific).unwrap();
        let s2b = spec.next_match(s2a, Pacific).unwrap();
        assert!((hours_between(s1a, s1b) - 24.0).abs() <= 0.02);
        assert!((hours_between(s2a, s2b) - 24.0).abs() <= 0.02);

        // Wall clocks read 00:50 and 01:10: twenty minutes apart, but the
        // repeated hour puts the two vantage points one hour further apart.
        let wall_clock_gap = 20.0 / 60.0;
        let diff = hours_between(before, s1a) - hours_between(after, s2a);
        assert!((diff - wall_clock_gap - 1.0).abs() <= 0.02);
    }

    #[test]
    fn test_daily_midnight_spring_forward_vantage_points() {
        let spec = TimeSpec::new();
        // 01:50 PST and 03:10 PDT on the spring-forward day, 20 minutes apart.
        let before = utc(2011, 3, 13, 9, 50);
        let after = utc(2011, 3, 13, 10, 10);

        let s1a = spec.next_match(before, Pacific).unwrap();
        let s2a = spec.next_match(after, Pacific).unwrap();
        assert_eq!(s1a, s2a);
        assert_eq!(s1a, pacific(2011, 3, 14, 0, 0));

        let wall_clock_gap = 80.0 / 60.0;
        let diff = hours_between(before, s1a) - hours_between(after, s2a);
        assert!((diff - wall_clock_gap + 1.0).abs() <= 0.02);
    }

    #[test]
    fn test_nonexistent_time_runs_exactly_once() {
        let spec = TimeSpec::new().with_hours([2]).with_minutes([30]);
        let day_before = pacific(2011, 3, 12, 12, 0);

        let first = spec.next_match(day_before, Pacific).unwrap();
        assert_eq!(first, pacific(2011, 3, 13, 3, 0));

        let second = spec.next_match(first, Pacific).unwrap();
        assert_eq!(second, pacific(2011, 3, 14, 2, 30));
    }

    #[test]
    fn test_repeated_time_resolves_to_first_occurrence() {
        let spec = TimeSpec::new().with_hours([1]).with_minutes([30]);
        let next = spec.next_match(pacific(2011, 11, 5, 12, 0), Pacific).unwrap();
        // 01:30 PDT is 08:30 UTC.
        assert_eq!(next, utc(2011, 11, 6, 8, 30));
        // From inside the second 1AM hour, the next run is the following day.
        let next = spec.next_match(utc(2011, 11, 6, 9, 35), Pacific).unwrap();
        assert_eq!(next, pacific(2011, 11, 7, 1, 30));
    }

    // === Property-Based Tests ===

    fn arb_spec() -> impl Strategy<Value = TimeSpec> {
        (
            prop::collection::btree_set(1u32..=12, 0..4),
            prop::collection::btree_set(0u32..7, 0..3),
            prop::collection::btree_set(0u32..24, 1..3),
            prop::collection::btree_set(0u32..60, 1..3),
            any::<bool>(),
        )
            .prop_map(|(months, weekdays, hours, minutes, last_day)| {
                let spec = TimeSpec::new()
                    .with_months(months)
                    .with_weekdays(weekdays)
                    .with_hours(hours)
                    .with_minutes(minutes);
                if last_day {
                    spec.with_monthdays([MonthDay::Last])
                } else {
                    spec
                }
            })
    }

    proptest! {
        #[test]
        fn prop_next_match_strictly_after(
            spec in arb_spec(),
            secs in 946_684_800i64..2_524_608_000i64,
            tz in prop::sample::select(vec![Tz::UTC, Pacific, chrono_tz::Europe::London, chrono_tz::Australia::Lord_Howe]),
        ) {
            let reference = DateTime::from_timestamp(secs, 0).unwrap();
            let next = spec.next_match(reference, tz).unwrap();
            prop_assert!(next > reference);
        }

        #[test]
        fn prop_next_match_is_monotonic(
            spec in arb_spec(),
            secs in 946_684_800i64..2_524_608_000i64,
            gap in 0i64..86_400 * 40,
        ) {
            let earlier = DateTime::from_timestamp(secs, 0).unwrap();
            let later = earlier + Duration::seconds(gap);
            let a = spec.next_match(earlier, Pacific).unwrap();
            let b = spec.next_match(later, Pacific).unwrap();
            prop_assert!(a <= b);
        }

        #[test]
        fn prop_matching_days_within_month(year in 1990i32..2100, month in 1u32..=12, weekday in 0u32..7) {
            let spec = TimeSpec::new().with_weekdays([weekday]);
            let days = spec.matching_days(year, month);
            let last = days_in_month(year, month);
            prop_assert!(days.len() >= 4 && days.len() <= 5);
            for day in days {
                prop_assert!(day >= 1 && day <= last);
                let date = NaiveDate::from_ymd_opt(year, month, day).unwrap();
                prop_assert_eq!(date.weekday().num_days_from_sunday(), weekday);
            }
        }
    }
}
