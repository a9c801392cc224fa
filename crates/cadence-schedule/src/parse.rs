//! Parsing of textual recurrence rules.
//!
//! Supported forms:
//! - `constant`
//! - `interval <n><unit> [synchronized]`, or `interval hourly`
//! - `daily [HH:MM[:SS]] [days]`, days as letters (`MWF`) or names (`mon,wed`)
//! - `cron <minute> <hour> <month-day> <month> <weekday>`, or `cron @daily`
//! - `[groc daily] (every|<ordinals>) (day|<weekdays>) [of|in <months>] [at] HH:MM`

use std::collections::BTreeSet;
use std::sync::OnceLock;

use chrono::{Duration, NaiveTime, Timelike};
use regex::Regex;

use crate::ScheduleError;
use crate::schedule::Recurrence;
use crate::timespec::{MonthDay, Ordinal, TimeSpec};

const WEEKDAY_NAMES: &[(&str, u32)] = &[
    ("sunday", 0),
    ("sun", 0),
    ("su", 0),
    ("monday", 1),
    ("mon", 1),
    ("mo", 1),
    ("tuesday", 2),
    ("tues", 2),
    ("tue", 2),
    ("tu", 2),
    ("wednesday", 3),
    ("wed", 3),
    ("we", 3),
    ("thursday", 4),
    ("thurs", 4),
    ("thu", 4),
    ("th", 4),
    ("friday", 5),
    ("fri", 5),
    ("fr", 5),
    ("saturday", 6),
    ("sat", 6),
    ("sa", 6),
];

/// Single-letter weekday codes used by `daily` rules.
const WEEKDAY_LETTERS: &[(char, u32)] = &[
    ('u', 0),
    ('m', 1),
    ('t', 2),
    ('w', 3),
    ('r', 4),
    ('f', 5),
    ('s', 6),
];

const MONTH_NAMES: &[(&str, u32)] = &[
    ("january", 1),
    ("jan", 1),
    ("february", 2),
    ("feb", 2),
    ("march", 3),
    ("mar", 3),
    ("april", 4),
    ("apr", 4),
    ("may", 5),
    ("june", 6),
    ("jun", 6),
    ("july", 7),
    ("jul", 7),
    ("august", 8),
    ("aug", 8),
    ("september", 9),
    ("sept", 9),
    ("sep", 9),
    ("october", 10),
    ("oct", 10),
    ("november", 11),
    ("nov", 11),
    ("december", 12),
    ("dec", 12),
];

const CRON_SHORTCUTS: &[(&str, &str)] = &[
    ("@yearly", "0 0 1 1 *"),
    ("@annually", "0 0 1 1 *"),
    ("@monthly", "0 0 1 * *"),
    ("@weekly", "0 0 * * 0"),
    ("@daily", "0 0 * * *"),
    ("@midnight", "0 0 * * *"),
    ("@hourly", "0 * * * *"),
];

fn lookup(table: &[(&str, u32)], name: &str) -> Option<u32> {
    let name = name.to_ascii_lowercase();
    table.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
}

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)\s*([a-zA-Z]+)\s*$").unwrap())
}

/// Compiled regex for natural-language day/month expressions (cached).
fn groc_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let days = WEEKDAY_NAMES
            .iter()
            .map(|(n, _)| *n)
            .chain(["day"])
            .collect::<Vec<_>>()
            .join("|");
        let months = MONTH_NAMES
            .iter()
            .map(|(n, _)| *n)
            .chain(["month"])
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!(
            r"^(?P<month_days>every|(((\d+(st|nd|rd|th)?)|last),?)+)?\s*(?P<days>(({days}),?)+)?\s*((in|of)\s+(?P<months>(({months}),?)+))?\s*((at\s+)?(?P<time>\d\d?:\d\d))?\s*$"
        );
        Regex::new(&pattern).unwrap()
    })
}

/// Parse a duration such as `30s`, `5 min`, `2h` or `1day`.
pub fn parse_duration(text: &str) -> Result<Duration, ScheduleError> {
    let invalid = || ScheduleError::InvalidDuration(text.to_string());
    let caps = duration_regex().captures(text).ok_or_else(invalid)?;
    let value: i64 = caps[1].parse().map_err(|_| invalid())?;
    let seconds_per_unit = match caps[2].to_ascii_lowercase().as_str() {
        "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3600,
        "d" | "day" | "days" => 86_400,
        _ => return Err(invalid()),
    };
    value
        .checked_mul(seconds_per_unit)
        .and_then(Duration::try_seconds)
        .ok_or_else(invalid)
}

fn parse_time_of_day(rule: &str, text: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(text, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .map_err(|_| ScheduleError::invalid(rule, format!("invalid time of day '{text}'")))
}

/// Parse a complete rule string into a [`Recurrence`].
pub(crate) fn parse_rule(rule: &str) -> Result<Recurrence, ScheduleError> {
    let text = rule.trim();
    if text.is_empty() {
        return Err(ScheduleError::invalid(rule, "empty rule"));
    }

    let (keyword, rest) = match text.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (text, ""),
    };

    match keyword.to_ascii_lowercase().as_str() {
        "constant" if rest.is_empty() => Ok(Recurrence::Constant),
        "constant" => Err(ScheduleError::invalid(rule, "constant takes no arguments")),
        "interval" => parse_interval(rule, rest),
        "daily" => parse_daily(rule, rest),
        "cron" => parse_cron(rule, rest),
        "groc" => match rest.split_once(char::is_whitespace) {
            Some((word, expr)) if word.eq_ignore_ascii_case("daily") => parse_groc(rule, expr),
            _ if rest.eq_ignore_ascii_case("daily") => parse_groc(rule, ""),
            _ => Err(ScheduleError::invalid(rule, "expected 'groc daily <expression>'")),
        },
        _ => parse_groc(rule, text),
    }
}

fn parse_interval(rule: &str, rest: &str) -> Result<Recurrence, ScheduleError> {
    let (delta, synchronized) = match rest.strip_suffix("synchronized") {
        Some(delta) => (delta.trim(), true),
        None => (rest, false),
    };

    let every = if delta.eq_ignore_ascii_case("hourly") {
        Duration::hours(1)
    } else {
        parse_duration(delta).map_err(|e| ScheduleError::invalid(rule, e.to_string()))?
    };

    if every <= Duration::zero() {
        return Err(ScheduleError::invalid(rule, "interval must be positive"));
    }
    Ok(Recurrence::Interval {
        every,
        synchronized,
    })
}

fn parse_daily(rule: &str, rest: &str) -> Result<Recurrence, ScheduleError> {
    let mut parts = rest.split_whitespace();
    let time = match parts.next() {
        Some(text) => parse_time_of_day(rule, text)?,
        None => NaiveTime::default(),
    };

    let mut weekdays = BTreeSet::new();
    if let Some(days) = parts.next() {
        if days.contains(',') {
            for name in days.split(',').filter(|n| !n.is_empty()) {
                let day = lookup(WEEKDAY_NAMES, name)
                    .ok_or_else(|| ScheduleError::invalid(rule, format!("unknown day '{name}'")))?;
                weekdays.insert(day);
            }
        } else {
            for letter in days.chars() {
                let lower = letter.to_ascii_lowercase();
                let day = WEEKDAY_LETTERS
                    .iter()
                    .find(|(c, _)| *c == lower)
                    .map(|(_, d)| *d)
                    .ok_or_else(|| {
                        ScheduleError::invalid(rule, format!("unknown day '{letter}'"))
                    })?;
                weekdays.insert(day);
            }
        }
    }
    if let Some(extra) = parts.next() {
        return Err(ScheduleError::invalid(
            rule,
            format!("unexpected '{extra}' after days"),
        ));
    }

    let spec = TimeSpec::new()
        .with_hours([time.hour()])
        .with_minutes([time.minute()])
        .with_seconds([time.second()])
        .with_weekdays(weekdays);
    Ok(Recurrence::Calendar(spec))
}

/// One parsed cron field: either unrestricted or an explicit set.
enum CronField<T> {
    Any,
    Set(BTreeSet<T>),
}

fn parse_cron(rule: &str, rest: &str) -> Result<Recurrence, ScheduleError> {
    let expanded = if rest.starts_with('@') {
        CRON_SHORTCUTS
            .iter()
            .find(|(name, _)| rest.eq_ignore_ascii_case(name))
            .map(|(_, line)| *line)
            .ok_or_else(|| ScheduleError::invalid(rule, format!("unknown shortcut '{rest}'")))?
    } else {
        rest
    };

    let fields: Vec<&str> = expanded.split_whitespace().collect();
    let [minute, hour, monthday, month, weekday] = fields.as_slice() else {
        return Err(ScheduleError::invalid(
            rule,
            format!("expected 5 fields, found {}", fields.len()),
        ));
    };

    let bad = |e: String| ScheduleError::invalid(rule, e);
    let minutes = cron_field(minute, 0, 59, &[]).map_err(bad)?;
    let hours = cron_field(hour, 0, 23, &[]).map_err(bad)?;
    let months = cron_field(month, 1, 12, MONTH_NAMES).map_err(bad)?;
    let monthdays = cron_monthdays(monthday).map_err(bad)?;
    let weekdays = match cron_field(weekday, 0, 7, WEEKDAY_NAMES).map_err(bad)? {
        CronField::Any => CronField::Any,
        CronField::Set(days) => {
            // Both 0 and 7 mean Sunday.
            let days: BTreeSet<u32> = days.into_iter().map(|d| d % 7).collect();
            if days.len() == 7 {
                CronField::Any
            } else {
                CronField::Set(days)
            }
        }
    };

    let mut spec = TimeSpec::new()
        .with_seconds([0])
        .with_minutes(expand(minutes, 0, 59))
        .with_hours(expand(hours, 0, 23))
        .with_months(expand(months, 1, 12));

    match (monthdays, weekdays) {
        (CronField::Set(_), CronField::Set(_)) => {
            return Err(ScheduleError::invalid(
                rule,
                "cannot restrict both month-day and weekday",
            ));
        }
        (CronField::Set(days), CronField::Any) => spec = spec.with_monthdays(days),
        (CronField::Any, CronField::Set(days)) => spec = spec.with_weekdays(days),
        (CronField::Any, CronField::Any) => {}
    }

    Ok(Recurrence::Calendar(spec))
}

fn expand(field: CronField<u32>, min: u32, max: u32) -> BTreeSet<u32> {
    match field {
        CronField::Any => (min..=max).collect(),
        CronField::Set(values) => values,
    }
}

fn cron_monthdays(text: &str) -> Result<CronField<MonthDay>, String> {
    if text == "*" || text == "?" {
        return Ok(CronField::Any);
    }
    let mut days = BTreeSet::new();
    for atom in text.split(',') {
        if atom.eq_ignore_ascii_case("l") {
            days.insert(MonthDay::Last);
        } else {
            match cron_field(atom, 1, 31, &[])? {
                CronField::Any => return Ok(CronField::Any),
                CronField::Set(values) => days.extend(values.into_iter().map(MonthDay::Day)),
            }
        }
    }
    Ok(CronField::Set(days))
}

fn cron_value(text: &str, names: &[(&str, u32)]) -> Result<u32, String> {
    text.parse::<u32>()
        .ok()
        .or_else(|| lookup(names, text))
        .ok_or_else(|| format!("invalid value '{text}'"))
}

/// Parse a cron field made of `*`, values, ranges, and `/step` suffixes.
fn cron_field(text: &str, min: u32, max: u32, names: &[(&str, u32)]) -> Result<CronField<u32>, String> {
    if text == "*" || text == "?" {
        return Ok(CronField::Any);
    }

    let mut values = BTreeSet::new();
    for atom in text.split(',') {
        let (base, step) = match atom.split_once('/') {
            Some((base, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step in '{atom}'"))?;
                if step == 0 {
                    return Err(format!("zero step in '{atom}'"));
                }
                (base, Some(step))
            }
            None => (atom, None),
        };

        let (start, end) = if base == "*" || base == "?" {
            (min, max)
        } else if let Some((lo, hi)) = base.split_once('-') {
            (cron_value(lo, names)?, cron_value(hi, names)?)
        } else {
            let value = cron_value(base, names)?;
            (value, if step.is_some() { max } else { value })
        };

        if start < min || end > max || start > end {
            return Err(format!("'{atom}' is outside {min}-{max}"));
        }
        values.extend((start..=end).step_by(step.unwrap_or(1) as usize));
    }
    Ok(CronField::Set(values))
}

fn parse_groc(rule: &str, expr: &str) -> Result<Recurrence, ScheduleError> {
    let lowered = expr.trim().to_ascii_lowercase();
    let caps = groc_regex()
        .captures(&lowered)
        .ok_or_else(|| ScheduleError::invalid(rule, "not a valid day/month expression"))?;

    let time = match caps.name("time") {
        Some(m) => parse_time_of_day(rule, m.as_str())?,
        None => NaiveTime::default(),
    };

    let weekdays: Option<BTreeSet<u32>> = match caps.name("days").map(|m| m.as_str()) {
        None | Some("day") => None,
        Some(days) => Some(
            days.split(',')
                .filter(|d| !d.is_empty())
                .map(|d| {
                    lookup(WEEKDAY_NAMES, d)
                        .ok_or_else(|| ScheduleError::invalid(rule, format!("unknown day '{d}'")))
                })
                .collect::<Result<_, _>>()?,
        ),
    };

    let months: BTreeSet<u32> = match caps.name("months").map(|m| m.as_str()) {
        None | Some("month") => BTreeSet::new(),
        Some(months) => months
            .split(',')
            .filter(|m| !m.is_empty() && *m != "month")
            .map(|m| {
                lookup(MONTH_NAMES, m)
                    .ok_or_else(|| ScheduleError::invalid(rule, format!("unknown month '{m}'")))
            })
            .collect::<Result<_, _>>()?,
    };

    let mut spec = TimeSpec::new()
        .with_hours([time.hour()])
        .with_minutes([time.minute()])
        .with_seconds([0])
        .with_months(months);

    let selectors: Vec<&str> = match caps.name("month_days").map(|m| m.as_str()) {
        None | Some("every") => Vec::new(),
        Some(list) => list.split(',').filter(|s| !s.is_empty()).collect(),
    };

    match weekdays {
        None => {
            let days = selectors
                .iter()
                .map(|s| match *s {
                    "last" => Some(MonthDay::Last),
                    other => leading_number(other).map(MonthDay::Day),
                })
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| ScheduleError::invalid(rule, "invalid day of month"))?;
            spec = spec.with_monthdays(days);
        }
        Some(weekdays) => {
            let ordinals = selectors
                .iter()
                .map(|s| match *s {
                    "last" => Some(Ordinal::Last),
                    other => leading_number(other).map(Ordinal::Nth),
                })
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| ScheduleError::invalid(rule, "invalid ordinal"))?;
            spec = spec.with_weekdays(weekdays).with_ordinals(ordinals);
        }
    }

    spec.validate().map_err(|e| ScheduleError::invalid(rule, e))?;
    Ok(Recurrence::Calendar(spec))
}

fn leading_number(text: &str) -> Option<u32> {
    let digits: String = text.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn calendar(rule: &str) -> TimeSpec {
        match parse_rule(rule).unwrap() {
            Recurrence::Calendar(spec) => spec,
            other => panic!("expected calendar rule, got {other:?}"),
        }
    }

    // === Unit Tests ===

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::seconds(30));
        assert_eq!(parse_duration("5 min").unwrap(), Duration::minutes(5));
        assert_eq!(parse_duration("2h").unwrap(), Duration::hours(2));
        assert_eq!(parse_duration("1day").unwrap(), Duration::days(1));
        assert!(parse_duration("5 fortnights").is_err());
        assert!(parse_duration("minutes").is_err());
    }

    #[test]
    fn test_constant() {
        assert_eq!(parse_rule("constant").unwrap(), Recurrence::Constant);
        assert!(parse_rule("constant now").is_err());
    }

    #[test]
    fn test_interval() {
        assert_eq!(
            parse_rule("interval 20s").unwrap(),
            Recurrence::Interval {
                every: Duration::seconds(20),
                synchronized: false
            }
        );
        assert_eq!(
            parse_rule("interval hourly").unwrap(),
            Recurrence::Interval {
                every: Duration::hours(1),
                synchronized: false
            }
        );
        assert_eq!(
            parse_rule("interval 15m synchronized").unwrap(),
            Recurrence::Interval {
                every: Duration::minutes(15),
                synchronized: true
            }
        );
        assert!(parse_rule("interval 0s").is_err());
        assert!(parse_rule("interval soon").is_err());
    }

    #[test]
    fn test_daily_letters() {
        let expected = TimeSpec::new()
            .with_hours([4])
            .with_minutes([0])
            .with_seconds([0])
            .with_weekdays([1, 3, 5]);
        assert_eq!(calendar("daily 04:00:00 MWF"), expected);
    }

    #[test]
    fn test_daily_names_and_default_time() {
        assert_eq!(
            calendar("daily 10:30 sat,sun"),
            TimeSpec::new()
                .with_hours([10])
                .with_minutes([30])
                .with_weekdays([0, 6])
        );
        assert_eq!(calendar("daily"), TimeSpec::new());
        assert!(parse_rule("daily 25:00").is_err());
        assert!(parse_rule("daily 10:00 MXF").is_err());
    }

    #[test]
    fn test_cron_basic() {
        assert_eq!(
            calendar("cron */15 9-17 * * mon-fri"),
            TimeSpec::new()
                .with_minutes([0, 15, 30, 45])
                .with_hours(9..=17)
                .with_weekdays(1..=5)
        );
    }

    #[test]
    fn test_cron_last_day_and_months() {
        assert_eq!(
            calendar("cron 30 23 L jan,jul *"),
            TimeSpec::new()
                .with_minutes([30])
                .with_hours([23])
                .with_months([1, 7])
                .with_monthdays([MonthDay::Last])
        );
    }

    #[test]
    fn test_cron_shortcuts() {
        assert_eq!(calendar("cron @daily"), TimeSpec::new());
        assert_eq!(calendar("cron @hourly"), TimeSpec::new().with_hours(0..=23));
        assert!(parse_rule("cron @sometimes").is_err());
    }

    #[test]
    fn test_cron_sunday_as_seven() {
        assert_eq!(
            calendar("cron 0 0 * * 7"),
            TimeSpec::new().with_weekdays([0])
        );
    }

    #[test]
    fn test_cron_rejects_bad_fields() {
        assert!(parse_rule("cron * * * *").is_err());
        assert!(parse_rule("cron 60 * * * *").is_err());
        assert!(parse_rule("cron 5-1 * * * *").is_err());
        assert!(parse_rule("cron */0 * * * *").is_err());
        assert!(parse_rule("cron 0 0 1 * mon").is_err());
    }

    #[test]
    fn test_groc_ordinal_weekdays() {
        assert_eq!(
            calendar("1st,3rd sat,sun of jan,feb,mar 09:15"),
            TimeSpec::new()
                .with_hours([9])
                .with_minutes([15])
                .with_weekdays([0, 6])
                .with_ordinals([Ordinal::Nth(1), Ordinal::Nth(3)])
                .with_months([1, 2, 3])
        );
    }

    #[test]
    fn test_groc_monthdays_with_prefix() {
        assert_eq!(
            calendar("groc daily 1st,15th day of month at 00:00"),
            TimeSpec::new().with_monthdays([MonthDay::Day(1), MonthDay::Day(15)])
        );
    }

    #[test]
    fn test_groc_last_day_and_last_weekday() {
        assert_eq!(
            calendar("last day of month at 23:00"),
            TimeSpec::new()
                .with_hours([23])
                .with_monthdays([MonthDay::Last])
        );
        assert_eq!(
            calendar("last fri of month at 17:00"),
            TimeSpec::new()
                .with_hours([17])
                .with_weekdays([5])
                .with_ordinals([Ordinal::Last])
        );
    }

    #[test]
    fn test_groc_every_day() {
        assert_eq!(
            calendar("every day at 06:45"),
            TimeSpec::new().with_hours([6]).with_minutes([45])
        );
        assert_eq!(
            calendar("every mon in june"),
            TimeSpec::new().with_weekdays([1]).with_months([6])
        );
    }

    #[test]
    fn test_groc_rejects_garbage() {
        assert!(parse_rule("whenever you like").is_err());
        assert!(parse_rule("7th mon of jan at 10:00").is_err());
        assert!(parse_rule("").is_err());
        assert!(parse_rule("groc weekly").is_err());
    }
}
