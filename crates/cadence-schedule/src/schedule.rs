//! Schedule types and next-run calculation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use chrono_tz::Tz;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ScheduleError;
use crate::parse::{parse_duration, parse_rule};
use crate::timespec::{TimeSpec, localize};

/// The compiled form of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recurrence {
    /// Run immediately, then again only after the previous run completes.
    Constant,
    /// Run every `every` after the reference instant, or on a fixed phase
    /// counted from local midnight when `synchronized`.
    Interval { every: Duration, synchronized: bool },
    /// Run at calendar matches (`daily`, `cron`, and day/month expressions).
    Calendar(TimeSpec),
}

/// How a schedule is written in job definitions.
///
/// Either a bare rule string or a table with optional jitter and time zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleConfig {
    Rule(String),
    Detailed {
        rule: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        jitter: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time_zone: Option<String>,
    },
}

/// A parsed recurrence rule with its time zone and jitter window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ScheduleConfig", into = "ScheduleConfig")]
pub struct Schedule {
    original: String,
    recurrence: Recurrence,
    time_zone: Option<Tz>,
    jitter: Option<Duration>,
}

impl Schedule {
    /// Parse a rule string with no jitter, evaluated in UTC unless a zone is set.
    pub fn parse(rule: &str) -> Result<Self, ScheduleError> {
        let recurrence = parse_rule(rule)?;
        Ok(Self {
            original: rule.trim().to_string(),
            recurrence,
            time_zone: None,
            jitter: None,
        })
    }

    /// Evaluate calendar rules in `tz`.
    pub fn with_time_zone(mut self, tz: Tz) -> Self {
        self.time_zone = Some(tz);
        self
    }

    /// Use `tz` only if no zone was configured on the schedule itself.
    pub fn or_time_zone(mut self, tz: Option<Tz>) -> Self {
        if self.time_zone.is_none() {
            self.time_zone = tz;
        }
        self
    }

    /// Spread runs uniformly within plus or minus `window`.
    pub fn with_jitter(mut self, window: Duration) -> Self {
        self.jitter = (window > Duration::zero()).then_some(window);
        self
    }

    pub fn recurrence(&self) -> &Recurrence {
        &self.recurrence
    }

    pub fn time_zone(&self) -> Tz {
        self.time_zone.unwrap_or(Tz::UTC)
    }

    pub fn jitter(&self) -> Option<Duration> {
        self.jitter
    }

    /// True when the next run is scheduled only after the current one completes.
    pub fn schedule_on_complete(&self) -> bool {
        matches!(self.recurrence, Recurrence::Constant)
    }

    /// The deterministic next match after `reference`, without jitter.
    ///
    /// Always strictly after `reference`, except for `constant` rules which
    /// return `reference` itself.
    pub fn next_match(&self, reference: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        match &self.recurrence {
            Recurrence::Constant => Ok(reference),
            Recurrence::Interval {
                every,
                synchronized: false,
            } => Ok(reference + *every),
            Recurrence::Interval {
                every,
                synchronized: true,
            } => self.next_synchronized(reference, *every),
            Recurrence::Calendar(spec) => spec
                .next_match(reference, self.time_zone())
                .ok_or_else(|| ScheduleError::NoMatch(self.original.clone())),
        }
    }

    /// The next run time after `reference`, with jitter applied.
    pub fn next_run(&self, reference: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let matched = self.next_match(reference)?;
        Ok(self.jittered(matched))
    }

    /// `matched` shifted by this schedule's jitter window, if any.
    pub fn jittered(&self, matched: DateTime<Utc>) -> DateTime<Utc> {
        if self.schedule_on_complete() {
            return matched;
        }
        match self.jitter {
            Some(window) => apply_jitter(matched, window, &mut rand::thread_rng()),
            None => matched,
        }
    }

    /// The next `count` deterministic matches after `reference`.
    pub fn upcoming(
        &self,
        reference: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<DateTime<Utc>>, ScheduleError> {
        if self.schedule_on_complete() {
            return Ok(vec![reference]);
        }
        let mut out = Vec::with_capacity(count);
        let mut at = reference;
        for _ in 0..count {
            at = self.next_match(at)?;
            out.push(at);
        }
        Ok(out)
    }

    fn next_synchronized(
        &self,
        reference: DateTime<Utc>,
        every: Duration,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        let tz = self.time_zone();
        let day = reference.with_timezone(&tz).date_naive();
        let midnight = localize(tz, day.and_time(NaiveTime::default()))
            .ok_or_else(|| ScheduleError::NoMatch(self.original.clone()))?;

        let elapsed = (reference - midnight).num_seconds();
        let step = every.num_seconds();
        let periods = elapsed.div_euclid(step) + 1;
        Ok(midnight + Duration::seconds(periods * step))
    }
}

/// Shift `at` by a uniform offset in `[-window, +window]` seconds.
pub(crate) fn apply_jitter<R: Rng>(
    at: DateTime<Utc>,
    window: Duration,
    rng: &mut R,
) -> DateTime<Utc> {
    let secs = window.num_seconds();
    if secs <= 0 {
        return at;
    }
    at + Duration::seconds(rng.gen_range(-secs..=secs))
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<ScheduleConfig> for Schedule {
    type Error = ScheduleError;

    fn try_from(config: ScheduleConfig) -> Result<Self, Self::Error> {
        match config {
            ScheduleConfig::Rule(rule) => Self::parse(&rule),
            ScheduleConfig::Detailed {
                rule,
                jitter,
                time_zone,
            } => {
                let mut schedule = Self::parse(&rule)?;
                if let Some(jitter) = jitter {
                    schedule = schedule.with_jitter(parse_duration(&jitter)?);
                }
                if let Some(name) = time_zone {
                    let tz: Tz = name
                        .parse()
                        .map_err(|_| ScheduleError::UnknownTimeZone(name.clone()))?;
                    schedule = schedule.with_time_zone(tz);
                }
                Ok(schedule)
            }
        }
    }
}

impl From<Schedule> for ScheduleConfig {
    fn from(schedule: Schedule) -> Self {
        if schedule.jitter.is_none() && schedule.time_zone.is_none() {
            return ScheduleConfig::Rule(schedule.original);
        }
        ScheduleConfig::Detailed {
            rule: schedule.original,
            jitter: schedule.jitter.map(|j| format!("{}s", j.num_seconds())),
            time_zone: schedule.time_zone.map(|tz| tz.name().to_string()),
        }
    }
}
