//! Command templates and the values they are rendered against.
//!
//! A template refers to context variables as `{name}`; `{{` and `}}` stand
//! for literal braces. Besides run variables (`runid`, `jobname`, `node`, ...)
//! and the configured command context, the date tokens `shortdate`, `year`,
//! `month`, `day`, `hour`, `unixtime`, `daynumber`, `ym`, `ymd`, `ymdh` and
//! `ymdhm` are computed from the run time in the job's zone, each optionally
//! shifted with `+N` or `-N` in its own unit.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Datelike, Duration, Months, NaiveDateTime};
use chrono_tz::Tz;
use regex::Regex;

use crate::error::RenderError;

/// Substituted for a command that fails to render, so the action fails visibly.
pub const FAILED_RENDER: &str = "false # command failed to render correctly";

fn date_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(shortdate|year|month|day|hour|unixtime|daynumber|ymdhm|ymdh|ymd|ym)([+-]\d+)?$")
            .unwrap()
    })
}

/// Variables available to one action run's command and trigger templates.
#[derive(Debug, Clone)]
pub struct CommandContext {
    run_time: DateTime<Tz>,
    values: BTreeMap<String, String>,
    globals: Arc<BTreeMap<String, String>>,
}

impl CommandContext {
    pub fn new(run_time: DateTime<Tz>) -> Self {
        Self {
            run_time,
            values: BTreeMap::new(),
            globals: Arc::default(),
        }
    }

    /// Configured variables, consulted after run variables and date tokens.
    pub fn with_globals(mut self, globals: Arc<BTreeMap<String, String>>) -> Self {
        self.globals = globals;
        self
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn lookup(&self, token: &str) -> Result<String, RenderError> {
        if let Some(value) = self.values.get(token) {
            return Ok(value.clone());
        }
        if let Some(caps) = date_token_regex().captures(token) {
            let delta: i64 = match caps.get(2) {
                Some(m) => m
                    .as_str()
                    .parse()
                    .map_err(|_| RenderError::OutOfRange(token.to_string()))?,
                None => 0,
            };
            return self
                .date_token(&caps[1], delta)
                .ok_or_else(|| RenderError::OutOfRange(token.to_string()));
        }
        self.globals
            .get(token)
            .cloned()
            .ok_or_else(|| RenderError::UnknownToken(token.to_string()))
    }

    fn date_token(&self, name: &str, delta: i64) -> Option<String> {
        let local = self.run_time.naive_local();
        let text = match name {
            "shortdate" | "ymd" => shift(local, Duration::try_days(delta)?)?
                .format("%Y-%m-%d")
                .to_string(),
            "day" => shift(local, Duration::try_days(delta)?)?.format("%d").to_string(),
            "year" => shift_months(local, delta.checked_mul(12)?)?.format("%Y").to_string(),
            "month" => shift_months(local, delta)?.format("%m").to_string(),
            "ym" => shift_months(local, delta)?.format("%Y-%m").to_string(),
            "hour" => shift(local, Duration::try_hours(delta)?)?.format("%H").to_string(),
            "ymdh" => shift(local, Duration::try_hours(delta)?)?
                .format("%Y-%m-%dT%H")
                .to_string(),
            "ymdhm" => shift(local, Duration::try_minutes(delta)?)?
                .format("%Y-%m-%dT%H:%M")
                .to_string(),
            "unixtime" => self.run_time.timestamp().checked_add(delta)?.to_string(),
            "daynumber" => (i64::from(local.date().num_days_from_ce()) + delta).to_string(),
            _ => return None,
        };
        Some(text)
    }

    /// Substitute every `{token}` in `template`.
    pub fn render(&self, template: &str) -> Result<String, RenderError> {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '{' => {
                    let mut token = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => token.push(ch),
                            None => return Err(RenderError::Unclosed(template.to_string())),
                        }
                    }
                    out.push_str(&self.lookup(token.trim())?);
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '}' => return Err(RenderError::Unmatched(template.to_string())),
                _ => out.push(c),
            }
        }

        Ok(out)
    }
}

fn shift(at: NaiveDateTime, by: Duration) -> Option<NaiveDateTime> {
    at.checked_add_signed(by)
}

fn shift_months(at: NaiveDateTime, months: i64) -> Option<NaiveDateTime> {
    let n = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        at.checked_add_months(n)
    } else {
        at.checked_sub_months(n)
    }
}
