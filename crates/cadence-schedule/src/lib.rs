//! Recurrence rules for Cadence.
//!
//! This crate answers one question: given a rule and a reference instant,
//! when should a job run next? It provides:
//! - A parser for the textual rule forms (`constant`, `interval`, `daily`,
//!   `cron`, and natural-language day/month expressions)
//! - A calendar matcher that is time zone and DST aware
//! - Optional uniform jitter applied on top of the deterministic match

mod error;
mod parse;
mod schedule;
mod timespec;

pub use chrono_tz::Tz;
pub use error::ScheduleError;
pub use parse::parse_duration;
pub use schedule::{Recurrence, Schedule, ScheduleConfig};
pub use timespec::{MonthDay, Ordinal, TimeSpec, days_in_month};
