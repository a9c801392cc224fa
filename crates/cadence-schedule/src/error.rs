//! Error types for recurrence rules.

use thiserror::Error;

/// Errors that can occur while parsing or evaluating a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The rule text is not one of the supported forms.
    #[error("invalid schedule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },

    /// A duration such as `5m` or `2 hours` could not be parsed.
    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    /// Unknown IANA time zone name.
    #[error("unknown time zone: {0}")]
    UnknownTimeZone(String),

    /// The rule has no matching instant in the searchable future.
    #[error("schedule '{0}' never matches")]
    NoMatch(String),
}

impl ScheduleError {
    pub(crate) fn invalid(rule: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            rule: rule.to_string(),
            reason: reason.into(),
        }
    }
}
