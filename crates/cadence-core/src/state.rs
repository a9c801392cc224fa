//! State and transition table for action runs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The state of one action run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionRunState {
    /// Created with its job run; not yet released.
    Scheduled,
    /// Released but waiting on requirements, triggers, or a predecessor run.
    Queued,
    /// Handed to an executor; no confirmation yet.
    Starting,
    /// The executor confirmed the command is running.
    Running,
    /// Exited zero, or forced by an operator.
    Succeeded,
    /// Exited non-zero with no retries left, failed to start, or forced.
    Failed,
    /// Never started; the run was cancelled or could not overlap.
    Cancelled,
    /// Failed or cancelled, then waved through by an operator.
    Skipped,
    /// Outcome unconfirmed, e.g. lost contact with the executor.
    Unknown,
}

/// Inputs to the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionEvent {
    Queue,
    Schedule,
    Start,
    Started,
    Succeed,
    Fail,
    FailUnknown,
    Cancel,
    Skip,
    Retry,
}

impl ActionEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Schedule => "schedule",
            Self::Start => "start",
            Self::Started => "mark started",
            Self::Succeed => "succeed",
            Self::Fail => "fail",
            Self::FailUnknown => "mark unknown",
            Self::Cancel => "cancel",
            Self::Skip => "skip",
            Self::Retry => "retry",
        }
    }
}

impl ActionRunState {
    /// The state after `event`, or `None` if `event` is illegal here.
    pub fn next(self, event: ActionEvent) -> Option<Self> {
        use ActionEvent as E;
        use ActionRunState as S;

        match (self, event) {
            (S::Scheduled, E::Queue) => Some(S::Queued),
            (S::Queued, E::Schedule) => Some(S::Scheduled),
            (S::Scheduled | S::Queued, E::Cancel) => Some(S::Cancelled),
            (S::Scheduled | S::Queued, E::Start) => Some(S::Starting),
            (S::Starting | S::Unknown, E::Started) => Some(S::Running),
            (S::Running | S::Unknown | S::Queued | S::Scheduled, E::Succeed) => Some(S::Succeeded),
            (S::Starting | S::Running | S::Unknown | S::Queued | S::Scheduled, E::Fail) => {
                Some(S::Failed)
            }
            (S::Starting | S::Running, E::FailUnknown) => Some(S::Unknown),
            (S::Starting | S::Running, E::Retry) => Some(S::Starting),
            (S::Failed | S::Cancelled, E::Skip) => Some(S::Skipped),
            _ => None,
        }
    }

    /// Succeeded or skipped: satisfies anything that requires it.
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }

    /// Failed, cancelled or unknown.
    pub fn is_broken(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Unknown)
    }

    /// No further progress without operator action.
    pub fn is_done(self) -> bool {
        self.is_complete() || self.is_broken()
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    pub fn is_pending(self) -> bool {
        matches!(self, Self::Scheduled | Self::Queued)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Queued => "queued",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ActionRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate state of a job run, derived from its action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRunState {
    Scheduled,
    Queued,
    Starting,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Unknown,
}

impl JobRunState {
    /// Derive the aggregate from every action state and the regular (non-cleanup) ones.
    pub fn aggregate(all: &[ActionRunState], regular: &[ActionRunState]) -> Self {
        use ActionRunState as S;

        if all.iter().any(|s| *s == S::Running) {
            Self::Running
        } else if all.iter().any(|s| *s == S::Starting) {
            Self::Starting
        } else if regular.iter().all(|s| s.is_complete()) {
            Self::Succeeded
        } else if regular.iter().any(|s| *s == S::Cancelled) {
            Self::Cancelled
        } else if regular.iter().any(|s| *s == S::Failed) {
            Self::Failed
        } else if regular.iter().any(|s| *s == S::Unknown) {
            Self::Unknown
        } else if all.iter().any(|s| *s == S::Scheduled) {
            Self::Scheduled
        } else if all.iter().any(|s| *s == S::Queued) {
            Self::Queued
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Queued => "queued",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for JobRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
