//! Identifiers for job runs and action runs.
//!
//! Job names are always qualified (`namespace.job`), so a job run id has
//! three dot-separated parts and an action run id has four.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Rejection;

/// `namespace.job.N`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobRunId {
    pub job: String,
    pub run_num: u64,
}

impl JobRunId {
    pub fn new(job: impl Into<String>, run_num: u64) -> Self {
        Self {
            job: job.into(),
            run_num,
        }
    }

    pub fn action(&self, name: impl Into<String>) -> ActionRunId {
        ActionRunId {
            run: self.clone(),
            action: name.into(),
        }
    }
}

impl fmt::Display for JobRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.job, self.run_num)
    }
}

impl FromStr for JobRunId {
    type Err = Rejection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [ns, job, num] if !ns.is_empty() && !job.is_empty() => {
                let run_num = num
                    .parse()
                    .map_err(|_| Rejection::InvalidTarget(s.to_string()))?;
                Ok(Self::new(format!("{ns}.{job}"), run_num))
            }
            _ => Err(Rejection::InvalidTarget(s.to_string())),
        }
    }
}

impl TryFrom<String> for JobRunId {
    type Error = Rejection;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<JobRunId> for String {
    fn from(id: JobRunId) -> Self {
        id.to_string()
    }
}

/// `namespace.job.N.action`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActionRunId {
    pub run: JobRunId,
    pub action: String,
}

impl fmt::Display for ActionRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.run, self.action)
    }
}

impl FromStr for ActionRunId {
    type Err = Rejection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('.') {
            Some((run, action)) if !action.is_empty() => Ok(Self {
                run: run.parse().map_err(|_| Rejection::InvalidTarget(s.to_string()))?,
                action: action.to_string(),
            }),
            _ => Err(Rejection::InvalidTarget(s.to_string())),
        }
    }
}

impl TryFrom<String> for ActionRunId {
    type Error = Rejection;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ActionRunId> for String {
    fn from(id: ActionRunId) -> Self {
        id.to_string()
    }
}

/// What an operator command addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Job(String),
    JobRun(JobRunId),
    ActionRun(ActionRunId),
}

impl FromStr for Target {
    type Err = Rejection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split('.').count() {
            2 if !s.starts_with('.') && !s.ends_with('.') => Ok(Self::Job(s.to_string())),
            3 => s.parse().map(Self::JobRun),
            4 => s.parse().map(Self::ActionRun),
            _ => Err(Rejection::InvalidTarget(s.to_string())),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Job(name) => f.write_str(name),
            Self::JobRun(id) => id.fmt(f),
            Self::ActionRun(id) => id.fmt(f),
        }
    }
}
