//! Operator commands.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::Rejection;
use crate::id::{ActionRunId, JobRunId, Target};

/// Commands for a job run or a single action run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCommand {
    /// Start now, bypassing requirements and triggers.
    Start,
    Succeed,
    Fail,
    Cancel,
    Skip,
    /// Ask the executor to stop; retries are disabled.
    Stop,
    /// Ask the executor to kill; retries are disabled.
    Kill,
}

/// Commands for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCommand {
    /// Create a manual run at `run_time`, or now.
    Start { run_time: Option<DateTime<Utc>> },
    Enable,
    Disable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Job { name: String, command: JobCommand },
    JobRun { id: JobRunId, command: RunCommand },
    ActionRun { id: ActionRunId, command: RunCommand },
}

impl OperatorCommand {
    /// Build a command from a verb such as `cancel` and a target id.
    pub fn parse(verb: &str, target: &str) -> Result<Self, Rejection> {
        let unknown = || Rejection::InvalidTarget(format!("{verb} {target}"));
        Ok(match target.parse::<Target>()? {
            Target::Job(name) => {
                let command = match verb {
                    "start" => JobCommand::Start { run_time: None },
                    "enable" => JobCommand::Enable,
                    "disable" => JobCommand::Disable,
                    _ => return Err(unknown()),
                };
                Self::Job { name, command }
            }
            Target::JobRun(id) => Self::JobRun {
                id,
                command: verb.parse().map_err(|_| unknown())?,
            },
            Target::ActionRun(id) => Self::ActionRun {
                id,
                command: verb.parse().map_err(|_| unknown())?,
            },
        })
    }

    pub fn target(&self) -> String {
        match self {
            Self::Job { name, .. } => name.clone(),
            Self::JobRun { id, .. } => id.to_string(),
            Self::ActionRun { id, .. } => id.to_string(),
        }
    }
}

impl RunCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Succeed => "succeed",
            Self::Fail => "fail",
            Self::Cancel => "cancel",
            Self::Skip => "skip",
            Self::Stop => "stop",
            Self::Kill => "kill",
        }
    }
}

impl fmt::Display for RunCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunCommand {
    type Err = Rejection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "start" => Self::Start,
            "succeed" | "success" => Self::Succeed,
            "fail" => Self::Fail,
            "cancel" => Self::Cancel,
            "skip" => Self::Skip,
            "stop" => Self::Stop,
            "kill" => Self::Kill,
            _ => return Err(Rejection::InvalidTarget(s.to_string())),
        })
    }
}
