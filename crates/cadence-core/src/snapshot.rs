//! Serializable engine state.
//!
//! Only runtime state is captured. Definitions always come from the current
//! configuration, and a restored run is rebuilt against the current action
//! graph before its recorded state is laid over it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ActionRunId, JobRunId};
use crate::state::{ActionRunState, JobRunState};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub jobs: Vec<JobSnapshot>,
    #[serde(default)]
    pub triggers: BTreeMap<String, DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub last_fired_match: Option<DateTime<Utc>>,
    #[serde(default)]
    pub node_cursor: usize,
    /// Newest first.
    #[serde(default)]
    pub runs: Vec<JobRunSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRunSnapshot {
    pub id: JobRunId,
    pub run_time: DateTime<Utc>,
    #[serde(default)]
    pub match_time: Option<DateTime<Utc>>,
    pub node: String,
    #[serde(default)]
    pub manual: bool,
    #[serde(default)]
    pub pending_timer: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Recorded for readers of the file; recomputed on restore.
    pub state: JobRunState,
    pub action_runs: Vec<ActionRunSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRunSnapshot {
    pub id: ActionRunId,
    pub state: ActionRunState,
    pub node: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_status: Option<i32>,
    #[serde(default)]
    pub exit_statuses: Vec<i32>,
    #[serde(default)]
    pub retries_remaining: u32,
    #[serde(default)]
    pub rendered_command: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}
