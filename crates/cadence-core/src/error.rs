//! Error types for the execution engine.

use cadence_graph::ConfigError;
use cadence_schedule::ScheduleError;
use thiserror::Error;

/// Errors from engine plumbing: configuration, snapshots and the state store.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Definitions failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A schedule could not produce a run time.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// Snapshot (de)serialization failed.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The state store failed.
    #[error("state store error: {0}")]
    Store(String),

    /// The event loop has shut down.
    #[error("scheduler is not running")]
    Unavailable,
}

/// Why an operator command was refused. Never fatal to the event loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// No job has this name.
    #[error("unknown job: {0}")]
    UnknownJob(String),

    /// No run has this id.
    #[error("unknown job run: {0}")]
    UnknownJobRun(String),

    /// No action run has this id.
    #[error("unknown action run: {0}")]
    UnknownActionRun(String),

    /// The command is not legal in the target's current state.
    #[error("cannot {command} {target}: it is {state}")]
    IllegalTransition {
        target: String,
        command: String,
        state: String,
    },

    /// The target string does not name a job, job run, or action run.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// The event loop is not running.
    #[error("scheduler is not running")]
    Unavailable,
}

/// A command template could not be rendered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// `{token}` is not a known context variable.
    #[error("unknown token: {{{0}}}")]
    UnknownToken(String),

    /// A `{` has no closing `}`.
    #[error("unclosed token in: {0}")]
    Unclosed(String),

    /// A `}` appears with no opening `{`.
    #[error("unmatched '}}' in: {0}")]
    Unmatched(String),

    /// A date offset moved outside the representable range.
    #[error("date offset out of range: {{{0}}}")]
    OutOfRange(String),
}
