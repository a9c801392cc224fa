//! Job runs, their state machines and the event loop that drives them.
//!
//! The crate is split in two layers:
//! - [`JobRegistry`] is a synchronous state machine. Every entry point takes
//!   the current time and a [`Dispatch`] that receives launch and signal
//!   requests, so scheduling, dependency and recovery behavior can be tested
//!   without a runtime.
//! - [`Scheduler`] owns a registry on a tokio task, turns timer wakeups,
//!   executor reports and operator commands into registry calls, and
//!   persists a [`StateSnapshot`] after every change.

mod action_run;
mod command;
mod context;
mod error;
mod executor;
mod id;
mod job;
mod job_run;
mod node;
mod registry;
mod runtime;
mod snapshot;
mod state;
mod trigger;

pub use action_run::ActionRun;
pub use command::{JobCommand, OperatorCommand, RunCommand};
pub use context::{CommandContext, FAILED_RENDER};
pub use error::{EngineError, Rejection, RenderError};
pub use executor::{
    Dispatch, ExecutionOutcome, ExecutionRequest, Executor, RecordingDispatch, StateStore, StopSignal,
};
pub use id::{ActionRunId, JobRunId, Target};
pub use job::Job;
pub use job_run::JobRun;
pub use node::{Node, NodeCatalog, NodePool};
pub use registry::{Configuration, JobRegistry, ReconfigureSummary};
pub use runtime::{Scheduler, SchedulerHandle};
pub use snapshot::{ActionRunSnapshot, JobRunSnapshot, JobSnapshot, SNAPSHOT_VERSION, StateSnapshot};
pub use state::{ActionEvent, ActionRunState, JobRunState};
pub use trigger::{TRIGGER_RETENTION_DAYS, TriggerBus};
