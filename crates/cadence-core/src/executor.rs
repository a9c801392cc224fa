//! Seams between the engine and the outside world.
//!
//! The engine itself never blocks: it hands launch and signal requests to a
//! [`Dispatch`] and learns about their results as events. The event loop
//! implements [`Dispatch`] on top of an async [`Executor`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::id::ActionRunId;
use crate::node::Node;
use crate::snapshot::StateSnapshot;

/// A rendered command ready to run on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub id: ActionRunId,
    pub command: String,
    pub node: Node,
}

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    /// The command ran and exited with this status.
    Exited(i32),
    /// The command could not be started at all.
    FailedToStart(String),
    /// Contact with the execution was lost; its result is unknown.
    Lost(String),
}

/// Advisory signals for a running action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Stop,
    Kill,
}

/// Runs commands. Implementations decide how and where.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `request` to completion.
    async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome;

    /// Ask a running execution to stop. Best effort.
    async fn signal(&self, id: &ActionRunId, signal: StopSignal);
}

/// Synchronous sink for the engine's side effects.
pub trait Dispatch {
    fn launch(&mut self, request: ExecutionRequest);
    fn signal(&mut self, id: &ActionRunId, signal: StopSignal);
}

/// Persists engine state between restarts.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<Option<StateSnapshot>, EngineError>;
    async fn save(&self, snapshot: &StateSnapshot) -> Result<(), EngineError>;
}

/// A [`Dispatch`] that records requests instead of acting on them.
#[derive(Debug, Default)]
pub struct RecordingDispatch {
    pub launched: Vec<ExecutionRequest>,
    pub signalled: Vec<(ActionRunId, StopSignal)>,
}

impl RecordingDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain recorded launches.
    pub fn take_launched(&mut self) -> Vec<ExecutionRequest> {
        std::mem::take(&mut self.launched)
    }

    pub fn launched_ids(&self) -> Vec<String> {
        self.launched.iter().map(|r| r.id.to_string()).collect()
    }
}

impl Dispatch for RecordingDispatch {
    fn launch(&mut self, request: ExecutionRequest) {
        self.launched.push(request);
    }

    fn signal(&mut self, id: &ActionRunId, signal: StopSignal) {
        self.signalled.push((id.clone(), signal));
    }
}
