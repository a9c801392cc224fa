//! One execution of one action within a job run.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use cadence_graph::GraphAction;

use crate::context::{CommandContext, FAILED_RENDER};
use crate::error::Rejection;
use crate::executor::{Dispatch, ExecutionOutcome, ExecutionRequest};
use crate::id::{ActionRunId, JobRunId};
use crate::node::Node;
use crate::snapshot::ActionRunSnapshot;
use crate::state::{ActionEvent, ActionRunState};

#[derive(Debug, Clone)]
pub struct ActionRun {
    id: ActionRunId,
    state: ActionRunState,
    command: String,
    rendered_command: Option<String>,
    node: Node,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    exit_status: Option<i32>,
    exit_statuses: Vec<i32>,
    retries_remaining: u32,
    failure_reason: Option<String>,
    is_cleanup: bool,
    triggered_by: Vec<String>,
    publishes: Vec<String>,
    /// Positions of sibling runs this one requires.
    required: Vec<usize>,
    /// Positions of sibling runs that require this one.
    waiting: Vec<usize>,
    expected_runtime: Option<Duration>,
    overdue_reported: bool,
}

impl ActionRun {
    pub(crate) fn new(run: &JobRunId, action: &GraphAction, waiting: Vec<usize>, node: Node) -> Self {
        let definition = &action.definition;
        Self {
            id: run.action(definition.name.clone()),
            state: ActionRunState::Scheduled,
            command: definition.command.clone(),
            rendered_command: None,
            node,
            start_time: None,
            end_time: None,
            exit_status: None,
            exit_statuses: Vec::new(),
            retries_remaining: definition.retries,
            failure_reason: None,
            is_cleanup: action.is_cleanup,
            triggered_by: definition.triggered_by.clone(),
            publishes: definition
                .trigger_downstreams
                .templates(&action.qualified_name),
            required: action.required.clone(),
            waiting,
            expected_runtime: definition.expected_runtime,
            overdue_reported: false,
        }
    }

    pub fn id(&self) -> &ActionRunId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.id.action
    }

    pub fn state(&self) -> ActionRunState {
        self.state
    }

    /// The unrendered command template.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn rendered_command(&self) -> Option<&str> {
        self.rendered_command.as_deref()
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    /// Exit statuses of attempts that were retried.
    pub fn exit_statuses(&self) -> &[i32] {
        &self.exit_statuses
    }

    pub fn retries_remaining(&self) -> u32 {
        self.retries_remaining
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn is_cleanup(&self) -> bool {
        self.is_cleanup
    }

    pub fn required(&self) -> &[usize] {
        &self.required
    }

    pub fn waiting(&self) -> &[usize] {
        &self.waiting
    }

    pub(crate) fn triggered_by(&self) -> &[String] {
        &self.triggered_by
    }

    pub(crate) fn publishes(&self) -> &[String] {
        &self.publishes
    }

    pub(crate) fn apply(&mut self, event: ActionEvent) -> Result<ActionRunState, Rejection> {
        let next = self
            .state
            .next(event)
            .ok_or_else(|| Rejection::IllegalTransition {
                target: self.id.to_string(),
                command: event.as_str().to_string(),
                state: self.state.to_string(),
            })?;
        debug!(action_run = %self.id, from = %self.state, to = %next, "action run transition");
        self.state = next;
        Ok(next)
    }

    /// Move to starting and hand the rendered command to `dispatch`.
    pub(crate) fn start(
        &mut self,
        context: &CommandContext,
        now: DateTime<Utc>,
        dispatch: &mut dyn Dispatch,
    ) -> Result<(), Rejection> {
        self.apply(ActionEvent::Start)?;
        self.launch(context, now, dispatch);
        Ok(())
    }

    fn launch(&mut self, context: &CommandContext, now: DateTime<Utc>, dispatch: &mut dyn Dispatch) {
        let command = match context.render(&self.command) {
            Ok(command) => command,
            Err(e) => {
                warn!(action_run = %self.id, error = %e, "command failed to render");
                FAILED_RENDER.to_string()
            }
        };
        info!(action_run = %self.id, node = %self.node.name, "starting action run");

        self.rendered_command = Some(command.clone());
        self.start_time = Some(now);
        self.end_time = None;
        self.exit_status = None;
        self.overdue_reported = false;
        dispatch.launch(ExecutionRequest {
            id: self.id.clone(),
            command,
            node: self.node.clone(),
        });
    }

    pub(crate) fn mark_started(&mut self) -> Result<(), Rejection> {
        self.apply(ActionEvent::Started).map(|_| ())
    }

    /// Apply an executor outcome, relaunching if retries remain.
    pub(crate) fn finish(
        &mut self,
        outcome: ExecutionOutcome,
        context: &CommandContext,
        now: DateTime<Utc>,
        dispatch: &mut dyn Dispatch,
    ) -> Result<ActionRunState, Rejection> {
        if !(self.state.is_active() || self.state == ActionRunState::Unknown) {
            return Err(Rejection::IllegalTransition {
                target: self.id.to_string(),
                command: "record outcome for".to_string(),
                state: self.state.to_string(),
            });
        }
        // An exit status means the command ran, even if no start was reported.
        if self.state == ActionRunState::Starting && matches!(outcome, ExecutionOutcome::Exited(_)) {
            self.apply(ActionEvent::Started)?;
        }

        match outcome {
            ExecutionOutcome::Exited(0) => {
                self.apply(ActionEvent::Succeed)?;
                self.exit_status = Some(0);
                self.end_time = Some(now);
                info!(action_run = %self.id, "action run succeeded");
            }
            ExecutionOutcome::Exited(code) => {
                self.fail_or_retry(Some(code), None, context, now, dispatch)?;
            }
            ExecutionOutcome::FailedToStart(reason) => {
                self.fail_or_retry(None, Some(reason), context, now, dispatch)?;
            }
            ExecutionOutcome::Lost(reason) => {
                self.apply(ActionEvent::FailUnknown)?;
                warn!(action_run = %self.id, reason = %reason, "lost track of action run");
                self.failure_reason = Some(reason);
            }
        }
        Ok(self.state)
    }

    fn fail_or_retry(
        &mut self,
        code: Option<i32>,
        reason: Option<String>,
        context: &CommandContext,
        now: DateTime<Utc>,
        dispatch: &mut dyn Dispatch,
    ) -> Result<(), Rejection> {
        if self.retries_remaining > 0 && self.state.is_active() {
            self.apply(ActionEvent::Retry)?;
            self.retries_remaining -= 1;
            self.exit_statuses.push(code.unwrap_or(-1));
            info!(
                action_run = %self.id,
                exit_status = ?code,
                retries_remaining = self.retries_remaining,
                "retrying action run"
            );
            self.launch(context, now, dispatch);
            return Ok(());
        }

        self.apply(ActionEvent::Fail)?;
        self.exit_status = code;
        self.end_time = Some(now);
        match &reason {
            Some(reason) => warn!(action_run = %self.id, reason = %reason, "action run failed to start"),
            None => warn!(action_run = %self.id, exit_status = ?code, "action run failed"),
        }
        self.failure_reason = reason;
        Ok(())
    }

    /// Operator override to succeeded or failed; only from unknown, queued or scheduled.
    pub(crate) fn force(&mut self, event: ActionEvent, now: DateTime<Utc>) -> Result<(), Rejection> {
        if !(self.state.is_pending() || self.state == ActionRunState::Unknown) {
            return Err(Rejection::IllegalTransition {
                target: self.id.to_string(),
                command: event.as_str().to_string(),
                state: self.state.to_string(),
            });
        }
        self.apply(event)?;
        self.end_time = Some(now);
        Ok(())
    }

    pub(crate) fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), Rejection> {
        self.apply(ActionEvent::Cancel)?;
        self.end_time = Some(now);
        Ok(())
    }

    pub(crate) fn disable_retries(&mut self) {
        self.retries_remaining = 0;
    }

    /// True the first time an active run exceeds its expected runtime.
    pub(crate) fn check_overdue(&mut self, now: DateTime<Utc>) -> bool {
        let (Some(expected), Some(started)) = (self.expected_runtime, self.start_time) else {
            return false;
        };
        if self.overdue_reported || !self.state.is_active() || now - started <= expected {
            return false;
        }
        self.overdue_reported = true;
        true
    }

    pub(crate) fn snapshot(&self) -> ActionRunSnapshot {
        ActionRunSnapshot {
            id: self.id.clone(),
            state: self.state,
            node: self.node.name.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            exit_status: self.exit_status,
            exit_statuses: self.exit_statuses.clone(),
            retries_remaining: self.retries_remaining,
            rendered_command: self.rendered_command.clone(),
            failure_reason: self.failure_reason.clone(),
        }
    }

    /// Lay recorded state over a freshly built run.
    ///
    /// Nothing survives a restart mid-flight: running becomes unknown and
    /// starting becomes failed.
    pub(crate) fn restore(&mut self, snapshot: &ActionRunSnapshot, now: DateTime<Utc>) {
        self.state = snapshot.state;
        self.start_time = snapshot.start_time;
        self.end_time = snapshot.end_time;
        self.exit_status = snapshot.exit_status;
        self.exit_statuses = snapshot.exit_statuses.clone();
        self.retries_remaining = snapshot.retries_remaining;
        self.rendered_command = snapshot.rendered_command.clone();
        self.failure_reason = snapshot.failure_reason.clone();

        match self.state {
            ActionRunState::Running => {
                warn!(action_run = %self.id, "action run was running at shutdown, marking unknown");
                self.state = ActionRunState::Unknown;
                self.failure_reason = Some("scheduler restarted while running".to_string());
                self.end_time = Some(now);
            }
            ActionRunState::Starting => {
                warn!(action_run = %self.id, "action run was starting at shutdown, marking failed");
                self.state = ActionRunState::Failed;
                self.failure_reason = Some("scheduler restarted while starting".to_string());
                self.end_time = Some(now);
            }
            _ => {}
        }
    }
}
