//! One execution of a whole job: its action runs and their ordering.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use cadence_graph::ActionGraph;

use crate::action_run::ActionRun;
use crate::command::RunCommand;
use crate::context::CommandContext;
use crate::error::Rejection;
use crate::executor::{Dispatch, ExecutionOutcome, StopSignal};
use crate::id::JobRunId;
use crate::node::Node;
use crate::snapshot::JobRunSnapshot;
use crate::state::{ActionEvent, ActionRunState, JobRunState};
use crate::trigger::TriggerBus;

/// What a job run needs from the outside while it changes state.
pub(crate) struct RunEnv<'a> {
    pub now: DateTime<Utc>,
    pub dispatch: &'a mut dyn Dispatch,
    pub triggers: &'a mut TriggerBus,
}

/// Per-job settings copied into each run.
#[derive(Debug, Clone)]
pub(crate) struct RunSettings {
    pub namespace: String,
    pub time_zone: Tz,
    pub globals: Arc<BTreeMap<String, String>>,
    pub max_runtime: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct JobRun {
    id: JobRunId,
    run_time: DateTime<Utc>,
    match_time: Option<DateTime<Utc>>,
    node: Node,
    manual: bool,
    pending_timer: bool,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    action_runs: Vec<ActionRun>,
    cleanup: Option<usize>,
    settings: RunSettings,
    overdue_reported: bool,
}

impl JobRun {
    pub(crate) fn new(
        id: JobRunId,
        run_time: DateTime<Utc>,
        node: Node,
        graph: &ActionGraph,
        action_nodes: Vec<Node>,
        settings: RunSettings,
    ) -> Self {
        let action_runs = graph
            .actions()
            .iter()
            .zip(action_nodes)
            .enumerate()
            .map(|(i, (action, node))| ActionRun::new(&id, action, graph.waiting_on(i), node))
            .collect();

        Self {
            id,
            run_time,
            match_time: None,
            node,
            manual: false,
            pending_timer: false,
            start_time: None,
            end_time: None,
            action_runs,
            cleanup: graph.cleanup(),
            settings,
            overdue_reported: false,
        }
    }

    /// Wait for the timer at `run_time`; `matched` is the unjittered schedule match.
    pub(crate) fn scheduled_for(mut self, matched: DateTime<Utc>) -> Self {
        self.match_time = Some(matched);
        self.pending_timer = true;
        self
    }

    pub(crate) fn manual(mut self) -> Self {
        self.manual = true;
        self
    }

    pub fn id(&self) -> &JobRunId {
        &self.id
    }

    pub fn run_num(&self) -> u64 {
        self.id.run_num
    }

    pub fn run_time(&self) -> DateTime<Utc> {
        self.run_time
    }

    pub fn match_time(&self) -> Option<DateTime<Utc>> {
        self.match_time
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn is_manual(&self) -> bool {
        self.manual
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn action_runs(&self) -> &[ActionRun] {
        &self.action_runs
    }

    pub fn action_run(&self, name: &str) -> Option<&ActionRun> {
        self.action_runs.iter().find(|a| a.name() == name)
    }

    pub(crate) fn action_index(&self, name: &str) -> Option<usize> {
        self.action_runs.iter().position(|a| a.name() == name)
    }

    pub fn state(&self) -> JobRunState {
        let all: Vec<ActionRunState> = self.action_runs.iter().map(|a| a.state()).collect();
        let regular: Vec<ActionRunState> = self
            .action_runs
            .iter()
            .filter(|a| !a.is_cleanup())
            .map(|a| a.state())
            .collect();
        JobRunState::aggregate(&all, &regular)
    }

    /// Waiting for its scheduled time.
    pub fn is_pending_timer(&self) -> bool {
        self.pending_timer
    }

    pub fn is_started(&self) -> bool {
        self.start_time.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    /// Fired, but held back behind an unfinished earlier run.
    pub fn is_waiting_for_predecessor(&self) -> bool {
        !self.pending_timer && self.start_time.is_none() && self.end_time.is_none()
    }

    fn regular_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.action_runs.len()).filter(|i| Some(*i) != self.cleanup)
    }

    /// Pending behind a requirement that has not completed.
    fn is_blocked(&self, index: usize) -> bool {
        let run = &self.action_runs[index];
        run.state().is_pending()
            && run
                .required()
                .iter()
                .any(|r| !self.action_runs[*r].state().is_complete())
    }

    /// Nothing is active and every regular action is done or blocked.
    pub fn is_done(&self) -> bool {
        !self.action_runs.iter().any(|a| a.state().is_active())
            && self
                .regular_indices()
                .all(|i| self.action_runs[i].state().is_done() || self.is_blocked(i))
    }

    fn cleanup_job_status(&self) -> &'static str {
        let regular: Vec<ActionRunState> = self
            .regular_indices()
            .map(|i| self.action_runs[i].state())
            .collect();
        if regular.iter().all(|s| s.is_complete()) {
            "SUCCESS"
        } else if regular.contains(&ActionRunState::Failed) {
            "FAILURE"
        } else {
            "UNKNOWN"
        }
    }

    pub(crate) fn context(&self, index: usize) -> CommandContext {
        let action = &self.action_runs[index];
        let job = self.id.job.as_str();
        CommandContext::new(self.run_time.with_timezone(&self.settings.time_zone))
            .with_globals(self.settings.globals.clone())
            .with("runid", self.id.to_string())
            .with("name", job)
            .with("jobname", job)
            .with("namespace", self.settings.namespace.as_str())
            .with("actionname", action.name())
            .with("node", action.node().hostname.as_str())
            .with("cleanup_job_status", self.cleanup_job_status())
    }

    fn triggers_ready(&self, index: usize, triggers: &TriggerBus) -> bool {
        let run = &self.action_runs[index];
        if run.triggered_by().is_empty() {
            return true;
        }
        let context = self.context(index);
        run.triggered_by()
            .iter()
            .all(|pattern| match context.render(pattern) {
                Ok(name) => triggers.is_published(&name),
                Err(e) => {
                    warn!(action_run = %run.id(), trigger = %pattern, error = %e, "trigger failed to render");
                    false
                }
            })
    }

    /// Queue the action and start it if its requirements and triggers are met.
    pub(crate) fn attempt_start(&mut self, index: usize, env: &mut RunEnv<'_>) -> bool {
        let state = self.action_runs[index].state();
        if !self.is_started() || !state.is_pending() || self.action_runs[index].is_cleanup() {
            return false;
        }
        if state == ActionRunState::Scheduled
            && self.action_runs[index].apply(ActionEvent::Queue).is_err()
        {
            return false;
        }
        if self.is_blocked(index) || !self.triggers_ready(index, env.triggers) {
            debug!(action_run = %self.action_runs[index].id(), "action run waiting");
            return false;
        }
        self.start_action(index, env)
    }

    fn start_action(&mut self, index: usize, env: &mut RunEnv<'_>) -> bool {
        let context = self.context(index);
        match self.action_runs[index].start(&context, env.now, env.dispatch) {
            Ok(()) => {
                // A skipped failure can release dependents of a finished run.
                if self.end_time.take().is_some() {
                    info!(job_run = %self.id, "job run reopened");
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "could not start action run");
                false
            }
        }
    }

    /// Release the run: start every action whose requirements and triggers are met.
    ///
    /// Returns true if the run finished immediately.
    pub(crate) fn start(&mut self, env: &mut RunEnv<'_>) -> bool {
        if self.is_started() || self.is_finished() {
            return false;
        }
        self.pending_timer = false;
        self.start_time = Some(env.now);
        info!(
            job_run = %self.id,
            node = %self.node.name,
            manual = self.manual,
            "starting job run"
        );

        let indices: Vec<usize> = self.regular_indices().collect();
        for index in indices {
            self.attempt_start(index, env);
        }
        self.settle(env)
    }

    /// Hold the run behind an unfinished predecessor.
    pub(crate) fn queue(&mut self) {
        self.pending_timer = false;
        for run in &mut self.action_runs {
            if run.state() == ActionRunState::Scheduled {
                let _ = run.apply(ActionEvent::Queue);
            }
        }
        info!(job_run = %self.id, "job run queued behind an unfinished run");
    }

    /// Cancel every pending action run and ask active ones to stop.
    ///
    /// Returns true if the run finished.
    pub(crate) fn cancel(&mut self, env: &mut RunEnv<'_>) -> bool {
        let started = self.is_started();
        let mut cancelled = 0;
        let mut stopped = 0;
        for run in &mut self.action_runs {
            if started && run.is_cleanup() {
                continue;
            }
            if run.state().is_active() {
                run.disable_retries();
                env.dispatch.signal(run.id(), StopSignal::Stop);
                stopped += 1;
            } else if run.state().is_pending() && run.cancel(env.now).is_ok() {
                cancelled += 1;
            }
        }
        self.pending_timer = false;
        info!(job_run = %self.id, cancelled, stopped, "cancelled job run");
        self.settle(env)
    }

    /// Start the cleanup action or finish the run once nothing else can progress.
    ///
    /// Returns true if the run finished.
    pub(crate) fn settle(&mut self, env: &mut RunEnv<'_>) -> bool {
        if self.is_finished() || !self.is_done() {
            return false;
        }

        if let Some(cleanup) = self.cleanup {
            let state = self.action_runs[cleanup].state();
            if state.is_active() {
                return false;
            }
            if state.is_pending() {
                if self.is_started() {
                    info!(
                        job_run = %self.id,
                        status = self.cleanup_job_status(),
                        "starting cleanup action"
                    );
                    if self.start_action(cleanup, env) {
                        return false;
                    }
                } else {
                    let _ = self.action_runs[cleanup].cancel(env.now);
                }
            }
        }

        self.pending_timer = false;
        self.end_time = Some(env.now);
        info!(job_run = %self.id, state = %self.state(), "job run finished");
        true
    }

    pub(crate) fn handle_started(&mut self, index: usize) -> Result<(), Rejection> {
        self.action_runs[index].mark_started()
    }

    /// Apply an executor outcome. Returns true if the run finished.
    pub(crate) fn handle_outcome(
        &mut self,
        index: usize,
        outcome: ExecutionOutcome,
        env: &mut RunEnv<'_>,
    ) -> Result<bool, Rejection> {
        let context = self.context(index);
        let state = self.action_runs[index].finish(outcome, &context, env.now, env.dispatch)?;
        if state == ActionRunState::Succeeded {
            self.on_complete(index, env, true);
        }
        Ok(self.settle(env))
    }

    /// Publish triggers and wake the actions that were waiting on `index`.
    fn on_complete(&mut self, index: usize, env: &mut RunEnv<'_>, publish: bool) {
        if publish {
            let context = self.context(index);
            for template in self.action_runs[index].publishes() {
                match context.render(template) {
                    Ok(name) => env.triggers.publish(name, env.now),
                    Err(e) => {
                        warn!(action_run = %self.action_runs[index].id(), error = %e, "trigger failed to render")
                    }
                }
            }
        }
        let waiting = self.action_runs[index].waiting().to_vec();
        for dependent in waiting {
            self.attempt_start(dependent, env);
        }
    }

    /// Retry queued actions after new triggers were published.
    pub(crate) fn retry_queued(&mut self, env: &mut RunEnv<'_>) -> bool {
        if !self.is_started() || self.is_finished() {
            return false;
        }
        let queued: Vec<usize> = self
            .regular_indices()
            .filter(|i| self.action_runs[*i].state() == ActionRunState::Queued)
            .collect();
        for index in queued {
            self.attempt_start(index, env);
        }
        self.settle(env)
    }

    fn illegal(&self, target: String, command: RunCommand, state: String) -> Rejection {
        Rejection::IllegalTransition {
            target,
            command: command.to_string(),
            state,
        }
    }

    /// Operator command on one action run. Returns a message and whether the run finished.
    pub(crate) fn command_action(
        &mut self,
        index: usize,
        command: RunCommand,
        env: &mut RunEnv<'_>,
    ) -> Result<(String, bool), Rejection> {
        let id = self.action_runs[index].id().clone();
        let state = self.action_runs[index].state();
        let now = env.now;

        match command {
            RunCommand::Start => {
                if !state.is_pending() {
                    return Err(self.illegal(id.to_string(), command, state.to_string()));
                }
                if !self.is_started() {
                    self.start(env);
                }
                if self.action_runs[index].state().is_pending() {
                    let context = self.context(index);
                    self.action_runs[index].start(&context, now, env.dispatch)?;
                }
            }
            RunCommand::Succeed => {
                self.action_runs[index].force(ActionEvent::Succeed, now)?;
                self.on_complete(index, env, true);
            }
            RunCommand::Fail => self.action_runs[index].force(ActionEvent::Fail, now)?,
            RunCommand::Cancel => self.action_runs[index].cancel(now)?,
            RunCommand::Skip => {
                self.action_runs[index].apply(ActionEvent::Skip)?;
                self.on_complete(index, env, false);
            }
            RunCommand::Stop | RunCommand::Kill => {
                if !state.is_active() {
                    return Err(self.illegal(id.to_string(), command, state.to_string()));
                }
                self.action_runs[index].disable_retries();
                env.dispatch.signal(&id, stop_signal(command));
            }
        }

        info!(action_run = %id, command = %command, "operator command applied");
        let finished = self.settle(env);
        Ok((format!("{command} {id}: now {}", self.action_runs[index].state()), finished))
    }

    /// Operator command on the whole run. Returns a message and whether the run finished.
    pub(crate) fn command_run(
        &mut self,
        command: RunCommand,
        env: &mut RunEnv<'_>,
    ) -> Result<(String, bool), Rejection> {
        let selector: fn(ActionRunState) -> bool = match command {
            RunCommand::Start => |_| true,
            RunCommand::Succeed | RunCommand::Fail => {
                |s| s.is_pending() || s == ActionRunState::Unknown
            }
            RunCommand::Cancel => |s| s.is_pending() || s.is_active(),
            RunCommand::Skip => |s| matches!(s, ActionRunState::Failed | ActionRunState::Cancelled),
            RunCommand::Stop | RunCommand::Kill => |s| s.is_active(),
        };
        let targets: Vec<usize> = self
            .regular_indices()
            .filter(|i| selector(self.action_runs[*i].state()))
            .collect();

        let runnable = match command {
            RunCommand::Start => !self.is_started() && !self.is_finished(),
            RunCommand::Cancel => !self.is_finished(),
            _ => !targets.is_empty(),
        };
        if !runnable {
            return Err(self.illegal(self.id.to_string(), command, self.state().to_string()));
        }

        let mut finished = false;
        match command {
            RunCommand::Start => finished = self.start(env),
            RunCommand::Cancel => finished = self.cancel(env),
            RunCommand::Succeed | RunCommand::Fail | RunCommand::Skip => {
                for &index in &targets {
                    let result = match command {
                        RunCommand::Succeed => self.action_runs[index].force(ActionEvent::Succeed, env.now),
                        RunCommand::Fail => self.action_runs[index].force(ActionEvent::Fail, env.now),
                        _ => self.action_runs[index].apply(ActionEvent::Skip).map(|_| ()),
                    };
                    if let Err(e) = result {
                        debug!(error = %e, "skipping action run");
                    }
                }
                if command != RunCommand::Fail {
                    for &index in &targets {
                        self.on_complete(index, env, command == RunCommand::Succeed);
                    }
                }
            }
            RunCommand::Stop | RunCommand::Kill => {
                for &index in &targets {
                    self.action_runs[index].disable_retries();
                    let id = self.action_runs[index].id().clone();
                    env.dispatch.signal(&id, stop_signal(command));
                }
            }
        }

        info!(job_run = %self.id, command = %command, "operator command applied");
        finished = finished || self.settle(env);
        Ok((format!("{command} {}: now {}", self.id, self.state()), finished))
    }

    /// Log runs that exceed their advisory runtimes, once each.
    pub(crate) fn check_overdue(&mut self, now: DateTime<Utc>) {
        if let (Some(limit), Some(started)) = (self.settings.max_runtime, self.start_time) {
            if !self.overdue_reported && !self.is_finished() && now - started > limit {
                self.overdue_reported = true;
                warn!(
                    job_run = %self.id,
                    max_runtime_secs = limit.num_seconds(),
                    "job run exceeded max runtime"
                );
            }
        }
        for run in &mut self.action_runs {
            if run.check_overdue(now) {
                warn!(action_run = %run.id(), "action run exceeded expected runtime");
            }
        }
    }

    pub(crate) fn snapshot(&self) -> JobRunSnapshot {
        JobRunSnapshot {
            id: self.id.clone(),
            run_time: self.run_time,
            match_time: self.match_time,
            node: self.node.name.clone(),
            manual: self.manual,
            pending_timer: self.pending_timer,
            start_time: self.start_time,
            end_time: self.end_time,
            state: self.state(),
            action_runs: self.action_runs.iter().map(ActionRun::snapshot).collect(),
        }
    }

    /// Lay a recorded run over this freshly built one.
    ///
    /// Actions no longer defined are dropped. Actions added since a finished
    /// run was recorded are marked cancelled.
    pub(crate) fn restore(mut self, snapshot: &JobRunSnapshot, now: DateTime<Utc>) -> Self {
        self.match_time = snapshot.match_time;
        self.manual = snapshot.manual;
        self.pending_timer = snapshot.pending_timer;
        self.start_time = snapshot.start_time;
        self.end_time = snapshot.end_time;

        for recorded in &snapshot.action_runs {
            match self.action_runs.iter_mut().find(|a| a.name() == recorded.id.action) {
                Some(run) => run.restore(recorded, now),
                None => debug!(action_run = %recorded.id, "dropping action run that is no longer defined"),
            }
        }

        if self.is_finished() {
            for run in &mut self.action_runs {
                if run.state() == ActionRunState::Scheduled {
                    let _ = run.cancel(now);
                }
            }
        } else if !self.is_started() && !self.pending_timer {
            for run in &mut self.action_runs {
                if run.state() == ActionRunState::Scheduled {
                    let _ = run.apply(ActionEvent::Queue);
                }
            }
        }
        self
    }
}

fn stop_signal(command: RunCommand) -> StopSignal {
    match command {
        RunCommand::Kill => StopSignal::Kill,
        _ => StopSignal::Stop,
    }
}
