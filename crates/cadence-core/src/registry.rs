//! The set of configured jobs and every state change applied to them.
//!
//! [`JobRegistry`] is a plain synchronous state machine. Every entry point
//! takes the current time and a [`Dispatch`] for side effects, so the same
//! code runs under the event loop and in tests with a recording dispatch.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use cadence_graph::{ConfigError, ConfigIssue, JobDefinition, JobGraph};

use crate::action_run::ActionRun;
use crate::command::{JobCommand, OperatorCommand};
use crate::error::Rejection;
use crate::executor::{Dispatch, ExecutionOutcome};
use crate::id::{ActionRunId, JobRunId};
use crate::job::Job;
use crate::job_run::{JobRun, RunEnv};
use crate::node::NodeCatalog;
use crate::snapshot::{SNAPSHOT_VERSION, StateSnapshot};
use crate::trigger::TriggerBus;

/// Everything the scheduler is configured with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Node name to hostname.
    #[serde(default)]
    pub nodes: BTreeMap<String, String>,
    /// Pool name to member node names.
    #[serde(default)]
    pub node_pools: BTreeMap<String, Vec<String>>,
    /// Default zone for schedules and date tokens.
    #[serde(default)]
    pub time_zone: Option<Tz>,
    /// Variables available to every command template.
    #[serde(default)]
    pub command_context: BTreeMap<String, String>,
    #[serde(default)]
    pub jobs: Vec<JobDefinition>,
}

impl Configuration {
    pub fn catalog(&self) -> NodeCatalog {
        NodeCatalog::new(self.nodes.clone(), self.node_pools.clone())
    }
}

/// Validate `config` and build its jobs, collecting every problem.
fn compile(config: &Configuration) -> Result<(BTreeMap<String, Job>, NodeCatalog), ConfigError> {
    let catalog = config.catalog();
    for (pool, node) in catalog.dangling_members() {
        warn!(pool, node, "pool member is not a configured node");
    }

    let mut issues = Vec::new();
    let mut jobs = BTreeMap::new();
    match JobGraph::build(&config.jobs) {
        Ok(graph) => {
            let globals = Arc::new(config.command_context.clone());
            for definition in graph.jobs() {
                let name = definition.full_name();
                let Some(action_graph) = graph.project(&name) else {
                    continue;
                };
                match Job::new(
                    definition.clone(),
                    action_graph,
                    &catalog,
                    globals.clone(),
                    config.time_zone,
                ) {
                    Ok(job) => {
                        jobs.insert(name, job);
                    }
                    Err(found) => issues.extend(found),
                }
            }
        }
        Err(e) => {
            issues.extend(e.issues);
            for definition in &config.jobs {
                let nodes = std::iter::once(definition.node.as_str())
                    .chain(definition.all_actions().filter_map(|(a, _)| a.node.as_deref()));
                for node in nodes {
                    if !catalog.contains(node) {
                        issues.push(ConfigIssue::UnknownNode {
                            job: definition.full_name(),
                            node: node.to_string(),
                        });
                    }
                }
            }
        }
    }

    if !issues.is_empty() {
        return Err(ConfigError::new(issues));
    }
    Ok((jobs, catalog))
}

/// What a reconfiguration changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconfigureSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
    pub unchanged: Vec<String>,
}

#[derive(Debug)]
pub struct JobRegistry {
    jobs: BTreeMap<String, Job>,
    catalog: NodeCatalog,
    triggers: TriggerBus,
    dirty: bool,
}

impl JobRegistry {
    /// Validate `config` and build a registry with no run history.
    pub fn new(config: &Configuration) -> Result<Self, ConfigError> {
        let (jobs, catalog) = compile(config)?;
        info!(jobs = jobs.len(), "loaded job definitions");
        Ok(Self {
            jobs,
            catalog,
            triggers: TriggerBus::new(),
            dirty: false,
        })
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.get(name)
    }

    pub fn job_run(&self, id: &JobRunId) -> Option<&JobRun> {
        self.jobs.get(&id.job)?.run(id.run_num)
    }

    pub fn action_run(&self, id: &ActionRunId) -> Option<&ActionRun> {
        self.job_run(&id.run)?.action_run(&id.action)
    }

    pub fn catalog(&self) -> &NodeCatalog {
        &self.catalog
    }

    pub fn triggers(&self) -> &TriggerBus {
        &self.triggers
    }

    /// True if state changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Give every enabled job a pending run.
    #[instrument(skip(self))]
    pub fn schedule_all(&mut self, now: DateTime<Utc>) {
        for job in self.jobs.values_mut() {
            match job.schedule_next(now) {
                Ok(created) if !created.is_empty() => self.dirty = true,
                Ok(_) => {}
                Err(e) => error!(job = %job.name(), error = %e, "could not schedule next run"),
            }
        }
    }

    /// Earliest time a pending run is due.
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.jobs.values().filter_map(Job::next_wakeup).min()
    }

    /// Release every run whose time has come. Returns how many fired.
    #[instrument(skip(self, dispatch))]
    pub fn fire_due(&mut self, now: DateTime<Utc>, dispatch: &mut dyn Dispatch) -> usize {
        let expired = self.triggers.expire(now);
        if expired > 0 {
            debug!(expired, "expired old triggers");
            self.dirty = true;
        }

        let mut fired = 0;
        for job in self.jobs.values_mut() {
            let due = job.due_runs(now);
            if due.is_empty() {
                continue;
            }
            let mut env = RunEnv {
                now,
                dispatch: &mut *dispatch,
                triggers: &mut self.triggers,
            };
            for run_num in due {
                fired += 1;
                if job.fire(run_num, &mut env) {
                    job.on_run_finished(&mut env);
                }
            }
            if !job.schedule().schedule_on_complete() {
                if let Err(e) = job.schedule_next(now) {
                    error!(job = %job.name(), error = %e, "could not schedule next run");
                }
            }
        }

        if fired > 0 {
            self.dirty = true;
            self.propagate_triggers(now, dispatch);
        }
        fired
    }

    /// Start queued actions whose triggers were just published.
    fn propagate_triggers(&mut self, now: DateTime<Utc>, dispatch: &mut dyn Dispatch) {
        while self.triggers.take_fresh() {
            for job in self.jobs.values_mut() {
                let mut env = RunEnv {
                    now,
                    dispatch: &mut *dispatch,
                    triggers: &mut self.triggers,
                };
                if job.retry_queued(&mut env) {
                    job.on_run_finished(&mut env);
                }
            }
        }
    }

    /// The executor confirmed that an action run is running.
    pub fn handle_started(&mut self, id: &ActionRunId) -> Result<(), Rejection> {
        let run = self
            .jobs
            .get_mut(&id.run.job)
            .and_then(|job| job.run_mut(id.run.run_num))
            .ok_or_else(|| Rejection::UnknownActionRun(id.to_string()))?;
        let index = run
            .action_index(&id.action)
            .ok_or_else(|| Rejection::UnknownActionRun(id.to_string()))?;
        run.handle_started(index)?;
        self.dirty = true;
        Ok(())
    }

    /// An execution ended.
    #[instrument(skip(self, id, dispatch), fields(action_run = %id))]
    pub fn handle_outcome(
        &mut self,
        id: &ActionRunId,
        outcome: ExecutionOutcome,
        now: DateTime<Utc>,
        dispatch: &mut dyn Dispatch,
    ) -> Result<(), Rejection> {
        let job = self
            .jobs
            .get_mut(&id.run.job)
            .ok_or_else(|| Rejection::UnknownActionRun(id.to_string()))?;
        let mut env = RunEnv {
            now,
            dispatch: &mut *dispatch,
            triggers: &mut self.triggers,
        };

        let run = job
            .run_mut(id.run.run_num)
            .ok_or_else(|| Rejection::UnknownActionRun(id.to_string()))?;
        let index = run
            .action_index(&id.action)
            .ok_or_else(|| Rejection::UnknownActionRun(id.to_string()))?;
        let finished = run.handle_outcome(index, outcome, &mut env)?;
        if finished {
            job.on_run_finished(&mut env);
        }

        self.dirty = true;
        self.propagate_triggers(now, dispatch);
        Ok(())
    }

    /// Apply an operator command. Rejections leave state untouched.
    #[instrument(skip(self, command, dispatch), fields(target = %command.target()))]
    pub fn execute(
        &mut self,
        command: OperatorCommand,
        now: DateTime<Utc>,
        dispatch: &mut dyn Dispatch,
    ) -> Result<String, Rejection> {
        let result = self.apply_command(command, now, dispatch);
        match &result {
            Ok(message) => {
                info!(%message, "operator command accepted");
                self.dirty = true;
                self.propagate_triggers(now, dispatch);
            }
            Err(e) => warn!(error = %e, "operator command rejected"),
        }
        result
    }

    fn apply_command(
        &mut self,
        command: OperatorCommand,
        now: DateTime<Utc>,
        dispatch: &mut dyn Dispatch,
    ) -> Result<String, Rejection> {
        match command {
            OperatorCommand::Job { name, command } => self.command_job(&name, command, now, dispatch),
            OperatorCommand::JobRun { id, command } => {
                let job = self
                    .jobs
                    .get_mut(&id.job)
                    .ok_or_else(|| Rejection::UnknownJob(id.job.clone()))?;
                let mut env = RunEnv {
                    now,
                    dispatch,
                    triggers: &mut self.triggers,
                };
                let run = job
                    .run_mut(id.run_num)
                    .ok_or_else(|| Rejection::UnknownJobRun(id.to_string()))?;
                let (message, finished) = run.command_run(command, &mut env)?;
                if finished {
                    job.on_run_finished(&mut env);
                }
                Ok(message)
            }
            OperatorCommand::ActionRun { id, command } => {
                let job = self
                    .jobs
                    .get_mut(&id.run.job)
                    .ok_or_else(|| Rejection::UnknownJob(id.run.job.clone()))?;
                let mut env = RunEnv {
                    now,
                    dispatch,
                    triggers: &mut self.triggers,
                };
                let run = job
                    .run_mut(id.run.run_num)
                    .ok_or_else(|| Rejection::UnknownJobRun(id.run.to_string()))?;
                let index = run
                    .action_index(&id.action)
                    .ok_or_else(|| Rejection::UnknownActionRun(id.to_string()))?;
                let (message, finished) = run.command_action(index, command, &mut env)?;
                if finished {
                    job.on_run_finished(&mut env);
                }
                Ok(message)
            }
        }
    }

    fn command_job(
        &mut self,
        name: &str,
        command: JobCommand,
        now: DateTime<Utc>,
        dispatch: &mut dyn Dispatch,
    ) -> Result<String, Rejection> {
        let job = self
            .jobs
            .get_mut(name)
            .ok_or_else(|| Rejection::UnknownJob(name.to_string()))?;
        let mut env = RunEnv {
            now,
            dispatch,
            triggers: &mut self.triggers,
        };

        match command {
            JobCommand::Start { run_time } => {
                if !job.is_enabled() {
                    return Err(Rejection::IllegalTransition {
                        target: name.to_string(),
                        command: "start".to_string(),
                        state: "disabled".to_string(),
                    });
                }
                let created = job.create_runs(run_time.unwrap_or(now), None);
                let mut ids = Vec::with_capacity(created.len());
                for run_num in created {
                    ids.push(JobRunId::new(name, run_num).to_string());
                    if job.fire(run_num, &mut env) {
                        job.on_run_finished(&mut env);
                    }
                }
                Ok(format!("created manual run {}", ids.join(", ")))
            }
            JobCommand::Enable => {
                job.enable();
                if let Err(e) = job.schedule_next(now) {
                    error!(job = %name, error = %e, "could not schedule next run");
                }
                Ok(format!("{name} enabled"))
            }
            JobCommand::Disable => {
                let cancelled = job.disable(&mut env);
                Ok(format!("{name} disabled, {cancelled} pending run(s) cancelled"))
            }
        }
    }

    /// Log runs that exceed their advisory runtimes.
    pub fn check_overdue(&mut self, now: DateTime<Utc>) {
        for job in self.jobs.values_mut() {
            job.check_overdue(now);
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> StateSnapshot {
        StateSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: now,
            jobs: self.jobs.values().map(Job::snapshot).collect(),
            triggers: self.triggers.published().clone(),
        }
    }

    /// Rebuild run history from `snapshot`.
    ///
    /// Runs that were in flight are reconciled: running actions become
    /// unknown, starting actions fail, and runs that can no longer progress
    /// run their cleanup or finish.
    #[instrument(skip(self, snapshot, dispatch), fields(saved_at = %snapshot.saved_at))]
    pub fn restore(&mut self, snapshot: StateSnapshot, now: DateTime<Utc>, dispatch: &mut dyn Dispatch) {
        if snapshot.version != SNAPSHOT_VERSION {
            warn!(version = snapshot.version, "restoring snapshot from a different version");
        }
        self.triggers = TriggerBus::from_published(snapshot.triggers);

        for recorded in &snapshot.jobs {
            match self.jobs.get_mut(&recorded.name) {
                Some(job) => job.restore(recorded, now),
                None => info!(job = %recorded.name, "ignoring saved state for a job that is no longer defined"),
            }
        }

        for job in self.jobs.values_mut() {
            let mut env = RunEnv {
                now,
                dispatch: &mut *dispatch,
                triggers: &mut self.triggers,
            };
            job.settle_all(&mut env);
            job.resume_queued(&mut env);
        }
        self.dirty = true;
    }

    /// Swap in new definitions, keeping run history for jobs that survive.
    ///
    /// On error nothing changes. Pending runs of changed jobs are dropped and
    /// rescheduled under the new definition; runs already released continue
    /// as they were built.
    #[instrument(skip(self, config))]
    pub fn reconfigure(
        &mut self,
        config: &Configuration,
        now: DateTime<Utc>,
    ) -> Result<ReconfigureSummary, ConfigError> {
        let (mut jobs, catalog) = compile(config)?;
        let mut summary = ReconfigureSummary::default();

        for (name, job) in jobs.iter_mut() {
            match self.jobs.remove(name) {
                Some(previous) => {
                    let changed = previous.definition() != job.definition();
                    job.inherit(previous);
                    if changed {
                        let dropped = job.remove_pending_timers();
                        debug!(job = %name, dropped, "dropped pending runs of changed job");
                        summary.changed.push(name.clone());
                    } else {
                        summary.unchanged.push(name.clone());
                    }
                }
                None => summary.added.push(name.clone()),
            }
        }

        for (name, old) in std::mem::take(&mut self.jobs) {
            let active = old.runs().filter(|r| r.is_started() && !r.is_finished()).count();
            if active > 0 {
                warn!(job = %name, active, "removed job still had runs in progress");
            }
            summary.removed.push(name);
        }

        self.jobs = jobs;
        self.catalog = catalog;
        self.dirty = true;
        info!(
            added = summary.added.len(),
            removed = summary.removed.len(),
            changed = summary.changed.len(),
            unchanged = summary.unchanged.len(),
            "reconfigured"
        );
        self.schedule_all(now);
        Ok(summary)
    }
}
