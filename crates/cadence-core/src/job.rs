//! A configured job and its run history.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, error, info};

use cadence_graph::{ActionGraph, ConfigIssue, JobDefinition};
use cadence_schedule::{Schedule, ScheduleError};

use crate::id::JobRunId;
use crate::job_run::{JobRun, RunEnv, RunSettings};
use crate::node::{Node, NodeCatalog, NodePool};
use crate::snapshot::JobSnapshot;
use crate::state::JobRunState;

#[derive(Debug, Clone)]
pub struct Job {
    name: String,
    definition: JobDefinition,
    schedule: Schedule,
    graph: ActionGraph,
    pool: NodePool,
    action_pools: Vec<Option<NodePool>>,
    settings: RunSettings,
    enabled: bool,
    /// Newest first.
    runs: VecDeque<JobRun>,
    next_run_num: u64,
    node_cursor: usize,
    action_cursors: Vec<usize>,
    /// Unjittered match of the latest scheduled run to fire.
    last_fired_match: Option<DateTime<Utc>>,
}

impl Job {
    pub(crate) fn new(
        definition: JobDefinition,
        graph: ActionGraph,
        catalog: &NodeCatalog,
        globals: Arc<BTreeMap<String, String>>,
        default_time_zone: Option<Tz>,
    ) -> Result<Self, Vec<ConfigIssue>> {
        let name = definition.full_name();
        let unknown = |node: &str| ConfigIssue::UnknownNode {
            job: name.clone(),
            node: node.to_string(),
        };

        let mut issues = Vec::new();
        let pool = catalog.pool(&definition.node);
        if pool.is_none() {
            issues.push(unknown(&definition.node));
        }
        let action_pools: Vec<Option<NodePool>> = graph
            .actions()
            .iter()
            .map(|action| {
                let node = action.definition.node.as_deref()?;
                let pool = catalog.pool(node);
                if pool.is_none() {
                    issues.push(unknown(node));
                }
                pool
            })
            .collect();
        let Some(pool) = pool else {
            return Err(issues);
        };
        if !issues.is_empty() {
            return Err(issues);
        }

        let time_zone = definition.time_zone.or(default_time_zone).unwrap_or(Tz::UTC);
        let schedule = definition.schedule.clone().or_time_zone(Some(time_zone));
        let settings = RunSettings {
            namespace: definition.namespace.clone(),
            time_zone,
            globals,
            max_runtime: definition.max_runtime,
        };

        Ok(Self {
            name,
            enabled: definition.enabled,
            action_cursors: vec![0; action_pools.len()],
            schedule,
            graph,
            pool,
            action_pools,
            settings,
            runs: VecDeque::new(),
            next_run_num: 0,
            node_cursor: 0,
            last_fired_match: None,
            definition,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> &JobDefinition {
        &self.definition
    }

    /// The schedule with the job's time zone applied.
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn graph(&self) -> &ActionGraph {
        &self.graph
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Runs, newest first.
    pub fn runs(&self) -> impl Iterator<Item = &JobRun> {
        self.runs.iter()
    }

    pub fn run(&self, run_num: u64) -> Option<&JobRun> {
        self.runs.iter().find(|r| r.run_num() == run_num)
    }

    pub(crate) fn run_mut(&mut self, run_num: u64) -> Option<&mut JobRun> {
        self.runs.iter_mut().find(|r| r.run_num() == run_num)
    }

    /// Most recent run that finished successfully.
    pub fn last_success(&self) -> Option<&JobRun> {
        self.runs
            .iter()
            .find(|r| r.is_finished() && r.state() == JobRunState::Succeeded)
    }

    fn action_nodes(&mut self, run_node: &Node) -> Vec<Node> {
        let mut nodes = Vec::with_capacity(self.action_pools.len());
        for (pool, cursor) in self.action_pools.iter().zip(self.action_cursors.iter_mut()) {
            nodes.push(match pool {
                Some(pool) => pool.next_round_robin(cursor),
                None => run_node.clone(),
            });
        }
        nodes
    }

    fn build_run(&mut self, run_num: u64, run_time: DateTime<Utc>, node: Node) -> JobRun {
        let action_nodes = self.action_nodes(&node);
        JobRun::new(
            JobRunId::new(self.name.clone(), run_num),
            run_time,
            node,
            &self.graph,
            action_nodes,
            self.settings.clone(),
        )
    }

    /// Create one run, or one per node for `all_nodes` jobs.
    ///
    /// `matched` is the schedule match for scheduled runs and `None` for manual ones.
    pub(crate) fn create_runs(
        &mut self,
        run_time: DateTime<Utc>,
        matched: Option<DateTime<Utc>>,
    ) -> Vec<u64> {
        let nodes = if self.definition.all_nodes {
            self.pool.nodes().to_vec()
        } else {
            vec![self.pool.next_round_robin(&mut self.node_cursor)]
        };

        let mut created = Vec::with_capacity(nodes.len());
        for node in nodes {
            let run_num = self.next_run_num;
            self.next_run_num += 1;
            let run = self.build_run(run_num, run_time, node);
            let run = match matched {
                Some(matched) => run.scheduled_for(matched),
                None => run.manual(),
            };
            created.push(run_num);
            self.runs.push_front(run);
        }
        created
    }

    pub(crate) fn has_pending_timer(&self) -> bool {
        self.runs.iter().any(|r| r.is_pending_timer())
    }

    /// Schedule the next run unless one is already waiting for its time.
    ///
    /// Counts from the last fired match so intervals do not drift. Matches
    /// already in the past are skipped rather than replayed.
    pub(crate) fn schedule_next(&mut self, now: DateTime<Utc>) -> Result<Vec<u64>, ScheduleError> {
        if !self.enabled || self.has_pending_timer() {
            return Ok(Vec::new());
        }
        let mut matched = self.schedule.next_match(self.last_fired_match.unwrap_or(now))?;
        if matched < now {
            matched = self.schedule.next_match(now)?;
        }
        let run_time = self.schedule.jittered(matched);
        let created = self.create_runs(run_time, Some(matched));
        info!(job = %self.name, %run_time, runs = created.len(), "scheduled next run");
        Ok(created)
    }

    pub(crate) fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.runs
            .iter()
            .filter(|r| r.is_pending_timer())
            .map(|r| r.run_time())
            .min()
    }

    /// Pending runs whose time has come, oldest first.
    pub(crate) fn due_runs(&self, now: DateTime<Utc>) -> Vec<u64> {
        self.runs
            .iter()
            .rev()
            .filter(|r| r.is_pending_timer() && r.run_time() <= now)
            .map(|r| r.run_num())
            .collect()
    }

    /// An earlier run on the same node scope has fired and not finished.
    fn predecessor_unfinished(&self, run_num: u64, node: &str) -> bool {
        self.runs.iter().any(|r| {
            r.run_num() < run_num
                && !r.is_finished()
                && !r.is_pending_timer()
                && (!self.definition.all_nodes || r.node().name == node)
        })
    }

    /// Release a run whose time has come, honoring the overlap policy.
    ///
    /// Returns true if the run finished immediately.
    pub(crate) fn fire(&mut self, run_num: u64, env: &mut RunEnv<'_>) -> bool {
        let Some(run) = self.run(run_num) else {
            return false;
        };
        let node = run.node().name.clone();
        if let Some(matched) = run.match_time() {
            if self.last_fired_match.is_none_or(|last| matched > last) {
                self.last_fired_match = Some(matched);
            }
        }

        let enabled = self.enabled;
        let blocked = !self.definition.allow_overlap && self.predecessor_unfinished(run_num, &node);
        let queueing = self.definition.queueing;
        let Some(run) = self.run_mut(run_num) else {
            return false;
        };

        if !enabled {
            info!(job_run = %run.id(), "job is disabled, cancelling run");
            return run.cancel(env);
        }
        if blocked {
            if queueing {
                run.queue();
                return false;
            }
            info!(job_run = %run.id(), "previous run still in progress, cancelling run");
            return run.cancel(env);
        }
        run.start(env)
    }

    /// Start queued runs whose predecessors have finished, then prune history.
    pub(crate) fn resume_queued(&mut self, env: &mut RunEnv<'_>) {
        loop {
            let candidate = self
                .runs
                .iter()
                .rev()
                .filter(|r| r.is_waiting_for_predecessor())
                .find(|r| {
                    self.definition.allow_overlap
                        || !self.predecessor_unfinished(r.run_num(), &r.node().name)
                })
                .map(|r| r.run_num());
            let Some(run_num) = candidate else {
                break;
            };
            let Some(run) = self.run_mut(run_num) else {
                break;
            };
            info!(job_run = %run.id(), "releasing queued run");
            run.start(env);
        }
        self.prune();
    }

    /// Follow-up after a run finishes: release queued runs, prune, and
    /// schedule the next run for rules that wait on completion.
    pub(crate) fn on_run_finished(&mut self, env: &mut RunEnv<'_>) {
        self.resume_queued(env);
        if self.schedule.schedule_on_complete() {
            if let Err(e) = self.schedule_next(env.now) {
                error!(job = %self.name, error = %e, "could not schedule next run");
            }
        }
    }

    /// Drop finished runs beyond `run_limit`, oldest first.
    ///
    /// Unfinished runs, the newest success and anything newer than either
    /// are always kept.
    pub(crate) fn prune(&mut self) {
        let oldest_unfinished = self
            .runs
            .iter()
            .filter(|r| !r.is_finished())
            .map(|r| r.run_num())
            .min();
        let newest_success = self.last_success().map(|r| r.run_num());
        let keep_from = [oldest_unfinished, newest_success]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(u64::MAX);

        while self.runs.len() > self.definition.run_limit {
            match self.runs.back() {
                Some(oldest) if oldest.is_finished() && oldest.run_num() < keep_from => {
                    debug!(job_run = %oldest.id(), "pruning job run");
                    self.runs.pop_back();
                }
                _ => break,
            }
        }
    }

    /// Disable the job and cancel runs that have not started.
    pub(crate) fn disable(&mut self, env: &mut RunEnv<'_>) -> usize {
        self.enabled = false;
        let mut cancelled = 0;
        for run in &mut self.runs {
            if run.is_pending_timer() || run.is_waiting_for_predecessor() {
                run.cancel(env);
                cancelled += 1;
            }
        }
        info!(job = %self.name, cancelled, "disabled job");
        cancelled
    }

    pub(crate) fn enable(&mut self) {
        self.enabled = true;
        info!(job = %self.name, "enabled job");
    }

    /// Drop runs still waiting for their scheduled time.
    pub(crate) fn remove_pending_timers(&mut self) -> usize {
        let before = self.runs.len();
        self.runs.retain(|r| !r.is_pending_timer());
        before - self.runs.len()
    }

    pub(crate) fn check_overdue(&mut self, now: DateTime<Utc>) {
        for run in self.runs.iter_mut().filter(|r| r.is_started() && !r.is_finished()) {
            run.check_overdue(now);
        }
    }

    /// Settle runs that can no longer progress, e.g. after a restore.
    pub(crate) fn settle_all(&mut self, env: &mut RunEnv<'_>) {
        for run in self.runs.iter_mut().filter(|r| r.is_started()) {
            run.settle(env);
        }
    }

    pub(crate) fn retry_queued(&mut self, env: &mut RunEnv<'_>) -> bool {
        let mut finished = false;
        for run in &mut self.runs {
            finished |= run.retry_queued(env);
        }
        finished
    }

    pub(crate) fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            name: self.name.clone(),
            enabled: self.enabled,
            last_fired_match: self.last_fired_match,
            node_cursor: self.node_cursor,
            runs: self.runs.iter().map(JobRun::snapshot).collect(),
        }
    }

    /// Rebuild run history from a snapshot against the current definition.
    pub(crate) fn restore(&mut self, snapshot: &JobSnapshot, now: DateTime<Utc>) {
        self.enabled = snapshot.enabled;
        self.last_fired_match = snapshot.last_fired_match;
        self.node_cursor = snapshot.node_cursor % self.pool.nodes().len();

        let mut runs = VecDeque::with_capacity(snapshot.runs.len());
        for recorded in &snapshot.runs {
            let node = match self.pool.get(&recorded.node) {
                Some(node) => node.clone(),
                None => self.pool.next_round_robin(&mut self.node_cursor),
            };
            let run = self
                .build_run(recorded.id.run_num, recorded.run_time, node)
                .restore(recorded, now);
            runs.push_back(run);
        }

        if let Some(max) = runs.iter().map(|r| r.run_num()).max() {
            self.next_run_num = self.next_run_num.max(max + 1);
        }
        info!(job = %self.name, runs = runs.len(), "restored job runs");
        self.runs = runs;
    }

    /// Take over run history and counters from the job this one replaces.
    ///
    /// Runs keep the actions and settings they were built with. The runtime
    /// enabled flag survives unless the definition itself changed it.
    pub(crate) fn inherit(&mut self, previous: Job) {
        if self.definition.enabled == previous.definition.enabled {
            self.enabled = previous.enabled;
        }
        self.runs = previous.runs;
        self.next_run_num = previous.next_run_num;
        self.node_cursor = previous.node_cursor % self.pool.nodes().len();
        self.last_fired_match = previous.last_fired_match;
        self.prune();
    }
}
