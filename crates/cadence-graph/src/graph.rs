//! The global action graph and its per-job projections.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::{debug, info};

use crate::definition::{ActionDefinition, JobDefinition};
use crate::error::{ConfigError, ConfigIssue};

/// Index of an action in the [`JobGraph`] arena.
pub type ActionId = usize;

/// Why one action depends on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// A local `requires` entry.
    Requirement,
    /// A `triggered_by` pattern naming another job's action.
    Trigger,
}

/// The qualified action (`namespace.job.action`) that publishes `trigger`.
pub fn trigger_producer(trigger: &str) -> Option<String> {
    let parts: Vec<&str> = trigger.splitn(4, '.').collect();
    if parts.len() < 3 || parts[..3].iter().any(|p| p.is_empty()) {
        return None;
    }
    Some(parts[..3].join("."))
}

#[derive(Debug)]
struct ActionNode {
    qualified: String,
    job: usize,
    name: String,
    cleanup: bool,
}

/// Every action of every job, with requirement and trigger edges.
///
/// `reverse[a]` lists what `a` depends on; `forward[a]` lists what depends
/// on `a`. The two are exact inverses.
#[derive(Debug)]
pub struct JobGraph {
    jobs: Vec<JobDefinition>,
    job_index: HashMap<String, usize>,
    nodes: Vec<ActionNode>,
    index: HashMap<String, ActionId>,
    forward: Vec<Vec<(ActionId, EdgeKind)>>,
    reverse: Vec<Vec<(ActionId, EdgeKind)>>,
}

impl JobGraph {
    /// Validate `definitions` and build the graph.
    ///
    /// Every problem is collected before failing; a graph is never returned
    /// with a dangling reference.
    pub fn build(definitions: &[JobDefinition]) -> Result<Self, ConfigError> {
        let mut issues = Vec::new();
        let mut graph = Self {
            jobs: Vec::new(),
            job_index: HashMap::new(),
            nodes: Vec::new(),
            index: HashMap::new(),
            forward: Vec::new(),
            reverse: Vec::new(),
        };

        // Pass 1: register jobs and actions.
        for job in definitions {
            let full_name = job.full_name();
            if graph.job_index.contains_key(&full_name) {
                issues.push(ConfigIssue::DuplicateJob { job: full_name });
                continue;
            }
            if job.actions.is_empty() {
                issues.push(ConfigIssue::EmptyJob {
                    job: full_name.clone(),
                });
            }

            let job_id = graph.jobs.len();
            graph.job_index.insert(full_name.clone(), job_id);
            graph.jobs.push(job.clone());

            for (action, cleanup) in job.all_actions() {
                let qualified = format!("{full_name}.{}", action.name);
                if graph.index.contains_key(&qualified) {
                    issues.push(ConfigIssue::DuplicateAction {
                        job: full_name.clone(),
                        action: action.name.clone(),
                    });
                    continue;
                }
                let id = graph.nodes.len();
                graph.index.insert(qualified.clone(), id);
                graph.nodes.push(ActionNode {
                    qualified,
                    job: job_id,
                    name: action.name.clone(),
                    cleanup,
                });
                graph.forward.push(Vec::new());
                graph.reverse.push(Vec::new());
            }
        }

        // Pass 2: edges.
        let mut dangling: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for job_id in 0..graph.jobs.len() {
            let job = graph.jobs[job_id].clone();
            let full_name = job.full_name();

            for (action, cleanup) in job.all_actions() {
                let Some(&id) = graph.index.get(&format!("{full_name}.{}", action.name)) else {
                    continue;
                };
                if graph.nodes[id].job != job_id {
                    continue;
                }

                if cleanup && (!action.requires.is_empty() || !action.triggered_by.is_empty()) {
                    issues.push(ConfigIssue::CleanupHasDependencies {
                        job: full_name.clone(),
                        action: action.name.clone(),
                    });
                    continue;
                }

                for requirement in &action.requires {
                    let found = graph.index.get(&format!("{full_name}.{requirement}")).copied();
                    match found {
                        Some(req) if graph.nodes[req].cleanup => {
                            issues.push(ConfigIssue::RequiresCleanup {
                                job: full_name.clone(),
                                action: action.name.clone(),
                            });
                        }
                        Some(req) => graph.add_edge(req, id, EdgeKind::Requirement),
                        None => issues.push(ConfigIssue::UnknownRequirement {
                            job: full_name.clone(),
                            action: action.name.clone(),
                            requirement: requirement.clone(),
                        }),
                    }
                }

                for trigger in &action.triggered_by {
                    let Some(producer) = trigger_producer(trigger) else {
                        issues.push(ConfigIssue::MalformedTrigger {
                            action: graph.nodes[id].qualified.clone(),
                            trigger: trigger.clone(),
                        });
                        continue;
                    };
                    let found = graph.index.get(&producer).copied();
                    match found {
                        Some(source) => graph.add_edge(source, id, EdgeKind::Trigger),
                        None => {
                            dangling
                                .entry(producer)
                                .or_default()
                                .insert(graph.nodes[id].qualified.clone());
                        }
                    }
                }
            }

            if let Some(cycle) = graph.find_requirement_cycle(job_id) {
                issues.push(ConfigIssue::CyclicRequirement {
                    job: full_name,
                    actions: cycle,
                });
            }
        }

        for (producer, dependents) in dangling {
            issues.push(ConfigIssue::MissingTriggerProducer {
                producer,
                dependents: dependents.into_iter().collect(),
            });
        }

        if !issues.is_empty() {
            return Err(ConfigError::new(issues));
        }

        info!(
            jobs = graph.jobs.len(),
            actions = graph.nodes.len(),
            "built job graph"
        );
        Ok(graph)
    }

    fn add_edge(&mut self, from: ActionId, to: ActionId, kind: EdgeKind) {
        if !self.forward[from].contains(&(to, kind)) {
            self.forward[from].push((to, kind));
            self.reverse[to].push((from, kind));
        }
    }

    /// Actions of `job_id` left over after repeatedly removing those with no
    /// unplaced local requirement, in definition order.
    fn find_requirement_cycle(&self, job_id: usize) -> Option<Vec<String>> {
        let members = self.job_actions(job_id);
        let order = self.topological(&members);
        if order.len() == members.len() {
            return None;
        }
        let placed: HashSet<ActionId> = order.into_iter().collect();
        Some(
            members
                .into_iter()
                .filter(|id| !placed.contains(id))
                .map(|id| self.nodes[id].name.clone())
                .collect(),
        )
    }

    fn job_actions(&self, job_id: usize) -> Vec<ActionId> {
        (0..self.nodes.len())
            .filter(|id| self.nodes[*id].job == job_id)
            .collect()
    }

    /// Stable topological order of `members` over requirement edges.
    fn topological(&self, members: &[ActionId]) -> Vec<ActionId> {
        let mut placed: HashSet<ActionId> = HashSet::new();
        let mut order = Vec::with_capacity(members.len());
        loop {
            let next = members.iter().copied().find(|id| {
                !placed.contains(id)
                    && self.reverse[*id]
                        .iter()
                        .filter(|(_, kind)| *kind == EdgeKind::Requirement)
                        .all(|(req, _)| placed.contains(req))
            });
            match next {
                Some(id) => {
                    placed.insert(id);
                    order.push(id);
                }
                None => return order,
            }
        }
    }

    /// Follow `edges` along trigger edges only, collecting every reachable action.
    fn trigger_closure(&self, start: ActionId, edges: &[Vec<(ActionId, EdgeKind)>]) -> BTreeSet<String> {
        let mut visited = HashSet::new();
        let mut to_process = vec![start];
        let mut found = BTreeSet::new();

        while let Some(id) = to_process.pop() {
            if !visited.insert(id) {
                continue;
            }
            for (next, kind) in &edges[id] {
                if *kind == EdgeKind::Trigger && *next != start {
                    found.insert(self.nodes[*next].qualified.clone());
                    if !visited.contains(next) {
                        to_process.push(*next);
                    }
                }
            }
        }

        found
    }

    /// The per-job view used to build job runs.
    pub fn project(&self, job_name: &str) -> Option<ActionGraph> {
        let &job_id = self.job_index.get(job_name)?;
        let job = &self.jobs[job_id];
        let members = self.job_actions(job_id);

        let (cleanup, regular): (Vec<ActionId>, Vec<ActionId>) =
            members.iter().copied().partition(|id| self.nodes[*id].cleanup);
        let mut order = self.topological(&regular);
        order.extend(cleanup);

        let position: HashMap<ActionId, usize> =
            order.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let actions = order
            .iter()
            .map(|&id| {
                let node = &self.nodes[id];
                let definition = job
                    .all_actions()
                    .find(|(a, _)| a.name == node.name)
                    .map(|(a, _)| a.clone())
                    .unwrap_or_else(|| ActionDefinition::new(node.name.clone(), String::new()));
                let mut required: Vec<usize> = self.reverse[id]
                    .iter()
                    .filter(|(_, kind)| *kind == EdgeKind::Requirement)
                    .filter_map(|(req, _)| position.get(req).copied())
                    .collect();
                required.sort_unstable();

                GraphAction {
                    definition,
                    qualified_name: node.qualified.clone(),
                    required,
                    upstream_triggers: self.trigger_closure(id, &self.reverse),
                    downstream_consumers: self.trigger_closure(id, &self.forward),
                    is_cleanup: node.cleanup,
                }
            })
            .collect::<Vec<_>>();

        debug!(job = %job_name, actions = actions.len(), "projected action graph");
        Some(ActionGraph {
            job_name: job_name.to_string(),
            namespace: job.namespace.clone(),
            actions,
        })
    }

    pub fn job(&self, name: &str) -> Option<&JobDefinition> {
        self.job_index.get(name).map(|id| &self.jobs[*id])
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobDefinition> {
        self.jobs.iter()
    }

    pub fn action_id(&self, qualified: &str) -> Option<ActionId> {
        self.index.get(qualified).copied()
    }

    /// What `qualified` depends on, as `(qualified name, kind)` pairs.
    pub fn dependencies(&self, qualified: &str) -> Vec<(&str, EdgeKind)> {
        self.edges_of(qualified, &self.reverse)
    }

    /// What depends on `qualified`, as `(qualified name, kind)` pairs.
    pub fn dependents(&self, qualified: &str) -> Vec<(&str, EdgeKind)> {
        self.edges_of(qualified, &self.forward)
    }

    fn edges_of<'a>(
        &'a self,
        qualified: &str,
        edges: &'a [Vec<(ActionId, EdgeKind)>],
    ) -> Vec<(&'a str, EdgeKind)> {
        match self.index.get(qualified) {
            Some(&id) => edges[id]
                .iter()
                .map(|(other, kind)| (self.nodes[*other].qualified.as_str(), *kind))
                .collect(),
            None => Vec::new(),
        }
    }
}

/// One action in a job's projected graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphAction {
    pub definition: ActionDefinition,
    pub qualified_name: String,
    /// Positions in [`ActionGraph::actions`] of the local requirements.
    pub required: Vec<usize>,
    /// Every producer this action waits on, followed transitively along triggers.
    pub upstream_triggers: BTreeSet<String>,
    /// Every action that waits on this one, followed transitively along triggers.
    pub downstream_consumers: BTreeSet<String>,
    pub is_cleanup: bool,
}

impl GraphAction {
    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

/// A job's actions in topological order, cleanup last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionGraph {
    job_name: String,
    namespace: String,
    actions: Vec<GraphAction>,
}

impl ActionGraph {
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn actions(&self) -> &[GraphAction] {
        &self.actions
    }

    pub fn position(&self, action: &str) -> Option<usize> {
        self.actions.iter().position(|a| a.name() == action)
    }

    pub fn get(&self, action: &str) -> Option<&GraphAction> {
        self.actions.iter().find(|a| a.name() == action)
    }

    pub fn cleanup(&self) -> Option<usize> {
        self.actions.iter().position(|a| a.is_cleanup)
    }

    /// Local positions that list `index` among their requirements.
    pub fn waiting_on(&self, index: usize) -> Vec<usize> {
        self.actions
            .iter()
            .enumerate()
            .filter(|(_, a)| a.required.contains(&index))
            .map(|(i, _)| i)
            .collect()
    }
}
