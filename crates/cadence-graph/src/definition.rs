//! Typed job and action definitions.

use std::collections::BTreeMap;

use cadence_schedule::Schedule;
use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Namespace used when a job does not name one.
pub const DEFAULT_NAMESPACE: &str = "MASTER";

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_run_limit() -> usize {
    50
}

fn yes() -> bool {
    true
}

/// Which triggers an action publishes when it succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TriggerDownstreams {
    /// `true` publishes `<ns>.<job>.<action>.shortdate.{shortdate}`.
    Enabled(bool),
    /// Publishes `<ns>.<job>.<action>` followed by each `.key.value` pair.
    Custom(BTreeMap<String, String>),
}

impl Default for TriggerDownstreams {
    fn default() -> Self {
        Self::Enabled(false)
    }
}

impl TriggerDownstreams {
    /// Trigger name templates for an action, before command-context rendering.
    pub fn templates(&self, qualified_action: &str) -> Vec<String> {
        match self {
            Self::Enabled(false) => Vec::new(),
            Self::Enabled(true) => vec![format!("{qualified_action}.shortdate.{{shortdate}}")],
            Self::Custom(parts) if parts.is_empty() => Vec::new(),
            Self::Custom(parts) => {
                let suffix: String = parts.iter().map(|(k, v)| format!(".{k}.{v}")).collect();
                vec![format!("{qualified_action}{suffix}")]
            }
        }
    }
}

/// A single step of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub name: String,
    /// Command template, rendered against the run's context at start.
    pub command: String,
    /// Node or pool override; defaults to the job's node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// Local action names that must complete first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    /// Trigger patterns (`namespace.job.action[.extra...]`) that must be published first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggered_by: Vec<String>,
    #[serde(default)]
    pub trigger_downstreams: TriggerDownstreams,
    /// Additional attempts after a failure.
    #[serde(default)]
    pub retries: u32,
    /// Advisory runtime; exceeding it is logged, never enforced.
    #[serde(default, with = "duration_text", skip_serializing_if = "Option::is_none")]
    pub expected_runtime: Option<Duration>,
}

impl ActionDefinition {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            node: None,
            requires: Vec::new(),
            triggered_by: Vec::new(),
            trigger_downstreams: TriggerDownstreams::default(),
            retries: 0,
            expected_runtime: None,
        }
    }

    pub fn requires<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn triggered_by<I, S>(mut self, triggers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.triggered_by.extend(triggers.into_iter().map(Into::into));
        self
    }

    pub fn publishes(mut self, downstreams: TriggerDownstreams) -> Self {
        self.trigger_downstreams = downstreams;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn on_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }
}

/// A schedulable job: a recurrence rule plus a set of actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Node or pool the job runs on.
    pub node: String,
    pub schedule: Schedule,
    pub actions: Vec<ActionDefinition>,
    /// Runs after every other action finishes, whatever their outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_action: Option<ActionDefinition>,
    /// Let a run wait for its unfinished predecessor instead of being cancelled.
    #[serde(default = "yes")]
    pub queueing: bool,
    /// Let a run start while its predecessor is still running.
    #[serde(default)]
    pub allow_overlap: bool,
    /// Finished runs kept in history.
    #[serde(default = "default_run_limit")]
    pub run_limit: usize,
    /// Run once on every node of the pool instead of once in total.
    #[serde(default)]
    pub all_nodes: bool,
    #[serde(default = "yes")]
    pub enabled: bool,
    /// Advisory limit on a run's duration; exceeding it is logged, never enforced.
    #[serde(default, with = "duration_text", skip_serializing_if = "Option::is_none")]
    pub max_runtime: Option<Duration>,
    /// Zone for the schedule (unless it names its own) and for date tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<Tz>,
}

impl JobDefinition {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        node: impl Into<String>,
        schedule: Schedule,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            node: node.into(),
            schedule,
            actions: Vec::new(),
            cleanup_action: None,
            queueing: true,
            allow_overlap: false,
            run_limit: default_run_limit(),
            all_nodes: false,
            enabled: true,
            max_runtime: None,
            time_zone: None,
        }
    }

    pub fn with_action(mut self, action: ActionDefinition) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_cleanup(mut self, action: ActionDefinition) -> Self {
        self.cleanup_action = Some(action);
        self
    }

    /// `namespace.name`
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    /// Regular actions followed by the cleanup action, if any.
    pub fn all_actions(&self) -> impl Iterator<Item = (&ActionDefinition, bool)> {
        self.actions
            .iter()
            .map(|a| (a, false))
            .chain(self.cleanup_action.iter().map(|a| (a, true)))
    }
}

/// Optional durations written as text such as `30m`.
mod duration_text {
    use cadence_schedule::parse_duration;
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_str(&format!("{}s", d.num_seconds())),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let text: Option<String> = Option::deserialize(d)?;
        text.map(|t| parse_duration(&t).map_err(serde::de::Error::custom))
            .transpose()
    }
}
