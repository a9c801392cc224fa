//! Error types for definition validation.

use std::fmt;

use thiserror::Error;

/// One problem found while validating definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    /// Two jobs share the same qualified name.
    DuplicateJob { job: String },
    /// Two actions in one job share a name.
    DuplicateAction { job: String, action: String },
    /// An action requires a name that is not an action of its job.
    UnknownRequirement {
        job: String,
        action: String,
        requirement: String,
    },
    /// Local requirements form a cycle.
    CyclicRequirement { job: String, actions: Vec<String> },
    /// The cleanup action declares requirements or trigger dependencies.
    CleanupHasDependencies { job: String, action: String },
    /// A regular action requires the cleanup action.
    RequiresCleanup { job: String, action: String },
    /// A trigger pattern has fewer than three dot-separated components.
    MalformedTrigger { action: String, trigger: String },
    /// A trigger's producing action does not exist; lists every dependent.
    MissingTriggerProducer {
        producer: String,
        dependents: Vec<String>,
    },
    /// A job or action names a node or pool that is not configured.
    UnknownNode { job: String, node: String },
    /// A job has no actions.
    EmptyJob { job: String },
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateJob { job } => write!(f, "job {job} is defined more than once"),
            Self::DuplicateAction { job, action } => {
                write!(f, "action {action} is defined more than once in {job}")
            }
            Self::UnknownRequirement {
                job,
                action,
                requirement,
            } => write!(
                f,
                "action {job}.{action} requires unknown action {requirement}"
            ),
            Self::CyclicRequirement { job, actions } => write!(
                f,
                "requirements in {job} form a cycle through {}",
                actions.join(", ")
            ),
            Self::CleanupHasDependencies { job, action } => write!(
                f,
                "cleanup action {job}.{action} may not declare requires or triggered_by"
            ),
            Self::RequiresCleanup { job, action } => write!(
                f,
                "action {job}.{action} may not require the cleanup action"
            ),
            Self::MalformedTrigger { action, trigger } => write!(
                f,
                "trigger {trigger} on {action} does not name namespace.job.action"
            ),
            Self::MissingTriggerProducer {
                producer,
                dependents,
            } => write!(
                f,
                "missing trigger producer {producer}, required by {}",
                dependents.join(", ")
            ),
            Self::UnknownNode { job, node } => write!(f, "job {job} uses unknown node {node}"),
            Self::EmptyJob { job } => write!(f, "job {job} has no actions"),
        }
    }
}

/// A rejected configuration, listing every issue found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration ({} issue(s)):{}", .issues.len(), format_issues(.issues))]
pub struct ConfigError {
    pub issues: Vec<ConfigIssue>,
}

fn format_issues(issues: &[ConfigIssue]) -> String {
    issues.iter().map(|i| format!("\n  - {i}")).collect()
}

impl ConfigError {
    pub fn new(issues: Vec<ConfigIssue>) -> Self {
        Self { issues }
    }
}
