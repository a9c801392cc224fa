//! Job definitions and the dependency graph for Cadence.
//!
//! [`JobGraph::build`] validates every job and action definition across all
//! namespaces at once and indexes them in a single arena with two kinds of
//! edges: ordinary requirements between actions of the same job, and
//! triggers between an action and the producer of a signal it waits on.
//! [`JobGraph::project`] then derives the per-job [`ActionGraph`] used to
//! build job runs.

mod definition;
mod error;
mod graph;

pub use definition::{ActionDefinition, DEFAULT_NAMESPACE, JobDefinition, TriggerDownstreams};
pub use error::{ConfigError, ConfigIssue};
pub use graph::{ActionGraph, ActionId, EdgeKind, GraphAction, JobGraph, trigger_producer};
