//! Loading job definitions from disk.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use cadence_core::{Configuration, JobRegistry};

/// Node used when a definitions file names none.
pub const DEFAULT_NODE: &str = "localhost";

#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file is not a valid definitions document.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Read a JSON definitions file.
///
/// Files with no `nodes` section get a single `localhost` node so small
/// setups can leave it out.
pub async fn load(path: &Path) -> Result<Configuration, LoadError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let mut config: Configuration = serde_json::from_str(&text).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if config.nodes.is_empty() {
        config
            .nodes
            .insert(DEFAULT_NODE.to_string(), DEFAULT_NODE.to_string());
    }
    info!(path = %path.display(), jobs = config.jobs.len(), "loaded definitions");
    Ok(config)
}

/// A human-readable outline of every job: schedule, upcoming runs and action order.
pub fn describe(registry: &JobRegistry, now: DateTime<Utc>, upcoming: usize) -> String {
    let mut out = String::new();
    for job in registry.jobs() {
        let _ = writeln!(out, "{} [{}]", job.name(), job.schedule());
        if !job.is_enabled() {
            let _ = writeln!(out, "  disabled");
        }
        match job.schedule().upcoming(now, upcoming) {
            Ok(times) => {
                for time in times {
                    let _ = writeln!(out, "  next: {}", time.with_timezone(&job.schedule().time_zone()));
                }
            }
            Err(e) => {
                let _ = writeln!(out, "  next: {e}");
            }
        }

        let graph = job.graph();
        for action in graph.actions() {
            let mut line = format!("  - {}", action.name());
            if action.is_cleanup {
                line.push_str(" (cleanup)");
            }
            let requires: Vec<&str> = action
                .required
                .iter()
                .map(|i| graph.actions()[*i].name())
                .collect();
            if !requires.is_empty() {
                let _ = write!(line, " requires {}", requires.join(", "));
            }
            if !action.upstream_triggers.is_empty() {
                let upstream: Vec<&str> = action.upstream_triggers.iter().map(String::as_str).collect();
                let _ = write!(line, " after {}", upstream.join(", "));
            }
            let _ = writeln!(out, "{line}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_load_adds_default_node() {
        let file = write_config(
            r#"{
                "jobs": [{
                    "name": "backup",
                    "node": "localhost",
                    "schedule": "daily 02:30:00",
                    "actions": [{ "name": "dump", "command": "pg_dump > /tmp/{ymd}.sql" }]
                }]
            }"#,
        );

        let config = load(file.path()).await.unwrap();
        assert_eq!(config.nodes.get(DEFAULT_NODE).map(String::as_str), Some(DEFAULT_NODE));
        assert_eq!(config.jobs[0].full_name(), "MASTER.backup");
        assert!(JobRegistry::new(&config).is_ok());
    }

    #[tokio::test]
    async fn test_load_reports_path() {
        let file = write_config("{ not json");
        let err = load(file.path()).await.unwrap_err();
        assert!(matches!(err, LoadError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));

        let err = load(Path::new("/nonexistent/cadence.json")).await.unwrap_err();
        assert!(matches!(err, LoadError::Read { .. }));
    }

    #[tokio::test]
    async fn test_describe_lists_actions_in_order() {
        let file = write_config(
            r#"{
                "jobs": [{
                    "name": "etl",
                    "node": "localhost",
                    "schedule": { "rule": "interval 1h" },
                    "actions": [
                        { "name": "load", "command": "load", "requires": ["extract"] },
                        { "name": "extract", "command": "extract" }
                    ],
                    "cleanup_action": { "name": "tidy", "command": "tidy" }
                }]
            }"#,
        );
        let registry = JobRegistry::new(&load(file.path()).await.unwrap()).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let text = describe(&registry, now, 1);
        assert_eq!(
            text,
            "MASTER.etl [interval 1h]\n  next: 2024-05-01 13:00:00 UTC\n  - extract\n  - load requires extract\n  - tidy (cleanup)\n"
        );
    }
}
