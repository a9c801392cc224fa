//! The long-running scheduler process.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use miette::{IntoDiagnostic, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use cadence_core::{JobRegistry, Scheduler, SchedulerHandle};

use crate::config;
use crate::executor::LocalExecutor;
use crate::store::FileStateStore;

/// Settings for [`run`].
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub config_path: PathBuf,
    pub state_path: Option<PathBuf>,
    pub shell: String,
}

/// Run until ctrl-c. Definitions are reloaded on SIGHUP.
pub async fn run(settings: DaemonConfig) -> Result<()> {
    let definitions = config::load(&settings.config_path).await.into_diagnostic()?;
    let registry = JobRegistry::new(&definitions).into_diagnostic()?;

    let executor = Arc::new(LocalExecutor::new(settings.shell.clone()));
    let mut scheduler = Scheduler::new(registry, executor);
    match &settings.state_path {
        Some(path) => {
            let store = FileStateStore::new(path.clone());
            info!(path = %store.path().display(), "keeping state on disk");
            scheduler = scheduler.with_store(Arc::new(store));
            if scheduler.restore().await.into_diagnostic()? {
                info!("resumed from saved state");
            }
        }
        None => warn!("no state file configured, run history will not survive a restart"),
    }

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    #[cfg(unix)]
    tokio::spawn(reload_on_hangup(scheduler.handle(), settings.config_path.clone()));

    let registry = scheduler.run(shutdown_rx).await;
    for job in registry.jobs() {
        let unfinished = job.runs().filter(|r| r.is_started() && !r.is_finished()).count();
        if unfinished > 0 {
            warn!(job = %job.name(), unfinished, "exiting with runs in progress");
        }
    }
    Ok(())
}

/// Reload definitions from `path` each time the process receives SIGHUP.
#[cfg(unix)]
async fn reload_on_hangup(handle: SchedulerHandle, path: PathBuf) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGHUP, reload disabled");
            return;
        }
    };
    while hangup.recv().await.is_some() {
        info!("received SIGHUP, reloading definitions");
        if !reload(&handle, &path).await {
            break;
        }
    }
}

/// Returns false once the scheduler is gone.
#[cfg(unix)]
async fn reload(handle: &SchedulerHandle, path: &Path) -> bool {
    let definitions = match config::load(path).await {
        Ok(definitions) => definitions,
        Err(e) => {
            warn!(error = %e, "keeping current definitions");
            return true;
        }
    };
    match handle.reconfigure(definitions).await {
        Ok(summary) => {
            info!(
                added = ?summary.added,
                removed = ?summary.removed,
                changed = ?summary.changed,
                "definitions reloaded"
            );
            true
        }
        Err(cadence_core::EngineError::Unavailable) => false,
        Err(e) => {
            warn!(error = %e, "keeping current definitions");
            true
        }
    }
}
