//! The event loop that owns the registry.
//!
//! A single task owns the [`JobRegistry`] and applies every change to it in
//! order: timer wakeups, executor reports, operator commands and
//! reconfiguration all arrive on one channel. Executions run as spawned
//! tasks and report back on that same channel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use cadence_graph::ConfigError;

use crate::command::OperatorCommand;
use crate::error::{EngineError, Rejection};
use crate::executor::{Dispatch, ExecutionOutcome, ExecutionRequest, Executor, StateStore, StopSignal};
use crate::id::ActionRunId;
use crate::registry::{Configuration, JobRegistry, ReconfigureSummary};
use crate::snapshot::StateSnapshot;

/// Minimum sleep between loop iterations.
const MIN_SLEEP_MILLIS: u64 = 10;

/// Maximum sleep between loop iterations.
const MAX_SLEEP_SECS: u64 = 60;

#[derive(Debug)]
enum Event {
    Started(ActionRunId),
    Finished(ActionRunId, ExecutionOutcome),
    Command(OperatorCommand, oneshot::Sender<Result<String, Rejection>>),
    Reconfigure(
        Box<Configuration>,
        oneshot::Sender<Result<ReconfigureSummary, ConfigError>>,
    ),
    Snapshot(oneshot::Sender<StateSnapshot>),
}

/// Launches executions as tasks that report back on the event channel.
struct TaskDispatch<'a> {
    executor: &'a Arc<dyn Executor>,
    events: &'a mpsc::UnboundedSender<Event>,
}

impl Dispatch for TaskDispatch<'_> {
    fn launch(&mut self, request: ExecutionRequest) {
        let executor = Arc::clone(self.executor);
        let events = self.events.clone();
        tokio::spawn(async move {
            let id = request.id.clone();
            let _ = events.send(Event::Started(id.clone()));
            let outcome = executor.execute(request).await;
            let _ = events.send(Event::Finished(id, outcome));
        });
    }

    fn signal(&mut self, id: &ActionRunId, signal: StopSignal) {
        let executor = Arc::clone(self.executor);
        let id = id.clone();
        tokio::spawn(async move {
            executor.signal(&id, signal).await;
        });
    }
}

/// How long to sleep until `next` is due, bounded to keep the loop responsive.
fn calculate_sleep_duration(next: Option<DateTime<Utc>>, now: DateTime<Utc>) -> std::time::Duration {
    let millis = match next {
        Some(next) => {
            let diff = (next - now).num_milliseconds();
            (diff.max(MIN_SLEEP_MILLIS as i64) as u64).min(MAX_SLEEP_SECS * 1000)
        }
        None => MAX_SLEEP_SECS * 1000,
    };
    std::time::Duration::from_millis(millis)
}

/// Sends commands to a running [`Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    events: mpsc::UnboundedSender<Event>,
}

impl SchedulerHandle {
    pub async fn command(&self, command: OperatorCommand) -> Result<String, Rejection> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(Event::Command(command, tx))
            .map_err(|_| Rejection::Unavailable)?;
        rx.await.map_err(|_| Rejection::Unavailable)?
    }

    /// Replace the job definitions. On error the running jobs are kept.
    pub async fn reconfigure(&self, config: Configuration) -> Result<ReconfigureSummary, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(Event::Reconfigure(Box::new(config), tx))
            .map_err(|_| EngineError::Unavailable)?;
        Ok(rx.await.map_err(|_| EngineError::Unavailable)??)
    }

    pub async fn snapshot(&self) -> Result<StateSnapshot, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(Event::Snapshot(tx))
            .map_err(|_| EngineError::Unavailable)?;
        rx.await.map_err(|_| EngineError::Unavailable)
    }
}

pub struct Scheduler {
    registry: JobRegistry,
    executor: Arc<dyn Executor>,
    store: Option<Arc<dyn StateStore>>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
}

impl Scheduler {
    pub fn new(registry: JobRegistry, executor: Arc<dyn Executor>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            registry,
            executor,
            store: None,
            events_tx,
            events_rx,
        }
    }

    /// Persist state to `store` after every change.
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            events: self.events_tx.clone(),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Load saved state from the store. Returns false if there was none.
    pub async fn restore(&mut self) -> Result<bool, EngineError> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let Some(snapshot) = store.load().await? else {
            info!("no saved state, starting fresh");
            return Ok(false);
        };

        let mut dispatch = TaskDispatch {
            executor: &self.executor,
            events: &self.events_tx,
        };
        self.registry.restore(snapshot, Utc::now(), &mut dispatch);
        Ok(true)
    }

    /// Run until `shutdown_rx` turns true. Returns the final registry.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) -> JobRegistry {
        info!("scheduler starting");
        self.registry.schedule_all(Utc::now());

        loop {
            if *shutdown_rx.borrow() {
                info!("scheduler shutting down");
                break;
            }

            let now = Utc::now();
            let mut dispatch = TaskDispatch {
                executor: &self.executor,
                events: &self.events_tx,
            };
            self.registry.fire_due(now, &mut dispatch);
            self.registry.check_overdue(now);
            self.persist().await;

            let sleep_duration = calculate_sleep_duration(self.registry.next_wakeup(), Utc::now());
            let event = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        info!("shutdown channel closed");
                        break;
                    }
                    None
                }
                event = self.events_rx.recv() => event,
                _ = sleep(sleep_duration) => None,
            };
            if let Some(event) = event {
                self.handle_event(event);
            }
        }

        self.persist().await;
        info!("scheduler shut down gracefully");
        self.registry
    }

    fn handle_event(&mut self, event: Event) {
        let now = Utc::now();
        let mut dispatch = TaskDispatch {
            executor: &self.executor,
            events: &self.events_tx,
        };

        match event {
            Event::Started(id) => {
                if let Err(e) = self.registry.handle_started(&id) {
                    debug!(action_run = %id, error = %e, "ignoring start report");
                }
            }
            Event::Finished(id, outcome) => {
                if let Err(e) = self.registry.handle_outcome(&id, outcome, now, &mut dispatch) {
                    warn!(action_run = %id, error = %e, "ignoring execution outcome");
                }
            }
            Event::Command(command, reply) => {
                let result = self.registry.execute(command, now, &mut dispatch);
                let _ = reply.send(result);
            }
            Event::Reconfigure(config, reply) => {
                let result = self.registry.reconfigure(&config, now);
                if let Err(e) = &result {
                    error!(error = %e, "reconfiguration rejected, keeping current jobs");
                }
                let _ = reply.send(result);
            }
            Event::Snapshot(reply) => {
                let _ = reply.send(self.registry.snapshot(now));
            }
        }
    }

    async fn persist(&mut self) {
        if !self.registry.take_dirty() {
            return;
        }
        let Some(store) = &self.store else {
            return;
        };
        let snapshot = self.registry.snapshot(Utc::now());
        if let Err(e) = store.save(&snapshot).await {
            error!(error = %e, "failed to save state");
            self.registry.mark_dirty();
        }
    }
}
