//! Runs action commands as local subprocesses.

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};

use cadence_core::{ActionRunId, ExecutionOutcome, ExecutionRequest, Executor, StopSignal};

/// Runs every command through `<shell> -c` on this machine, whatever node it names.
pub struct LocalExecutor {
    shell: String,
    running: Mutex<HashMap<ActionRunId, oneshot::Sender<StopSignal>>>,
}

impl LocalExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            running: Mutex::new(HashMap::new()),
        }
    }
}

/// Deliver `signal` to `pid` with the system `kill` command.
async fn send_signal(pid: u32, signal: StopSignal) {
    let flag = match signal {
        StopSignal::Stop => "-TERM",
        StopSignal::Kill => "-KILL",
    };
    match Command::new("kill").arg(flag).arg(pid.to_string()).status().await {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(pid, %status, "kill exited unsuccessfully"),
        Err(e) => warn!(pid, error = %e, "failed to run kill"),
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(-1)
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
        let ExecutionRequest { id, command, node } = request;
        debug!(action_run = %id, node = %node.name, %command, "spawning command");

        let mut child = match Command::new(&self.shell)
            .arg("-c")
            .arg(&command)
            .env("CADENCE_ACTION_RUN", id.to_string())
            .env("CADENCE_NODE", &node.hostname)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(action_run = %id, shell = %self.shell, error = %e, "failed to spawn command");
                return ExecutionOutcome::FailedToStart(e.to_string());
            }
        };
        let pid = child.id();

        let (stop_tx, mut stop_rx) = oneshot::channel();
        self.running.lock().await.insert(id.clone(), stop_tx);

        let mut signalled = false;
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                signal = &mut stop_rx, if !signalled => {
                    signalled = true;
                    if let (Ok(signal), Some(pid)) = (signal, pid) {
                        send_signal(pid, signal).await;
                    }
                }
            }
        };
        self.running.lock().await.remove(&id);

        match status {
            Ok(status) => {
                let code = exit_code(status);
                info!(action_run = %id, exit_status = code, "command exited");
                ExecutionOutcome::Exited(code)
            }
            Err(e) => ExecutionOutcome::Lost(e.to_string()),
        }
    }

    async fn signal(&self, id: &ActionRunId, signal: StopSignal) {
        match self.running.lock().await.remove(id) {
            Some(tx) => {
                info!(action_run = %id, ?signal, "signalling command");
                let _ = tx.send(signal);
            }
            None => debug!(action_run = %id, "no running command to signal"),
        }
    }
}
