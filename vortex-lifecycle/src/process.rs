//! Host-process execution environment
//!
//! Each launch spawns the registered command as the leader of a new process
//! group and hands the child to a reaper task, which publishes the exit code
//! once `wait()` returns. Signals go to the whole group through `killpg(2)`,
//! so a shell's children are stopped along with the shell. When the leader
//! is reaped, whatever is left of its group is killed.

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::process::Command;
use tokio::sync::{Mutex, RwLock};
use vortex_core::{ContainerId, Error, ProcessId, Result, StopSignal};

use crate::environment::{
    ExecutionEnvironment, ExitNotifier, ExitSubscription, Launcher, ProcessHandle,
    platform_signal,
};

/// Exit notifiers of the latest run of each container
#[derive(Default)]
struct RunTable {
    exits: HashMap<u64, Arc<ExitNotifier>>,
    latest: HashMap<ContainerId, u64>,
}

impl RunTable {
    /// Track `run` as the current run of `id`, dropping the run it replaces
    fn track(&mut self, id: &ContainerId, run: u64, exit: Arc<ExitNotifier>) {
        if let Some(previous) = self.latest.insert(id.clone(), run) {
            self.exits.remove(&previous);
        }
        self.exits.insert(run, exit);
    }

    fn forget(&mut self, id: &ContainerId) {
        if let Some(run) = self.latest.remove(id) {
            self.exits.remove(&run);
        }
    }
}

/// Runs containers as plain host processes
#[derive(Default)]
pub struct ProcessEnvironment {
    commands: RwLock<HashMap<ContainerId, Vec<String>>>,
    runs: Mutex<RunTable>,
    next_run: AtomicU64,
}

impl ProcessEnvironment {
    /// Create an environment with no registered commands
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the command line launched for `id`
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] if `command` is empty
    pub async fn register_command(&self, id: &ContainerId, command: Vec<String>) -> Result<()> {
        if command.is_empty() {
            return Err(Error::InvalidConfig {
                message: format!("empty command for container {id}"),
            });
        }
        self.commands.write().await.insert(id.clone(), command);
        Ok(())
    }

    /// Number of runs whose exit is still tracked
    pub async fn tracked_runs(&self) -> usize {
        self.runs.lock().await.exits.len()
    }

    async fn notifier(&self, process: &ProcessHandle) -> Option<Arc<ExitNotifier>> {
        self.runs.lock().await.exits.get(&process.run()).cloned()
    }
}

impl std::fmt::Debug for ProcessEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessEnvironment")
            .field("next_run", &self.next_run.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Exit code as a shell reports it: the status code, or 128 + signal number
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signo| 128 + signo))
        .unwrap_or(-1)
}

/// Kill what is left of a reaped leader's group
fn sweep_group(container: &ContainerId, pid: ProcessId) {
    match signal::killpg(pid.as_nix_pid(), Signal::SIGKILL) {
        Ok(()) => tracing::debug!(container_id = %container, %pid, "Killed leftover group members"),
        Err(Errno::ESRCH) => {}
        Err(errno) => {
            tracing::warn!(container_id = %container, %pid, error = %errno, "Failed to sweep process group");
        }
    }
}

#[async_trait]
impl Launcher for ProcessEnvironment {
    async fn launch(&self, id: &ContainerId) -> Result<ProcessHandle> {
        let command = self
            .commands
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Launch {
                id: id.to_string(),
                message: "no command registered".to_string(),
            })?;

        let (program, args) = command.split_first().ok_or_else(|| Error::Launch {
            id: id.to_string(),
            message: "empty command".to_string(),
        })?;

        // The child leads its own group; its pid doubles as the group id.
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|e| Error::Launch {
                id: id.to_string(),
                message: format!("{program}: {e}"),
            })?;

        let raw_pid = child.id().ok_or_else(|| Error::Launch {
            id: id.to_string(),
            message: "child exited before its pid was read".to_string(),
        })?;
        let pid = ProcessId::from_raw(i32::try_from(raw_pid).map_err(|e| Error::Launch {
            id: id.to_string(),
            message: format!("pid {raw_pid} out of range: {e}"),
        })?);

        let run = self.next_run.fetch_add(1, Ordering::Relaxed) + 1;
        let exit = Arc::new(ExitNotifier::new());
        self.runs.lock().await.track(id, run, Arc::clone(&exit));

        let container = id.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            sweep_group(&container, pid);
            match status {
                Ok(status) => {
                    let code = exit_code(status);
                    tracing::debug!(container_id = %container, %pid, exit_code = code, "Process reaped");
                    exit.notify(code);
                }
                Err(e) => {
                    tracing::error!(container_id = %container, %pid, error = %e, "Failed to reap process");
                }
            }
        });

        tracing::info!(container_id = %id, %pid, run, program = %program, "Launched process");

        Ok(ProcessHandle::new(pid, run))
    }

    async fn forget(&self, id: &ContainerId) {
        self.runs.lock().await.forget(id);
    }
}

#[async_trait]
impl ExecutionEnvironment for ProcessEnvironment {
    async fn send_signal(&self, process: &ProcessHandle, stop_signal: StopSignal) -> Result<()> {
        let notifier = self.notifier(process).await.ok_or_else(|| Error::SignalDelivery {
            id: process.to_string(),
            signal: stop_signal.to_string(),
            message: "unknown process".to_string(),
        })?;

        // Once reaped the group has been swept and the pid may be reused.
        if notifier.exit_code().is_some() {
            tracing::debug!(%process, signal = %stop_signal, "Process already exited, signal skipped");
            return Ok(());
        }

        match signal::killpg(process.pid().as_nix_pid(), platform_signal(stop_signal)) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(Error::SignalDelivery {
                id: process.to_string(),
                signal: stop_signal.to_string(),
                message: errno.desc().to_string(),
            }),
        }
    }

    async fn subscribe_exit(&self, process: &ProcessHandle) -> Result<ExitSubscription> {
        self.notifier(process)
            .await
            .map(|exit| exit.subscribe())
            .ok_or_else(|| Error::InvalidConfig {
                message: format!("unknown process handle {process}"),
            })
    }
}
