//! Restart supervision driven by process exit events
//!
//! For every launched run the supervisor parks a task on the run's exit
//! notification. When the exit arrives it decides, under the container lock,
//! between three outcomes:
//!
//! - an explicit stop is in flight: settle in `Stopped`, never relaunch;
//! - the restart policy says so: `Running -> Restarting`, back off, relaunch;
//! - otherwise: `Running -> Stopped`.
//!
//! Deciding and acting in one critical section is what keeps a stop request
//! from being lost between an exit and a relaunch.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;
use vortex_core::{ContainerEvent, Result, State};

use crate::config::BackoffConfig;
use crate::environment::{ExecutionEnvironment, ExitSubscription, Launcher, ProcessHandle};
use crate::events::EventSink;
use crate::registry::ContainerEntry;

/// Reacts to exits and relaunches containers per their restart policy
pub struct RestartSupervisor {
    env: Arc<dyn ExecutionEnvironment>,
    launcher: Arc<dyn Launcher>,
    backoff: BackoffConfig,
    events: EventSink,
}

impl RestartSupervisor {
    /// Create a supervisor
    #[must_use]
    pub fn new(
        env: Arc<dyn ExecutionEnvironment>,
        launcher: Arc<dyn Launcher>,
        backoff: BackoffConfig,
        events: EventSink,
    ) -> Self {
        Self {
            env,
            launcher,
            backoff,
            events,
        }
    }

    /// Start watching `process` for exit in the background
    ///
    /// The subscription is taken before returning, so an exit that happens
    /// immediately is still delivered.
    ///
    /// # Errors
    /// Returns the environment's error if the exit cannot be subscribed to
    pub async fn watch(self: &Arc<Self>, entry: Arc<ContainerEntry>, process: ProcessHandle) -> Result<()> {
        let exit = self.env.subscribe_exit(&process).await?;
        tokio::spawn(Arc::clone(self).supervise(entry, process, exit));
        Ok(())
    }

    // Boxed so the relaunch -> watch -> supervise -> handle_exit cycle has a
    // nameable `Send` future type.
    fn supervise(
        self: Arc<Self>,
        entry: Arc<ContainerEntry>,
        process: ProcessHandle,
        mut exit: ExitSubscription,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            match exit.exited().await {
                Some(exit_code) => self.handle_exit(&entry, &process, exit_code).await,
                None => tracing::warn!(
                    container_id = %entry.id(),
                    %process,
                    "Exit notification closed without an exit code"
                ),
            }
        })
    }

    /// React to `process` exiting with `exit_code`
    ///
    /// Returns once the container has settled (`Stopped` or relaunched), or
    /// once a pending relaunch was cancelled by a stop.
    pub async fn handle_exit(self: &Arc<Self>, entry: &Arc<ContainerEntry>, process: &ProcessHandle, exit_code: i32) {
        let id = entry.id();
        let mut record = entry.lock().await;

        if record.process() != Some(process) {
            tracing::debug!(container_id = %id, %process, "Ignoring exit of a stale run");
            return;
        }

        if record.stop_requested() {
            match record.finish_stop(id, exit_code) {
                Ok(true) => self.emit_stopped(entry, exit_code),
                Ok(false) => {}
                Err(e) => tracing::error!(container_id = %id, error = %e, "Cannot settle stopped container"),
            }
            return;
        }

        let attempt = record.restart_count();
        record.last_exit_code = Some(exit_code);
        record.process = None;

        if !record.restart_policy().should_restart(exit_code, attempt) {
            if let Err(e) = record.transition(id, State::Running, State::Stopped) {
                tracing::error!(container_id = %id, error = %e, "Cannot settle exited container");
                return;
            }
            drop(record);
            self.emit_stopped(entry, exit_code);
            return;
        }

        if let Err(e) = record.transition(id, State::Running, State::Restarting) {
            tracing::error!(container_id = %id, error = %e, "Cannot schedule restart");
            return;
        }
        record.restart_count = attempt + 1;

        let cancel = CancellationToken::new();
        record.restart_cancel = Some(cancel.clone());
        drop(record);

        let delay = self.backoff.delay(attempt);
        self.events.emit(ContainerEvent::Restarting {
            id: id.clone(),
            exit_code,
            attempt: attempt + 1,
            delay,
            timestamp: SystemTime::now(),
        });

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = cancel.cancelled() => {
                tracing::debug!(container_id = %id, "Pending restart cancelled");
                return;
            }
        }

        self.relaunch(entry).await;
    }

    /// Relaunch a `Restarting` container, holding its lock across the launch
    async fn relaunch(self: &Arc<Self>, entry: &Arc<ContainerEntry>) {
        let id = entry.id();
        let mut record = entry.lock().await;

        if record.state() != State::Restarting {
            tracing::debug!(container_id = %id, state = %record.state(), "Restart abandoned");
            return;
        }
        record.restart_cancel = None;

        let process = match self.launcher.launch(id).await {
            Ok(process) => process,
            Err(e) => {
                tracing::error!(container_id = %id, error = %e, "Relaunch failed");
                if record.transition(id, State::Restarting, State::Stopped).is_ok() {
                    self.events.emit(ContainerEvent::Error {
                        id: id.clone(),
                        message: e.to_string(),
                        timestamp: SystemTime::now(),
                    });
                }
                return;
            }
        };

        if let Err(e) = record.transition(id, State::Restarting, State::Running) {
            tracing::error!(container_id = %id, error = %e, "Cannot mark relaunched container running");
            return;
        }
        record.process = Some(process.clone());

        self.events.emit(ContainerEvent::Started {
            id: id.clone(),
            restart_count: record.restart_count(),
            timestamp: SystemTime::now(),
        });

        // Still under the lock: a stop cannot see `Running` before the new
        // run is being watched.
        if let Err(e) = self.watch(Arc::clone(entry), process).await {
            tracing::error!(container_id = %id, error = %e, "Cannot watch relaunched process");
        }
    }

    fn emit_stopped(&self, entry: &ContainerEntry, exit_code: i32) {
        self.events.emit(ContainerEvent::Stopped {
            id: entry.id().clone(),
            exit_code,
            timestamp: SystemTime::now(),
        });
    }
}

impl std::fmt::Debug for RestartSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestartSupervisor")
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}
