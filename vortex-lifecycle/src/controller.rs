//! Stop orchestration: graceful signal, grace period, forceful kill
//!
//! Each container has at most one termination sequence at a time. The
//! sequence runs in its own task and publishes its result on a `watch`
//! channel; the caller that started it and every caller that joined it wait
//! on that channel. Dropping a `stop` future therefore only detaches that
//! caller, the sequence itself runs to completion.
//!
//! ```text
//! Idle ──▶ Signaled(graceful) ──timeout──▶ Signaled(forceful) ──▶ Exited
//!                 │                                                 ▲
//!                 └────────────────────exit─────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;
use tokio::time::Instant;
use vortex_core::{
    ContainerEvent, ContainerId, Error, Result, State, StopSignal, StopTimeout,
};

use crate::dispatcher::SignalDispatcher;
use crate::environment::ProcessHandle;
use crate::events::EventSink;
use crate::registry::{ContainerEntry, ContainerRecord, ContainerRegistry, SequenceSlot};
use crate::waiter::{ExitWaiter, WaitOutcome};

/// Successful outcome of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StopStatus {
    /// The container was stopped by this request (or a request it joined)
    Stopped {
        /// Exit code of the stopped process
        exit_code: i32,
    },
    /// The container was not running; nothing was done
    NotModified,
}

impl StopStatus {
    /// Exit code, if this request stopped something
    #[must_use]
    pub const fn exit_code(self) -> Option<i32> {
        match self {
            Self::Stopped { exit_code } => Some(exit_code),
            Self::NotModified => None,
        }
    }
}

/// Orchestrates stop requests end to end
#[derive(Debug, Clone)]
pub struct StopController {
    registry: Arc<ContainerRegistry>,
    dispatcher: SignalDispatcher,
    waiter: ExitWaiter,
    default_timeout: StopTimeout,
    events: EventSink,
}

impl StopController {
    /// Create a controller
    #[must_use]
    pub const fn new(
        registry: Arc<ContainerRegistry>,
        dispatcher: SignalDispatcher,
        waiter: ExitWaiter,
        default_timeout: StopTimeout,
        events: EventSink,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            waiter,
            default_timeout,
            events,
        }
    }

    /// Stop a container from raw request parameters
    ///
    /// `signal` is a signal name such as `SIGTERM`; `timeout` is an integer
    /// number of seconds (`0` kills at once, negative waits forever).
    /// Parameters are validated before the container is looked up.
    ///
    /// # Errors
    /// - [`Error::Parse`] for a malformed `signal` or `timeout`
    /// - anything [`StopController::stop_with`] returns
    pub async fn stop(
        &self,
        id: &str,
        signal: Option<&str>,
        timeout: Option<&str>,
    ) -> Result<StopStatus> {
        let signal = signal.map(str::parse::<StopSignal>).transpose()?;
        let timeout = timeout.map(StopTimeout::parse).transpose()?;
        self.stop_with(id, signal, timeout).await
    }

    /// Stop a container
    ///
    /// `None` for `signal` or `timeout` uses the container's own setting,
    /// then the runtime default.
    ///
    /// # Errors
    /// - [`Error::NotFound`] for an unknown ID
    /// - [`Error::SignalDelivery`] if a signal could not be delivered; the
    ///   container stays `Stopping` and a later call resumes the stop
    /// - [`Error::InvalidState`] if bookkeeping found the container somewhere
    ///   it cannot be
    pub async fn stop_with(
        &self,
        id: &str,
        signal: Option<StopSignal>,
        timeout: Option<StopTimeout>,
    ) -> Result<StopStatus> {
        let entry = self.registry.get(id).await?;

        let sequence = {
            let mut record = entry.lock().await;
            match record.state() {
                State::Created | State::Stopped => {
                    tracing::debug!(container_id = id, state = %record.state(), "Container not running");
                    return Ok(StopStatus::NotModified);
                }
                State::Restarting => return self.cancel_restart(&entry, &mut record),
                State::Stopping => match record.live_sequence() {
                    Some(sequence) => {
                        tracing::debug!(container_id = id, "Joining in-flight stop");
                        sequence
                    }
                    None => {
                        tracing::info!(container_id = id, "Resuming interrupted stop");
                        self.begin(&entry, &mut record, signal, timeout)?
                    }
                },
                State::Running => {
                    if record.process().is_none() {
                        return Err(Error::InvalidState {
                            id: id.to_string(),
                            from: State::Running,
                            to: State::Stopping,
                            actual: State::Running,
                        });
                    }
                    record.stop_requested = true;
                    record.transition(entry.id(), State::Running, State::Stopping)?;
                    self.begin(&entry, &mut record, signal, timeout)?
                }
            }
        };

        await_sequence(entry.id(), sequence).await
    }

    /// A stop that lands during restart backoff: there is no process to
    /// signal, so cancel the relaunch and settle at once
    fn cancel_restart(
        &self,
        entry: &ContainerEntry,
        record: &mut ContainerRecord,
    ) -> Result<StopStatus> {
        if let Some(cancel) = record.restart_cancel.take() {
            cancel.cancel();
        }
        record.transition(entry.id(), State::Restarting, State::Stopped)?;

        let exit_code = record.last_exit_code().unwrap_or_default();
        self.events.emit(ContainerEvent::Stopped {
            id: entry.id().clone(),
            exit_code,
            timestamp: SystemTime::now(),
        });
        Ok(StopStatus::Stopped { exit_code })
    }

    /// Register and spawn a termination sequence; caller holds the lock and
    /// has already moved the container to `Stopping`
    fn begin(
        &self,
        entry: &Arc<ContainerEntry>,
        record: &mut ContainerRecord,
        signal: Option<StopSignal>,
        timeout: Option<StopTimeout>,
    ) -> Result<watch::Receiver<SequenceSlot>> {
        let process = record.process().cloned().ok_or_else(|| Error::InvalidState {
            id: entry.id().to_string(),
            from: State::Stopping,
            to: State::Stopped,
            actual: record.state(),
        })?;
        let (signal, timeout) = record.stop_parameters(signal, timeout, self.default_timeout);

        let (tx, rx) = watch::channel(None);
        record.sequence = Some(rx.clone());

        tracing::info!(
            container_id = %entry.id(),
            signal = %signal,
            timeout = %timeout,
            "Stopping container"
        );

        let controller = self.clone();
        let entry = Arc::clone(entry);
        tokio::spawn(async move {
            let result = controller.terminate(&entry, &process, signal, timeout).await;
            let result = controller.settle(&entry, result).await;
            tx.send_replace(Some(result));
        });

        Ok(rx)
    }

    /// Signal, wait, escalate, wait; returns the exit code
    async fn terminate(
        &self,
        entry: &ContainerEntry,
        process: &ProcessHandle,
        signal: StopSignal,
        timeout: StopTimeout,
    ) -> Result<i32> {
        let id = entry.id();

        self.signal(id, process, signal).await?;

        let outcome = match timeout {
            StopTimeout::Immediate => WaitOutcome::TimedOut,
            StopTimeout::Grace(grace) => {
                self.waiter
                    .wait_for_exit(id, process, Some(Instant::now() + grace))
                    .await?
            }
            StopTimeout::Unlimited => WaitOutcome::Exited(self.waiter.wait(id, process).await?),
        };

        match outcome {
            WaitOutcome::Exited(exit_code) => Ok(exit_code),
            WaitOutcome::TimedOut => {
                if !signal.is_forceful() {
                    self.events.emit(ContainerEvent::Escalated {
                        id: id.clone(),
                        grace: timeout.grace().unwrap_or_default(),
                        timestamp: SystemTime::now(),
                    });
                    self.signal(id, process, StopSignal::FORCEFUL).await?;
                }
                self.waiter.wait(id, process).await
            }
        }
    }

    async fn signal(&self, id: &ContainerId, process: &ProcessHandle, signal: StopSignal) -> Result<()> {
        self.dispatcher.send(id, process, signal).await?;
        self.events.emit(ContainerEvent::Signaled {
            id: id.clone(),
            signal,
            timestamp: SystemTime::now(),
        });
        Ok(())
    }

    /// Close out a sequence under the lock
    ///
    /// On success the container ends `Stopped` with the recorded exit code. On
    /// failure it stays `Stopping` with no live sequence, so the next stop
    /// starts a fresh one.
    async fn settle(&self, entry: &ContainerEntry, result: Result<i32>) -> Result<i32> {
        let id = entry.id();
        let mut record = entry.lock().await;
        record.sequence = None;

        match result {
            Ok(exit_code) => {
                if record.finish_stop(id, exit_code)? {
                    self.events.emit(ContainerEvent::Stopped {
                        id: id.clone(),
                        exit_code,
                        timestamp: SystemTime::now(),
                    });
                }
                Ok(record.last_exit_code().unwrap_or(exit_code))
            }
            Err(e) => {
                tracing::warn!(container_id = %id, error = %e, "Stop attempt failed, container left stopping");
                Err(e)
            }
        }
    }
}

async fn await_sequence(
    id: &ContainerId,
    mut sequence: watch::Receiver<SequenceSlot>,
) -> Result<StopStatus> {
    let slot = match sequence.wait_for(Option::is_some).await {
        Ok(slot) => slot.clone(),
        Err(_) => None,
    };

    match slot {
        Some(Ok(exit_code)) => Ok(StopStatus::Stopped { exit_code }),
        Some(Err(e)) => Err(e),
        None => Err(Error::ExitUnobserved { id: id.to_string() }),
    }
}
