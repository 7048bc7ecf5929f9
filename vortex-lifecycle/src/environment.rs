//! Execution environment seam: signal delivery, exit notification and launch

use async_trait::async_trait;
use nix::sys::signal::Signal;
use std::fmt;
use tokio::sync::watch;
use vortex_core::{ContainerId, ProcessId, Result, StopSignal};

/// Opaque handle to one run of a container's main process
///
/// A relaunch produces a new handle with a new `run` number, so exit events
/// from an earlier run can be told apart from the current one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessHandle {
    pid: ProcessId,
    run: u64,
}

impl ProcessHandle {
    /// Create a handle for `pid`, tagged with a unique run number
    #[must_use]
    pub const fn new(pid: ProcessId, run: u64) -> Self {
        Self { pid, run }
    }

    /// Host PID of the process
    #[must_use]
    pub const fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Run number assigned by the environment
    #[must_use]
    pub const fn run(&self) -> u64 {
        self.run
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {} (run {})", self.pid, self.run)
    }
}

/// Publishing side of a process's exit notification
#[derive(Debug)]
pub struct ExitNotifier {
    tx: watch::Sender<Option<i32>>,
}

impl ExitNotifier {
    /// Create a notifier with no exit recorded
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Record the exit code; later calls are ignored
    pub fn notify(&self, exit_code: i32) {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(exit_code);
            true
        });
    }

    /// Exit code, if the process has exited
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        *self.tx.borrow()
    }

    /// New subscription; sees the exit even if it already happened
    #[must_use]
    pub fn subscribe(&self) -> ExitSubscription {
        ExitSubscription {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ExitNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a process's exit notification
#[derive(Debug, Clone)]
pub struct ExitSubscription {
    rx: watch::Receiver<Option<i32>>,
}

impl ExitSubscription {
    /// Wait until the process exits
    ///
    /// Returns `None` if the notifier was dropped without recording an exit.
    /// Cancel-safe: dropping the future leaves the subscription usable.
    pub async fn exited(&mut self) -> Option<i32> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(code) => *code,
            Err(_) => None,
        }
    }

    /// Exit code, if already known
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        *self.rx.borrow()
    }
}

/// Delivers signals to, and reports exits of, container processes
///
/// Implementations:
/// - [`ProcessEnvironment`](crate::ProcessEnvironment) - host processes via `nix`
/// - [`MockEnvironment`](crate::MockEnvironment) - scripted processes for tests
#[async_trait]
pub trait ExecutionEnvironment: Send + Sync {
    /// Send `signal` to the process
    ///
    /// Signalling a process that has already exited succeeds.
    ///
    /// # Errors
    /// Returns [`vortex_core::Error::SignalDelivery`] if delivery failed
    async fn send_signal(&self, process: &ProcessHandle, signal: StopSignal) -> Result<()>;

    /// Subscribe to the process's exit
    ///
    /// # Errors
    /// Returns error if the handle is unknown to this environment
    async fn subscribe_exit(&self, process: &ProcessHandle) -> Result<ExitSubscription>;
}

/// Starts a container's main process (first start and supervisor relaunches)
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Launch a fresh run of the container's process
    ///
    /// # Errors
    /// Returns [`vortex_core::Error::Launch`] if the process cannot be started
    async fn launch(&self, id: &ContainerId) -> Result<ProcessHandle>;

    /// Drop what the launcher still tracks for a removed container
    async fn forget(&self, _id: &ContainerId) {}
}

/// Platform signal for a logical stop signal
#[must_use]
pub const fn platform_signal(signal: StopSignal) -> Signal {
    match signal {
        StopSignal::Term => Signal::SIGTERM,
        StopSignal::Int => Signal::SIGINT,
        StopSignal::Quit => Signal::SIGQUIT,
        StopSignal::Hup => Signal::SIGHUP,
        StopSignal::Kill => Signal::SIGKILL,
    }
}

/// Exit code reported for a process killed by `signal` (128 + signal number)
#[must_use]
pub const fn signal_exit_code(signal: StopSignal) -> i32 {
    128 + platform_signal(signal) as i32
}
