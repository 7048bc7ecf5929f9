//! Scripted execution environment for tests (no real processes)

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, sleep_until};
use vortex_core::{ContainerId, Error, ProcessId, Result, StopSignal};

use crate::environment::{
    ExecutionEnvironment, ExitNotifier, ExitSubscription, Launcher, ProcessHandle,
    signal_exit_code,
};

/// How a scripted process reacts to a non-kill stop signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnTerminate {
    /// Keep running (a shell running as PID 1 does this with `SIGTERM`)
    Ignore,
    /// Exit with the given code after the given delay
    ExitAfter(Duration, i32),
}

/// Behavior of one simulated container process
///
/// # Example
/// ```
/// use std::time::Duration;
/// use vortex_lifecycle::{OnTerminate, ProcessScript};
///
/// // sh -c "sleep 10 && exit 42", which ignores SIGTERM
/// let script = ProcessScript::exits_after(Duration::from_secs(10), 42)
///     .on_terminate(OnTerminate::Ignore);
/// assert_eq!(script.exit_code, 42);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessScript {
    /// Natural lifetime; `None` runs until signalled
    pub runs_for: Option<Duration>,
    /// Exit code at the end of the natural lifetime
    pub exit_code: i32,
    /// Reaction to graceful signals
    pub on_terminate: OnTerminate,
}

impl ProcessScript {
    /// Runs until signalled; exits promptly with 128 + signal on a graceful signal
    #[must_use]
    pub const fn forever() -> Self {
        Self {
            runs_for: None,
            exit_code: 0,
            on_terminate: OnTerminate::ExitAfter(Duration::ZERO, signal_exit_code(StopSignal::Term)),
        }
    }

    /// Exits on its own after `runs_for` with `exit_code`, and promptly on a graceful signal
    #[must_use]
    pub const fn exits_after(runs_for: Duration, exit_code: i32) -> Self {
        Self {
            runs_for: Some(runs_for),
            exit_code,
            on_terminate: OnTerminate::ExitAfter(Duration::ZERO, signal_exit_code(StopSignal::Term)),
        }
    }

    /// Override the reaction to graceful signals
    #[must_use]
    pub const fn on_terminate(mut self, on_terminate: OnTerminate) -> Self {
        self.on_terminate = on_terminate;
        self
    }
}

impl Default for ProcessScript {
    fn default() -> Self {
        Self::forever()
    }
}

struct MockProcess {
    container: ContainerId,
    signals: mpsc::UnboundedSender<StopSignal>,
    exit: Arc<ExitNotifier>,
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<ContainerId, ProcessScript>,
    processes: HashMap<u64, MockProcess>,
    latest: HashMap<ContainerId, u64>,
    signal_log: Vec<(ContainerId, StopSignal)>,
    failing_signals: HashSet<ContainerId>,
    failing_launches: HashSet<ContainerId>,
    launches: HashMap<ContainerId, u32>,
    next_run: u64,
}

/// Mock execution environment for testing (doesn't spawn processes)
///
/// Every launch starts a tokio task that plays a [`ProcessScript`]. Timing
/// follows tokio's clock, so tests can run under `start_paused = true`.
#[derive(Clone, Default)]
pub struct MockEnvironment {
    state: Arc<Mutex<MockState>>,
}

impl MockEnvironment {
    /// Create a new mock environment
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the processes launched for `id` from now on
    pub async fn set_script(&self, id: &ContainerId, script: ProcessScript) {
        self.state.lock().await.scripts.insert(id.clone(), script);
    }

    /// Make signal delivery to `id` fail (or succeed again)
    pub async fn fail_signals(&self, id: &ContainerId, fail: bool) {
        let mut state = self.state.lock().await;
        if fail {
            state.failing_signals.insert(id.clone());
        } else {
            state.failing_signals.remove(id);
        }
    }

    /// Make launches of `id` fail (or succeed again)
    pub async fn fail_launches(&self, id: &ContainerId, fail: bool) {
        let mut state = self.state.lock().await;
        if fail {
            state.failing_launches.insert(id.clone());
        } else {
            state.failing_launches.remove(id);
        }
    }

    /// Signals successfully delivered to `id`, in order (for testing)
    pub async fn signals_sent(&self, id: &ContainerId) -> Vec<StopSignal> {
        self.state
            .lock()
            .await
            .signal_log
            .iter()
            .filter(|(target, _)| target == id)
            .map(|(_, signal)| *signal)
            .collect()
    }

    /// Number of processes launched for `id` (for testing)
    pub async fn launch_count(&self, id: &ContainerId) -> u32 {
        self.state
            .lock()
            .await
            .launches
            .get(id)
            .copied()
            .unwrap_or_default()
    }

    /// Number of runs still tracked (for testing)
    pub async fn tracked_runs(&self) -> usize {
        self.state.lock().await.processes.len()
    }
}

impl std::fmt::Debug for MockEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockEnvironment").finish_non_exhaustive()
    }
}

/// Play `script` until the process exits, then publish the exit code
async fn simulate(
    script: ProcessScript,
    mut signals: mpsc::UnboundedReceiver<StopSignal>,
    exit: Arc<ExitNotifier>,
) {
    let mut deadline = script.runs_for.map(|d| Instant::now() + d);
    let mut exit_code = script.exit_code;

    loop {
        let natural_exit = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            () = natural_exit => break,
            signal = signals.recv() => match signal {
                Some(signal) if signal.is_forceful() => {
                    exit_code = signal_exit_code(signal);
                    break;
                }
                Some(_) => {
                    if let OnTerminate::ExitAfter(delay, code) = script.on_terminate {
                        let at = Instant::now() + delay;
                        if deadline.is_none_or(|current| at < current) {
                            deadline = Some(at);
                            exit_code = code;
                        }
                    }
                }
                None => return,
            },
        }
    }

    exit.notify(exit_code);
}

#[async_trait]
impl Launcher for MockEnvironment {
    async fn launch(&self, id: &ContainerId) -> Result<ProcessHandle> {
        let mut state = self.state.lock().await;

        if state.failing_launches.contains(id) {
            return Err(Error::Launch {
                id: id.to_string(),
                message: "mock launch failure".to_string(),
            });
        }

        let script = state.scripts.get(id).copied().unwrap_or_default();
        state.next_run += 1;
        let run = state.next_run;
        *state.launches.entry(id.clone()).or_default() += 1;

        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let exit = Arc::new(ExitNotifier::new());
        tokio::spawn(simulate(script, signals_rx, Arc::clone(&exit)));

        // Only the latest run of each container stays tracked.
        if let Some(previous) = state.latest.insert(id.clone(), run) {
            state.processes.remove(&previous);
        }
        state.processes.insert(
            run,
            MockProcess {
                container: id.clone(),
                signals: signals_tx,
                exit,
            },
        );

        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let pid = ProcessId::from_raw(10_000 + run as i32);

        tracing::debug!(container_id = %id, run, "Mock: Launched process");

        Ok(ProcessHandle::new(pid, run))
    }

    async fn forget(&self, id: &ContainerId) {
        let mut state = self.state.lock().await;
        if let Some(run) = state.latest.remove(id) {
            state.processes.remove(&run);
        }
    }
}

#[async_trait]
impl ExecutionEnvironment for MockEnvironment {
    async fn send_signal(&self, process: &ProcessHandle, signal: StopSignal) -> Result<()> {
        let mut state = self.state.lock().await;

        let Some(target) = state.processes.get(&process.run()) else {
            return Err(Error::SignalDelivery {
                id: process.to_string(),
                signal: signal.to_string(),
                message: "unknown process".to_string(),
            });
        };
        let container = target.container.clone();

        if state.failing_signals.contains(&container) {
            return Err(Error::SignalDelivery {
                id: container.to_string(),
                signal: signal.to_string(),
                message: "mock delivery failure".to_string(),
            });
        }

        // An exited process has dropped its receiver; like kill(2) on a
        // zombie, that still counts as delivered.
        let _ = target.signals.send(signal);
        state.signal_log.push((container, signal));

        tracing::debug!(run = process.run(), signal = %signal, "Mock: Delivered signal");
        Ok(())
    }

    async fn subscribe_exit(&self, process: &ProcessHandle) -> Result<ExitSubscription> {
        let state = self.state.lock().await;
        state
            .processes
            .get(&process.run())
            .map(|p| p.exit.subscribe())
            .ok_or_else(|| Error::InvalidConfig {
                message: format!("unknown process handle {process}"),
            })
    }
}
