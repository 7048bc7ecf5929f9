//! Container runtime façade: registration, start, stop, inspection

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use vortex_core::{
    ContainerEvent, ContainerId, Error, Result, State, StopSignal, StopTimeout,
};

use crate::config::LifecycleConfig;
use crate::controller::{StopController, StopStatus};
use crate::dispatcher::SignalDispatcher;
use crate::environment::{ExecutionEnvironment, Launcher, ProcessHandle};
use crate::events::EventSink;
use crate::registry::{ContainerRegistry, ContainerSpec};
use crate::state_machine::ContainerStateMachine;
use crate::supervisor::RestartSupervisor;
use crate::waiter::ExitWaiter;

/// Point-in-time view of one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inspection {
    /// Container ID
    pub id: ContainerId,
    /// Lifecycle state
    pub state: State,
    /// Exit code of the last finished run
    pub exit_code: Option<i32>,
    /// Relaunches since the last explicit start
    pub restart_count: u32,
    /// An explicit stop is in flight
    pub stop_requested: bool,
    /// Host PID of the current run
    pub pid: Option<i32>,
}

/// Ties the registry, restart supervisor and stop controller together
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use vortex_lifecycle::{ContainerRuntime, ContainerSpec, LifecycleConfig, MockEnvironment, StopStatus};
/// use vortex_core::{ContainerId, State};
///
/// # #[tokio::main]
/// # async fn main() {
/// let env = Arc::new(MockEnvironment::new());
/// let runtime = ContainerRuntime::new(env.clone(), env, LifecycleConfig::default()).unwrap();
///
/// let id = ContainerId::new("web").unwrap();
/// runtime.register(id, ContainerSpec::default()).await.unwrap();
/// runtime.start("web").await.unwrap();
///
/// let status = runtime.stop("web", None, None).await.unwrap();
/// assert_eq!(status, StopStatus::Stopped { exit_code: 143 });
/// assert_eq!(runtime.state("web").await.unwrap(), State::Stopped);
/// # }
/// ```
pub struct ContainerRuntime {
    registry: Arc<ContainerRegistry>,
    env: Arc<dyn ExecutionEnvironment>,
    launcher: Arc<dyn Launcher>,
    config: LifecycleConfig,
    state_machine: ContainerStateMachine,
    supervisor: Arc<RestartSupervisor>,
    controller: StopController,
    events: EventSink,
}

impl ContainerRuntime {
    /// Create a runtime over an execution environment and launcher
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] if `config` does not validate
    pub fn new(
        env: Arc<dyn ExecutionEnvironment>,
        launcher: Arc<dyn Launcher>,
        config: LifecycleConfig,
    ) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(ContainerRegistry::new());
        Ok(Self::assemble(registry, env, launcher, config, EventSink::tracing_only()))
    }

    /// Also forward lifecycle events to `tx`
    #[must_use]
    pub fn with_events(self, tx: mpsc::Sender<ContainerEvent>) -> Self {
        Self::assemble(
            self.registry,
            self.env,
            self.launcher,
            self.config,
            EventSink::new(tx),
        )
    }

    fn assemble(
        registry: Arc<ContainerRegistry>,
        env: Arc<dyn ExecutionEnvironment>,
        launcher: Arc<dyn Launcher>,
        config: LifecycleConfig,
        events: EventSink,
    ) -> Self {
        let supervisor = Arc::new(RestartSupervisor::new(
            Arc::clone(&env),
            Arc::clone(&launcher),
            config.restart_backoff,
            events.clone(),
        ));
        let controller = StopController::new(
            Arc::clone(&registry),
            SignalDispatcher::new(Arc::clone(&env)),
            ExitWaiter::new(Arc::clone(&env)),
            config.default_stop_timeout(),
            events.clone(),
        );

        Self {
            state_machine: ContainerStateMachine::new(Arc::clone(&registry)),
            registry,
            env,
            launcher,
            config,
            supervisor,
            controller,
            events,
        }
    }

    /// Register a container in `Created`
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] if `id` is already registered
    pub async fn register(&self, id: ContainerId, spec: ContainerSpec) -> Result<()> {
        tracing::debug!(container_id = %id, restart = %spec.restart_policy, "Registering container");
        self.registry.insert(id, spec).await.map(|_| ())
    }

    /// Launch a `Created` or `Stopped` container and supervise it
    ///
    /// Resets the restart count.
    ///
    /// # Errors
    /// - [`Error::NotFound`] for an unknown ID
    /// - [`Error::InvalidState`] if the container is already live
    /// - the launcher's error if the process cannot be started
    pub async fn start(&self, id: &str) -> Result<ProcessHandle> {
        let entry = self.registry.get(id).await?;
        let mut record = entry.lock().await;

        let from = record.state();
        if !from.can_transition_to(State::Running) || from == State::Restarting {
            return Err(Error::InvalidState {
                id: id.to_string(),
                from,
                to: State::Running,
                actual: from,
            });
        }

        let process = self.launcher.launch(entry.id()).await?;
        record.transition(entry.id(), from, State::Running)?;
        record.process = Some(process.clone());
        record.restart_count = 0;
        record.stop_requested = false;

        self.events.emit(ContainerEvent::Started {
            id: entry.id().clone(),
            restart_count: 0,
            timestamp: SystemTime::now(),
        });

        self.supervisor.watch(Arc::clone(&entry), process.clone()).await?;
        Ok(process)
    }

    /// Stop a container from raw request parameters
    ///
    /// # Errors
    /// See [`StopController::stop`]
    pub async fn stop(
        &self,
        id: &str,
        signal: Option<&str>,
        timeout: Option<&str>,
    ) -> Result<StopStatus> {
        self.controller.stop(id, signal, timeout).await
    }

    /// Stop a container with typed parameters
    ///
    /// # Errors
    /// See [`StopController::stop_with`]
    pub async fn stop_with(
        &self,
        id: &str,
        signal: Option<StopSignal>,
        timeout: Option<StopTimeout>,
    ) -> Result<StopStatus> {
        self.controller.stop_with(id, signal, timeout).await
    }

    /// Current lifecycle state
    ///
    /// # Errors
    /// [`Error::NotFound`] for an unknown ID
    pub async fn state(&self, id: &str) -> Result<State> {
        self.state_machine.current_state(id).await
    }

    /// Snapshot of a container
    ///
    /// # Errors
    /// [`Error::NotFound`] for an unknown ID
    pub async fn inspect(&self, id: &str) -> Result<Inspection> {
        let entry = self.registry.get(id).await?;
        let record = entry.lock().await;

        Ok(Inspection {
            id: entry.id().clone(),
            state: record.state(),
            exit_code: record.last_exit_code(),
            restart_count: record.restart_count(),
            stop_requested: record.stop_requested(),
            pid: record.process().map(|p| p.pid().as_raw()),
        })
    }

    /// Forget a container that is not live
    ///
    /// # Errors
    /// [`Error::NotFound`] or [`Error::InvalidState`]
    pub async fn remove(&self, id: &str) -> Result<()> {
        let entry = self.registry.get(id).await?;
        self.registry.remove(id).await?;
        self.launcher.forget(entry.id()).await;
        Ok(())
    }

    /// Registered container IDs, sorted
    pub async fn containers(&self) -> Vec<ContainerId> {
        self.registry.ids().await
    }
}

impl std::fmt::Debug for ContainerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerRuntime")
            .field("config", &self.config)
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockEnvironment, ProcessScript};
    use std::time::Duration;
    use vortex_core::RestartPolicy;

    fn runtime(env: &Arc<MockEnvironment>) -> ContainerRuntime {
        ContainerRuntime::new(env.clone(), env.clone(), LifecycleConfig::default()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_then_inspect() {
        let env = Arc::new(MockEnvironment::new());
        let runtime = runtime(&env);
        runtime
            .register(ContainerId::new("a").unwrap(), ContainerSpec::default())
            .await
            .unwrap();

        let created = runtime.inspect("a").await.unwrap();
        assert_eq!(created.state, State::Created);
        assert_eq!(created.pid, None);

        let process = runtime.start("a").await.unwrap();
        let running = runtime.inspect("a").await.unwrap();
        assert_eq!(running.state, State::Running);
        assert_eq!(running.pid, Some(process.pid().as_raw()));

        let err = runtime.start("a").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_natural_exit_settles_and_restarts_on_start() {
        let env = Arc::new(MockEnvironment::new());
        let id = ContainerId::new("job").unwrap();
        env.set_script(&id, ProcessScript::exits_after(Duration::from_secs(1), 7))
            .await;
        let runtime = runtime(&env);
        runtime.register(id.clone(), ContainerSpec::default()).await.unwrap();

        runtime.start("job").await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let done = runtime.inspect("job").await.unwrap();
        assert_eq!(done.state, State::Stopped);
        assert_eq!(done.exit_code, Some(7));
        assert_eq!(
            runtime.stop("job", None, None).await.unwrap(),
            StopStatus::NotModified
        );

        runtime.start("job").await.unwrap();
        assert_eq!(env.launch_count(&id).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_only_when_not_live() {
        let env = Arc::new(MockEnvironment::new());
        let runtime = runtime(&env);
        runtime
            .register(ContainerId::new("r").unwrap(), ContainerSpec::default())
            .await
            .unwrap();
        runtime.start("r").await.unwrap();

        assert!(matches!(
            runtime.remove("r").await,
            Err(Error::InvalidState { .. })
        ));
        runtime.stop("r", None, None).await.unwrap();
        runtime.remove("r").await.unwrap();
        assert!(runtime.containers().await.is_empty());
        assert_eq!(env.tracked_runs().await, 0);
        assert!(runtime.inspect("r").await.unwrap_err().is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_queued_behind_an_exit_does_not_restart() {
        let env = Arc::new(MockEnvironment::new());
        let id = ContainerId::new("race").unwrap();
        env.set_script(&id, ProcessScript::exits_after(Duration::from_secs(1), 1))
            .await;
        let runtime = Arc::new(runtime(&env));
        runtime
            .register(
                id.clone(),
                ContainerSpec::default().with_restart_policy(RestartPolicy::Always),
            )
            .await
            .unwrap();
        runtime.start("race").await.unwrap();

        let entry = runtime.registry.get("race").await.unwrap();
        let guard = entry.lock().await;

        // The stop queues on the lock first, then the process exits and the
        // supervisor queues behind it.
        let stopper = Arc::clone(&runtime);
        let stop = tokio::spawn(async move { stopper.stop("race", None, None).await });
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(guard.state(), State::Running);
        drop(guard);

        let status = stop.await.unwrap().unwrap();
        assert_eq!(status, StopStatus::Stopped { exit_code: 1 });
        assert_eq!(runtime.state("race").await.unwrap(), State::Stopped);
        assert_eq!(env.launch_count(&id).await, 1);

        // Well past any restart backoff
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(runtime.state("race").await.unwrap(), State::Stopped);
        assert_eq!(env.launch_count(&id).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_reach_channel() {
        let env = Arc::new(MockEnvironment::new());
        let (tx, mut rx) = mpsc::channel(16);
        let runtime = runtime(&env).with_events(tx);
        runtime
            .register(
                ContainerId::new("ev").unwrap(),
                ContainerSpec::default().with_restart_policy(RestartPolicy::No),
            )
            .await
            .unwrap();

        runtime.start("ev").await.unwrap();
        runtime.stop("ev", None, None).await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                ContainerEvent::Started { .. } => "started",
                ContainerEvent::Signaled { .. } => "signaled",
                ContainerEvent::Stopped { .. } => "stopped",
                _ => "other",
            });
        }
        assert_eq!(kinds, vec!["started", "signaled", "stopped"]);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let env = Arc::new(MockEnvironment::new());
        let config = LifecycleConfig {
            event_buffer: 0,
            ..LifecycleConfig::default()
        };
        assert!(matches!(
            ContainerRuntime::new(env.clone(), env, config),
            Err(Error::InvalidConfig { .. })
        ));
    }
}
