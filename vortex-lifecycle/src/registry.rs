//! Container registry: ID → independently lockable entry
//!
//! The map itself is behind a registry-wide `RwLock` that is only held for
//! lookups, inserts and removals. Everything about one container lives in its
//! [`ContainerEntry`], behind that entry's own mutex; operations on different
//! containers never contend.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock, watch};
use tokio_util::sync::CancellationToken;
use vortex_core::{
    ContainerId, Error, RestartPolicy, Result, State, StopSignal, StopTimeout,
};

use crate::environment::ProcessHandle;

/// Result slot of one termination sequence, `None` while it runs
pub(crate) type SequenceSlot = Option<Result<i32>>;

/// Per-container settings fixed at registration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSpec {
    /// What to do when the process exits on its own
    pub restart_policy: RestartPolicy,
    /// Signal sent first when stopping
    pub stop_signal: StopSignal,
    /// Stop timeout in seconds; `None` uses the runtime default
    pub stop_timeout_secs: Option<i64>,
}

impl ContainerSpec {
    /// Set the restart policy
    #[must_use]
    pub const fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    /// Set the signal sent first when stopping
    #[must_use]
    pub const fn with_stop_signal(mut self, signal: StopSignal) -> Self {
        self.stop_signal = signal;
        self
    }

    /// Set the container's own stop timeout
    #[must_use]
    pub const fn with_stop_timeout(mut self, secs: i64) -> Self {
        self.stop_timeout_secs = Some(secs);
        self
    }
}

/// Mutable lifecycle data of one container
///
/// Only reachable through [`ContainerEntry::lock`], so every read-modify-write
/// of the state and the stop flag is a single critical section.
#[derive(Debug)]
pub struct ContainerRecord {
    pub(crate) state: State,
    pub(crate) spec: ContainerSpec,
    pub(crate) stop_requested: bool,
    pub(crate) last_exit_code: Option<i32>,
    pub(crate) process: Option<ProcessHandle>,
    pub(crate) restart_count: u32,
    /// In-flight termination sequence; joiners clone this receiver
    pub(crate) sequence: Option<watch::Receiver<SequenceSlot>>,
    /// Cancels the supervisor's pending relaunch while `Restarting`
    pub(crate) restart_cancel: Option<CancellationToken>,
}

impl ContainerRecord {
    fn new(spec: ContainerSpec) -> Self {
        Self {
            state: State::Created,
            spec,
            stop_requested: false,
            last_exit_code: None,
            process: None,
            restart_count: 0,
            sequence: None,
            restart_cancel: None,
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Whether an explicit stop is in progress
    #[must_use]
    pub const fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Exit code of the last run that ended
    #[must_use]
    pub const fn last_exit_code(&self) -> Option<i32> {
        self.last_exit_code
    }

    /// Handle of the live process, if any
    #[must_use]
    pub const fn process(&self) -> Option<&ProcessHandle> {
        self.process.as_ref()
    }

    /// Relaunches performed by the supervisor since the last explicit start
    #[must_use]
    pub const fn restart_count(&self) -> u32 {
        self.restart_count
    }

    /// Restart policy
    #[must_use]
    pub const fn restart_policy(&self) -> RestartPolicy {
        self.spec.restart_policy
    }

    /// Signal and timeout to stop with, falling back to the container's own
    /// settings and then to `default_timeout`
    pub(crate) fn stop_parameters(
        &self,
        signal: Option<StopSignal>,
        timeout: Option<StopTimeout>,
        default_timeout: StopTimeout,
    ) -> (StopSignal, StopTimeout) {
        let signal = signal.unwrap_or(self.spec.stop_signal);
        let timeout = timeout
            .or_else(|| self.spec.stop_timeout_secs.map(StopTimeout::from_secs))
            .unwrap_or(default_timeout);
        (signal, timeout)
    }

    /// Receiver of the running termination sequence, if one is still live
    pub(crate) fn live_sequence(&self) -> Option<watch::Receiver<SequenceSlot>> {
        self.sequence
            .as_ref()
            .filter(|rx| rx.borrow().is_none() && rx.has_changed().is_ok())
            .cloned()
    }
}

/// One registered container
#[derive(Debug)]
pub struct ContainerEntry {
    id: ContainerId,
    record: Mutex<ContainerRecord>,
}

impl ContainerEntry {
    /// Container ID
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Acquire this container's lock
    pub async fn lock(&self) -> MutexGuard<'_, ContainerRecord> {
        self.record.lock().await
    }
}

/// Concurrent ID → container mapping
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    entries: RwLock<HashMap<ContainerId, Arc<ContainerEntry>>>,
}

impl ContainerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a container in `Created` state
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if the ID is already registered
    pub async fn insert(&self, id: ContainerId, spec: ContainerSpec) -> Result<Arc<ContainerEntry>> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&id) {
            return Err(Error::InvalidConfig {
                message: format!("container {id} already exists"),
            });
        }

        let entry = Arc::new(ContainerEntry {
            id: id.clone(),
            record: Mutex::new(ContainerRecord::new(spec)),
        });
        entries.insert(id, Arc::clone(&entry));
        Ok(entry)
    }

    /// Look up a container
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for an unknown ID
    pub async fn get(&self, id: &str) -> Result<Arc<ContainerEntry>> {
        self.entries
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound { id: id.to_string() })
    }

    /// Remove a container that has no live process
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for an unknown ID, or
    /// [`Error::InvalidState`] unless the container is `Created` or `Stopped`
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get(id)
            .ok_or_else(|| Error::NotFound { id: id.to_string() })?;

        let state = entry.lock().await.state;
        if !matches!(state, State::Created | State::Stopped) {
            return Err(Error::InvalidState {
                id: id.to_string(),
                from: State::Stopped,
                to: State::Stopped,
                actual: state,
            });
        }

        entries.remove(id);
        tracing::debug!(container_id = id, "Container removed from registry");
        Ok(())
    }

    /// IDs of all registered containers, sorted
    pub async fn ids(&self) -> Vec<ContainerId> {
        let mut ids: Vec<_> = self.entries.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered containers
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// `true` if nothing is registered
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> ContainerId {
        ContainerId::new(raw).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_lookup_by_str() {
        let registry = ContainerRegistry::new();
        registry
            .insert(id("web"), ContainerSpec::default())
            .await
            .unwrap();

        let entry = registry.get("web").await.unwrap();
        assert_eq!(entry.id().as_str(), "web");
        assert_eq!(entry.lock().await.state(), State::Created);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let registry = ContainerRegistry::new();
        let err = registry.get("test1234").await.unwrap_err();
        assert_eq!(err.to_string(), "No such container: test1234");
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let registry = ContainerRegistry::new();
        registry
            .insert(id("db"), ContainerSpec::default())
            .await
            .unwrap();
        assert!(
            registry
                .insert(id("db"), ContainerSpec::default())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_remove_requires_no_process() {
        let registry = ContainerRegistry::new();
        let entry = registry
            .insert(id("job"), ContainerSpec::default())
            .await
            .unwrap();

        entry.lock().await.state = State::Running;
        assert!(matches!(
            registry.remove("job").await,
            Err(Error::InvalidState { .. })
        ));

        entry.lock().await.state = State::Stopped;
        registry.remove("job").await.unwrap();
        assert!(registry.is_empty().await);
    }

    #[test]
    fn test_stop_parameters_fall_back_in_order() {
        let default = StopTimeout::from_secs(10);
        let record = ContainerRecord::new(ContainerSpec::default());
        assert_eq!(
            record.stop_parameters(None, None, default),
            (StopSignal::Term, default)
        );

        let record = ContainerRecord::new(
            ContainerSpec::default()
                .with_stop_signal(StopSignal::Int)
                .with_stop_timeout(-1),
        );
        assert_eq!(
            record.stop_parameters(None, None, default),
            (StopSignal::Int, StopTimeout::Unlimited)
        );
        assert_eq!(
            record.stop_parameters(Some(StopSignal::Quit), Some(StopTimeout::Immediate), default),
            (StopSignal::Quit, StopTimeout::Immediate)
        );
    }
}
