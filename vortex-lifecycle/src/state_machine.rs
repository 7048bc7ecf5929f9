//! Lifecycle transitions for a single container

use std::sync::Arc;
use vortex_core::{ContainerId, Error, Result, State};

use crate::registry::{ContainerRecord, ContainerRegistry};

impl ContainerRecord {
    /// Move `from -> to`, failing if the container is elsewhere or the edge is illegal
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`]; the record is left untouched
    pub fn transition(&mut self, id: &ContainerId, from: State, to: State) -> Result<()> {
        if self.state != from || !from.can_transition_to(to) {
            return Err(Error::InvalidState {
                id: id.to_string(),
                from,
                to,
                actual: self.state,
            });
        }

        tracing::trace!(container_id = %id, %from, %to, "State transition");
        self.state = to;
        Ok(())
    }

    /// Record the exit that ends a stop and settle in `Stopped`
    ///
    /// Both the stop sequence and the supervisor observe the same exit; whoever
    /// takes the lock first does the bookkeeping and gets `Ok(true)`, the other
    /// finds the container already settled (or started again) and gets
    /// `Ok(false)`.
    pub(crate) fn finish_stop(&mut self, id: &ContainerId, exit_code: i32) -> Result<bool> {
        if self.state != State::Stopping {
            return Ok(false);
        }

        self.transition(id, State::Stopping, State::Stopped)?;
        self.last_exit_code = Some(exit_code);
        self.process = None;
        self.stop_requested = false;
        Ok(true)
    }
}

/// Registry-level view of container states
#[derive(Debug, Clone)]
pub struct ContainerStateMachine {
    registry: Arc<ContainerRegistry>,
}

impl ContainerStateMachine {
    /// Create a state machine over `registry`
    #[must_use]
    pub const fn new(registry: Arc<ContainerRegistry>) -> Self {
        Self { registry }
    }

    /// Current state of a container
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for an unknown ID
    pub async fn current_state(&self, id: &str) -> Result<State> {
        let entry = self.registry.get(id).await?;
        let state = entry.lock().await.state();
        Ok(state)
    }

    /// Transition a container under its lock
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for an unknown ID or
    /// [`Error::InvalidState`] if the container is not in `from`
    pub async fn transition(&self, id: &str, from: State, to: State) -> Result<()> {
        let entry = self.registry.get(id).await?;
        let mut record = entry.lock().await;
        record.transition(entry.id(), from, to)
    }
}
