//! Cooperative wait for a process exit, optionally bounded by a deadline

use std::sync::Arc;
use tokio::time::Instant;
use vortex_core::{ContainerId, Error, Result};

use crate::environment::{ExecutionEnvironment, ProcessHandle};

/// Outcome of [`ExitWaiter::wait_for_exit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The process exited with this code
    Exited(i32),
    /// The deadline passed first
    TimedOut,
}

/// Suspends the calling task until a process exits or a deadline passes
///
/// The deadline timer lives inside the wait future, so it is released the
/// moment the exit is observed or the caller drops the wait.
#[derive(Clone)]
pub struct ExitWaiter {
    env: Arc<dyn ExecutionEnvironment>,
}

impl ExitWaiter {
    /// Create a waiter over `env`
    #[must_use]
    pub fn new(env: Arc<dyn ExecutionEnvironment>) -> Self {
        Self { env }
    }

    /// Wait for `process` to exit, giving up at `deadline` (`None` waits forever)
    ///
    /// # Errors
    /// Returns the environment's error if the subscription fails, or
    /// [`Error::ExitUnobserved`] if the environment stops reporting before an exit
    pub async fn wait_for_exit(
        &self,
        id: &ContainerId,
        process: &ProcessHandle,
        deadline: Option<Instant>,
    ) -> Result<WaitOutcome> {
        let mut exit = self.env.subscribe_exit(process).await?;

        let code = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, exit.exited()).await {
                Ok(code) => code,
                Err(_) => {
                    tracing::debug!(container_id = %id, "Exit wait timed out");
                    return Ok(WaitOutcome::TimedOut);
                }
            },
            None => exit.exited().await,
        };

        code.map(WaitOutcome::Exited)
            .ok_or_else(|| Error::ExitUnobserved { id: id.to_string() })
    }

    /// Wait for `process` to exit with no deadline
    ///
    /// # Errors
    /// Same as [`ExitWaiter::wait_for_exit`]
    pub async fn wait(&self, id: &ContainerId, process: &ProcessHandle) -> Result<i32> {
        match self.wait_for_exit(id, process, None).await? {
            WaitOutcome::Exited(code) => Ok(code),
            WaitOutcome::TimedOut => Err(Error::ExitUnobserved { id: id.to_string() }),
        }
    }
}

impl std::fmt::Debug for ExitWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitWaiter").finish_non_exhaustive()
    }
}
