//! Signal dispatch to a container's process

use std::sync::Arc;
use vortex_core::{ContainerId, Result, StopSignal};

use crate::environment::{ExecutionEnvironment, ProcessHandle};

/// Stateless translator from logical stop signals to the execution environment
#[derive(Clone)]
pub struct SignalDispatcher {
    env: Arc<dyn ExecutionEnvironment>,
}

impl SignalDispatcher {
    /// Create a dispatcher over `env`
    #[must_use]
    pub fn new(env: Arc<dyn ExecutionEnvironment>) -> Self {
        Self { env }
    }

    /// Send `signal` to the container's process
    ///
    /// # Errors
    /// Whatever the environment returns, unchanged; no retry is attempted
    pub async fn send(
        &self,
        id: &ContainerId,
        process: &ProcessHandle,
        signal: StopSignal,
    ) -> Result<()> {
        tracing::debug!(
            container_id = %id,
            pid = process.pid().as_raw(),
            signal = %signal,
            "Sending signal"
        );

        self.env
            .send_signal(process, signal)
            .await
            .inspect_err(|e| {
                tracing::warn!(container_id = %id, signal = %signal, error = %e, "Signal delivery failed");
            })
    }
}

impl std::fmt::Debug for SignalDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalDispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Launcher;
    use crate::mock::{MockEnvironment, ProcessScript};
    use vortex_core::Error;

    #[tokio::test]
    async fn test_delivers_and_logs() {
        let env = Arc::new(MockEnvironment::new());
        let id = ContainerId::new("sig").unwrap();
        env.set_script(&id, ProcessScript::forever()).await;
        let process = env.launch(&id).await.unwrap();

        let dispatcher = SignalDispatcher::new(env.clone());
        dispatcher.send(&id, &process, StopSignal::Hup).await.unwrap();

        assert_eq!(env.signals_sent(&id).await, vec![StopSignal::Hup]);
    }

    #[tokio::test]
    async fn test_failure_passes_through() {
        let env = Arc::new(MockEnvironment::new());
        let id = ContainerId::new("sig").unwrap();
        let process = env.launch(&id).await.unwrap();
        env.fail_signals(&id, true).await;

        let dispatcher = SignalDispatcher::new(env.clone());
        let err = dispatcher
            .send(&id, &process, StopSignal::Term)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SignalDelivery { .. }));
        assert!(env.signals_sent(&id).await.is_empty());
    }
}
