//! Fan-out of lifecycle events to tracing and an optional channel

use tokio::sync::mpsc;
use vortex_core::ContainerEvent;

/// Where lifecycle events go
///
/// Every event is traced; if a channel is attached it also receives a copy.
/// A full or closed channel never blocks the lifecycle.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<ContainerEvent>>,
}

impl EventSink {
    /// Sink that also forwards to `tx`
    #[must_use]
    pub const fn new(tx: mpsc::Sender<ContainerEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Trace-only sink
    #[must_use]
    pub const fn tracing_only() -> Self {
        Self { tx: None }
    }

    /// Emit one event
    pub fn emit(&self, event: ContainerEvent) {
        event.emit_trace();

        if let Some(tx) = &self.tx
            && let Err(e) = tx.try_send(event)
        {
            tracing::trace!(error = %e, "Lifecycle event dropped");
        }
    }
}
