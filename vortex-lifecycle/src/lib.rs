//! Container stop orchestration and restart supervision
//!
//! A stop request sends the container's graceful signal, waits out a grace
//! period and escalates to `SIGKILL` if the process is still alive. Stop
//! requests for the same container coalesce onto one termination sequence,
//! and a stop always wins over the restart supervisor.
//!
//! Execution is abstracted behind [`ExecutionEnvironment`] and [`Launcher`],
//! with a host-process implementation ([`ProcessEnvironment`]) and a scripted
//! one for tests ([`MockEnvironment`]).

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod environment;
pub mod events;
pub mod mock;
pub mod process;
pub mod registry;
pub mod runtime;
pub mod state_machine;
pub mod supervisor;
pub mod waiter;

pub use config::{BackoffConfig, LifecycleConfig};
pub use controller::{StopController, StopStatus};
pub use dispatcher::SignalDispatcher;
pub use environment::{
    ExecutionEnvironment, ExitNotifier, ExitSubscription, Launcher, ProcessHandle,
};
pub use events::EventSink;
pub use mock::{MockEnvironment, OnTerminate, ProcessScript};
pub use process::ProcessEnvironment;
pub use registry::{ContainerEntry, ContainerRecord, ContainerRegistry, ContainerSpec};
pub use runtime::{ContainerRuntime, Inspection};
pub use state_machine::ContainerStateMachine;
pub use supervisor::RestartSupervisor;
pub use waiter::{ExitWaiter, WaitOutcome};

// Re-export commonly used types
pub use vortex_core::{ContainerEvent, RestartPolicy, State, StopSignal, StopTimeout};
