//! Vortex Core - lifecycle vocabulary shared by the runtime crates
//!
//! Container IDs, lifecycle states, logical stop signals, restart policies,
//! lifecycle events and the common error type.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod events;
pub mod policy;
pub mod signal;
pub mod state;
pub mod types;

pub use error::{Error, Result};
pub use events::ContainerEvent;
pub use policy::RestartPolicy;
pub use signal::{StopSignal, StopTimeout};
pub use state::State;
pub use types::{ContainerId, ProcessId};
