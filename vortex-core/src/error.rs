//! Error types for Vortex

use std::sync::Arc;
use thiserror::Error;

use crate::State;

/// Vortex error types
///
/// Cloneable so that one stop outcome can be handed to every caller that
/// joined the same termination sequence.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// No container is registered under this id
    #[error("No such container: {id}")]
    NotFound {
        /// The id that failed to resolve
        id: String,
    },

    /// A caller-supplied value could not be parsed
    #[error("invalid {field}: parsing {literal:?}: {reason}")]
    Parse {
        /// Which argument was malformed (`timeout`, `signal`, ...)
        field: &'static str,
        /// The offending literal, verbatim
        literal: String,
        /// Parser message
        reason: String,
    },

    /// Illegal lifecycle transition
    #[error("container {id}: cannot transition {from} -> {to} while {actual}")]
    InvalidState {
        /// Container ID
        id: String,
        /// Expected current state
        from: State,
        /// Requested target state
        to: State,
        /// State the container was actually in
        actual: State,
    },

    /// The execution environment failed to deliver a signal
    #[error("cannot deliver {signal} to container {id}: {message}")]
    SignalDelivery {
        /// Container ID
        id: String,
        /// Logical signal name
        signal: String,
        /// Error message from the environment
        message: String,
    },

    /// The exit notification went away without reporting an exit code
    #[error("exit of container {id} could not be observed")]
    ExitUnobserved {
        /// Container ID
        id: String,
    },

    /// Launching or relaunching the container process failed
    #[error("cannot launch container {id}: {message}")]
    Launch {
        /// Container ID
        id: String,
        /// Error message
        message: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl Error {
    /// Build a [`Error::Parse`] from any parser error
    pub fn parse(field: &'static str, literal: &str, reason: impl std::fmt::Display) -> Self {
        Self::Parse {
            field,
            literal: literal.to_string(),
            reason: reason.to_string(),
        }
    }

    /// `true` for [`Error::NotFound`]
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// Result type alias for Vortex operations
pub type Result<T> = std::result::Result<T, Error>;
