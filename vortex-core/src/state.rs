//! Container lifecycle states and the legal edges between them
//!
//! ```text
//! Created ──launch──▶ Running ──stop──▶ Stopping ──exit──▶ Stopped
//!                      │   ▲                                 ▲  ▲
//!                 exit │   │ relaunch            exit, no    │  │
//!                      ▼   │                     restart ────┘  │
//!                     Restarting ──stop / relaunch failed───────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Lifecycle state of one container instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    /// Registered, never launched
    Created,
    /// Main process is alive
    Running,
    /// Main process exited; the supervisor is about to relaunch it
    Restarting,
    /// A stop sequence is in flight
    Stopping,
    /// Main process exited and nothing will relaunch it
    Stopped,
}

impl State {
    /// Whether `self -> target` is a legal edge
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        use State::{Created, Restarting, Running, Stopped, Stopping};
        matches!(
            (self, target),
            (Created | Stopped, Running)
                | (Running, Stopping | Restarting | Stopped)
                | (Restarting, Running | Stopped)
                | (Stopping, Stopped)
        )
    }

    /// Lowercase name, as shown by `inspect`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "restarting" => Ok(Self::Restarting),
            "stopping" => Ok(Self::Stopping),
            "stopped" | "exited" => Ok(Self::Stopped),
            other => Err(Error::parse("state", other, "unknown container state")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_edges() {
        assert!(State::Created.can_transition_to(State::Running));
        assert!(State::Running.can_transition_to(State::Stopping));
        assert!(State::Stopping.can_transition_to(State::Stopped));
        assert!(State::Running.can_transition_to(State::Restarting));
        assert!(State::Restarting.can_transition_to(State::Running));
        assert!(State::Restarting.can_transition_to(State::Stopped));
    }

    #[test]
    fn test_illegal_edges() {
        assert!(!State::Stopping.can_transition_to(State::Running));
        assert!(!State::Stopping.can_transition_to(State::Restarting));
        assert!(!State::Stopped.can_transition_to(State::Stopping));
        assert!(!State::Stopped.can_transition_to(State::Restarting));
        assert!(!State::Created.can_transition_to(State::Stopping));
        assert!(!State::Restarting.can_transition_to(State::Stopping));
    }

    #[test]
    fn test_round_trips_through_name() {
        for state in [
            State::Created,
            State::Running,
            State::Restarting,
            State::Stopping,
            State::Stopped,
        ] {
            assert_eq!(state.as_str().parse::<State>().unwrap(), state);
        }
        assert_eq!("exited".parse::<State>().unwrap(), State::Stopped);
        assert!("paused".parse::<State>().is_err());
    }
}
