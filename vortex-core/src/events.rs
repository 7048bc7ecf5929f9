//! Container lifecycle events with structured tracing

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};

use crate::{ContainerId, StopSignal};

/// Events emitted while containers are launched, stopped and restarted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContainerEvent {
    /// Container process launched (first start or relaunch)
    Started {
        /// Container ID
        id: ContainerId,
        /// Number of relaunches so far
        restart_count: u32,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// A stop signal was delivered
    Signaled {
        /// Container ID
        id: ContainerId,
        /// Signal that was sent
        signal: StopSignal,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// Grace period ran out, escalating to a forceful kill
    Escalated {
        /// Container ID
        id: ContainerId,
        /// Grace period that elapsed
        #[serde(with = "duration_serde")]
        grace: Duration,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// Supervisor scheduled a relaunch
    Restarting {
        /// Container ID
        id: ContainerId,
        /// Exit code of the run that ended
        exit_code: i32,
        /// Relaunch attempt number (1-based)
        attempt: u32,
        /// Backoff before the relaunch
        #[serde(with = "duration_serde")]
        delay: Duration,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// Container reached `Stopped`
    Stopped {
        /// Container ID
        id: ContainerId,
        /// Final exit code
        exit_code: i32,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// Error occurred
    Error {
        /// Container ID
        id: ContainerId,
        /// Error message
        message: String,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },
}

impl ContainerEvent {
    /// Get the container ID from any event
    #[must_use]
    pub const fn container_id(&self) -> &ContainerId {
        match self {
            Self::Started { id, .. }
            | Self::Signaled { id, .. }
            | Self::Escalated { id, .. }
            | Self::Restarting { id, .. }
            | Self::Stopped { id, .. }
            | Self::Error { id, .. } => id,
        }
    }

    /// Check if this is a critical event
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(self, Self::Escalated { .. } | Self::Error { .. })
    }

    /// Emit structured tracing event
    pub fn emit_trace(&self) {
        match self {
            Self::Started {
                id, restart_count, ..
            } => {
                tracing::info!(
                    container_id = %id,
                    restart_count,
                    event = "started",
                    "Container started"
                );
            }
            Self::Signaled { id, signal, .. } => {
                tracing::debug!(
                    container_id = %id,
                    signal = %signal,
                    event = "signaled",
                    "Stop signal delivered"
                );
            }
            Self::Escalated { id, grace, .. } => {
                tracing::warn!(
                    container_id = %id,
                    grace_secs = grace.as_secs(),
                    event = "escalated",
                    "Container did not exit within grace period, killing"
                );
            }
            Self::Restarting {
                id,
                exit_code,
                attempt,
                delay,
                ..
            } => {
                tracing::warn!(
                    container_id = %id,
                    exit_code,
                    attempt,
                    delay_ms = delay.as_millis(),
                    event = "restarting",
                    "Container exited, restarting"
                );
            }
            Self::Stopped { id, exit_code, .. } => {
                tracing::info!(
                    container_id = %id,
                    exit_code,
                    event = "stopped",
                    "Container stopped"
                );
            }
            Self::Error { id, message, .. } => {
                tracing::error!(
                    container_id = %id,
                    message = %message,
                    event = "error",
                    "Container error"
                );
            }
        }
    }
}

impl fmt::Display for ContainerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started { id, .. } => write!(f, "Container {id} started"),
            Self::Signaled { id, signal, .. } => write!(f, "Container {id} sent {signal}"),
            Self::Escalated { id, grace, .. } => {
                write!(f, "Container {id} escalated to SIGKILL after {grace:?}")
            }
            Self::Restarting { id, attempt, .. } => {
                write!(f, "Container {id} restarting (attempt {attempt})")
            }
            Self::Stopped { id, exit_code, .. } => {
                write!(f, "Container {id} stopped with code {exit_code}")
            }
            Self::Error { id, message, .. } => write!(f, "Container {id} error: {message}"),
        }
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod systemtime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let since_epoch = time
            .duration_since(UNIX_EPOCH)
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_u64(since_epoch.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + std::time::Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_container_id() {
        let id = ContainerId::new("test").unwrap();
        let event = ContainerEvent::Stopped {
            id: id.clone(),
            exit_code: 137,
            timestamp: SystemTime::now(),
        };

        assert_eq!(event.container_id(), &id);
        assert_eq!(event.to_string(), "Container test stopped with code 137");
    }

    #[test]
    fn test_event_critical() {
        let id = ContainerId::new("test").unwrap();

        let event = ContainerEvent::Escalated {
            id: id.clone(),
            grace: Duration::from_secs(2),
            timestamp: SystemTime::now(),
        };
        assert!(event.is_critical());

        let event = ContainerEvent::Signaled {
            id,
            signal: StopSignal::Term,
            timestamp: SystemTime::now(),
        };
        assert!(!event.is_critical());
    }

    #[test]
    fn test_event_serde_tag() {
        let event = ContainerEvent::Restarting {
            id: ContainerId::new("web").unwrap(),
            exit_code: 1,
            attempt: 2,
            delay: Duration::from_millis(200),
            timestamp: SystemTime::UNIX_EPOCH,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "restarting");
        assert_eq!(json["delay"], 200);

        let back: ContainerEvent = serde_json::from_value(json).unwrap();
        assert!(matches!(back, ContainerEvent::Restarting { attempt: 2, .. }));
    }
}
