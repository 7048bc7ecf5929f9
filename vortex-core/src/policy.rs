//! Restart policies attached to a container at creation time

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// What the supervisor does when a container's process exits on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Never restart
    #[default]
    No,
    /// Restart after every exit
    Always,
    /// Like `Always`; an explicit stop is what keeps it down
    UnlessStopped,
    /// Restart only after a non-zero exit, at most `max_retries` times (`0` = unlimited)
    OnFailure {
        /// Retry limit
        #[serde(default)]
        max_retries: u32,
    },
}

impl RestartPolicy {
    /// Decide whether an exit with `exit_code` after `restart_count` relaunches
    /// should trigger another relaunch
    #[must_use]
    pub const fn should_restart(self, exit_code: i32, restart_count: u32) -> bool {
        match self {
            Self::No => false,
            Self::Always | Self::UnlessStopped => true,
            Self::OnFailure { max_retries } => {
                exit_code != 0 && (max_retries == 0 || restart_count < max_retries)
            }
        }
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::No => f.write_str("no"),
            Self::Always => f.write_str("always"),
            Self::UnlessStopped => f.write_str("unless-stopped"),
            Self::OnFailure { max_retries: 0 } => f.write_str("on-failure"),
            Self::OnFailure { max_retries } => write!(f, "on-failure:{max_retries}"),
        }
    }
}

impl FromStr for RestartPolicy {
    type Err = Error;

    /// Parses `no`, `always`, `unless-stopped`, `on-failure` and `on-failure:N`
    fn from_str(s: &str) -> Result<Self> {
        let (name, retries) = match s.split_once(':') {
            Some((name, retries)) => (name, Some(retries)),
            None => (s, None),
        };

        match (name, retries) {
            ("" | "no", None) => Ok(Self::No),
            ("always", None) => Ok(Self::Always),
            ("unless-stopped", None) => Ok(Self::UnlessStopped),
            ("on-failure", None) => Ok(Self::OnFailure { max_retries: 0 }),
            ("on-failure", Some(n)) => n
                .parse::<u32>()
                .map(|max_retries| Self::OnFailure { max_retries })
                .map_err(|e| Error::parse("restart policy", s, e)),
            _ => Err(Error::parse("restart policy", s, "unknown restart policy")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_policy_names() {
        assert_eq!("always".parse::<RestartPolicy>().unwrap(), RestartPolicy::Always);
        assert_eq!("no".parse::<RestartPolicy>().unwrap(), RestartPolicy::No);
        assert_eq!(
            "on-failure:3".parse::<RestartPolicy>().unwrap(),
            RestartPolicy::OnFailure { max_retries: 3 }
        );
        assert!("on-failure:x".parse::<RestartPolicy>().is_err());
        assert!("always:2".parse::<RestartPolicy>().is_err());
        assert!("sometimes".parse::<RestartPolicy>().is_err());
    }

    #[test]
    fn test_on_failure_respects_limit() {
        let policy = RestartPolicy::OnFailure { max_retries: 2 };
        assert!(policy.should_restart(1, 0));
        assert!(policy.should_restart(1, 1));
        assert!(!policy.should_restart(1, 2));
        assert!(!policy.should_restart(0, 0));
    }

    #[test]
    fn test_always_ignores_exit_code() {
        assert!(RestartPolicy::Always.should_restart(0, 100));
        assert!(RestartPolicy::UnlessStopped.should_restart(1, 0));
        assert!(!RestartPolicy::No.should_restart(1, 0));
    }

    #[test]
    fn test_display_matches_parse() {
        for raw in ["no", "always", "unless-stopped", "on-failure", "on-failure:5"] {
            assert_eq!(raw.parse::<RestartPolicy>().unwrap().to_string(), raw);
        }
    }
}
