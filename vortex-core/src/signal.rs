//! Logical stop signals and stop timeouts
//!
//! The core only speaks in logical signals. Mapping them to a platform signal
//! number, and a platform death to an exit code, is the execution
//! environment's job.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

/// A signal that can be used to stop a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum StopSignal {
    /// Graceful terminate request (default stop signal)
    #[default]
    Term,
    /// Interactive interrupt
    Int,
    /// Quit with core dump
    Quit,
    /// Hang-up
    Hup,
    /// Unconditional kill, used for escalation
    Kill,
}

impl StopSignal {
    /// The signal sent when the grace period runs out
    pub const FORCEFUL: Self = Self::Kill;

    /// Canonical `SIG*` name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Term => "SIGTERM",
            Self::Int => "SIGINT",
            Self::Quit => "SIGQUIT",
            Self::Hup => "SIGHUP",
            Self::Kill => "SIGKILL",
        }
    }

    /// Whether the process cannot ignore this signal
    #[must_use]
    pub const fn is_forceful(self) -> bool {
        matches!(self, Self::Kill)
    }

    /// Parse an optional caller-supplied signal name, defaulting to [`StopSignal::Term`]
    ///
    /// # Errors
    /// Returns [`Error::Parse`] naming the literal when it is not a known signal
    pub fn parse_or_default(raw: Option<&str>) -> Result<Self> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Self::default()),
            Some(raw) => raw.parse(),
        }
    }
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StopSignal {
    type Err = Error;

    /// Accepts `SIGTERM`, `TERM` and `term` spellings
    fn from_str(s: &str) -> Result<Self> {
        let upper = s.to_ascii_uppercase();
        let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
        match bare {
            "TERM" => Ok(Self::Term),
            "INT" => Ok(Self::Int),
            "QUIT" => Ok(Self::Quit),
            "HUP" => Ok(Self::Hup),
            "KILL" => Ok(Self::Kill),
            _ => Err(Error::parse("signal", s, "unknown stop signal")),
        }
    }
}

/// How long to wait after the stop signal before escalating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTimeout {
    /// Escalate to the forceful kill straight away
    Immediate,
    /// Wait up to this long, then escalate
    Grace(Duration),
    /// Wait for as long as it takes, never escalate
    Unlimited,
}

impl StopTimeout {
    /// Interpret a timeout in whole seconds: `0` immediate, negative unlimited
    #[must_use]
    pub fn from_secs(secs: i64) -> Self {
        match secs {
            0 => Self::Immediate,
            s if s < 0 => Self::Unlimited,
            s => Self::Grace(Duration::from_secs(s.unsigned_abs())),
        }
    }

    /// Parse a caller-supplied timeout literal
    ///
    /// # Errors
    /// Returns [`Error::Parse`] carrying the literal and the integer parser's
    /// message when `raw` is not an integer
    pub fn parse(raw: &str) -> Result<Self> {
        raw.parse::<i64>()
            .map(Self::from_secs)
            .map_err(|e| Error::parse("timeout", raw, e))
    }

    /// The grace period, if escalation will ever happen after a wait
    #[must_use]
    pub const fn grace(self) -> Option<Duration> {
        match self {
            Self::Immediate => Some(Duration::ZERO),
            Self::Grace(d) => Some(d),
            Self::Unlimited => None,
        }
    }
}

impl fmt::Display for StopTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => f.write_str("0s"),
            Self::Grace(d) => write!(f, "{}s", d.as_secs()),
            Self::Unlimited => f.write_str("unlimited"),
        }
    }
}
