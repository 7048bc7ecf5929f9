//! Runtime configuration for stop and restart behavior

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use vortex_core::{Error, Result, StopTimeout};

/// Exponential backoff between supervisor relaunches
///
/// The delay for relaunch attempt `n` (0-based) is `first × factor^n`, capped
/// at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first relaunch, in milliseconds
    pub first_ms: u64,
    /// Upper bound on any delay, in milliseconds
    pub max_ms: u64,
    /// Growth factor per attempt
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            first_ms: 100,
            max_ms: 60_000,
            factor: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Delay before relaunch attempt `attempt`
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = self.first_ms as f64 * self.factor.powi(exp);

        if !millis.is_finite() || millis < 0.0 || millis >= self.max_ms as f64 {
            return Duration::from_millis(self.max_ms);
        }
        Duration::from_millis(millis as u64)
    }
}

/// Lifecycle configuration
///
/// # Example
/// ```
/// use vortex_lifecycle::LifecycleConfig;
///
/// let config = LifecycleConfig::from_json(r#"{ "default_stop_timeout_secs": 30 }"#).unwrap();
/// assert_eq!(config.default_stop_timeout_secs, 30);
/// assert_eq!(config.restart_backoff.first_ms, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Stop timeout used when neither the request nor the container sets one
    pub default_stop_timeout_secs: i64,
    /// Relaunch backoff
    pub restart_backoff: BackoffConfig,
    /// Capacity hint for lifecycle event channels
    pub event_buffer: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            default_stop_timeout_secs: 10,
            restart_backoff: BackoffConfig::default(),
            event_buffer: 64,
        }
    }
}

impl LifecycleConfig {
    /// Parse and validate a JSON document; missing fields take defaults
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] on malformed JSON or invalid values
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::InvalidConfig {
            message: format!("cannot parse lifecycle config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the file cannot be read, or
    /// [`Error::InvalidConfig`] if its contents are invalid
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&raw)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] describing the first bad field
    pub fn validate(&self) -> Result<()> {
        if !(self.restart_backoff.factor.is_finite() && self.restart_backoff.factor >= 1.0) {
            return Err(Error::InvalidConfig {
                message: format!(
                    "restart_backoff.factor must be >= 1.0, got {}",
                    self.restart_backoff.factor
                ),
            });
        }
        if self.restart_backoff.first_ms > self.restart_backoff.max_ms {
            return Err(Error::InvalidConfig {
                message: "restart_backoff.first_ms exceeds max_ms".to_string(),
            });
        }
        if self.event_buffer == 0 {
            return Err(Error::InvalidConfig {
                message: "event_buffer must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Default stop timeout as a [`StopTimeout`]
    #[must_use]
    pub fn default_stop_timeout(&self) -> StopTimeout {
        StopTimeout::from_secs(self.default_stop_timeout_secs)
    }
}
