//! Lifecycle tuning configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning knobs for service startup, readiness probing, and teardown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Total time allowed for a starting service to become ready.
    pub readiness_timeout: Duration,
    /// Initial delay between readiness probe attempts.
    pub probe_initial_delay: Duration,
    /// Ceiling for the probe backoff delay.
    pub probe_max_delay: Duration,
    /// Multiplier applied to the probe delay after each failed attempt.
    pub probe_backoff_multiplier: f64,
    /// How long a zero-reference service lingers before teardown commits.
    pub stop_grace_period: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            readiness_timeout: crate::constants::DEFAULT_READINESS_TIMEOUT,
            probe_initial_delay: crate::constants::DEFAULT_PROBE_INITIAL_DELAY,
            probe_max_delay: crate::constants::DEFAULT_PROBE_MAX_DELAY,
            probe_backoff_multiplier: crate::constants::DEFAULT_PROBE_BACKOFF_MULTIPLIER,
            stop_grace_period: crate::constants::DEFAULT_STOP_GRACE_PERIOD,
        }
    }
}
