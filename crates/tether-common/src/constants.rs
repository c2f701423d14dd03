//! System-wide constants and default tuning values.

use std::time::Duration;

/// Application name used in logs and diagnostics.
pub const APP_NAME: &str = "tether";

/// Default total time allowed for a starting service to become ready.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Default initial delay between readiness probe attempts.
pub const DEFAULT_PROBE_INITIAL_DELAY: Duration = Duration::from_millis(20);

/// Default ceiling for the probe backoff delay.
pub const DEFAULT_PROBE_MAX_DELAY: Duration = Duration::from_secs(1);

/// Default multiplier applied to the probe delay after each failed attempt.
pub const DEFAULT_PROBE_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default connect timeout for the built-in TCP readiness probe.
pub const DEFAULT_PROBE_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Default time a zero-reference service lingers before teardown commits.
///
/// Absorbs rapid release/re-acquire sequences between consecutive
/// dependent executions without a restart.
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_millis(250);

/// SHA-256 digest length in hex characters.
pub const SHA256_HEX_LENGTH: usize = 64;
