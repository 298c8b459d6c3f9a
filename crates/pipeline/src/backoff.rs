//! Exponential backoff for the long-running consumer loops.
//!
//! When a channel pull fails the loop waits before trying again, doubling
//! the delay up to a ceiling, and resets once a pull succeeds.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub struct ReconnectConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Wait between polls when the channel is empty.
    pub idle_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            idle_delay: Duration::from_secs(1),
        }
    }
}

/// Calculate the next backoff delay, clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Sleep for `delay` unless cancelled first. Returns `false` on cancel.
pub async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Near-zero delays for exercising the loops in tests.
#[cfg(test)]
pub(crate) fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        multiplier: 2.0,
        idle_delay: Duration::from_millis(1),
    }
}
