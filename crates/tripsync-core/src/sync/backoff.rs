//! Exponential backoff between retries.

use std::time::Duration;

/// Double `current`, clamped to `max`.
pub fn next_delay(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}
