//! Retry policy for QuickBooks data API requests.

use crate::config::NetworkSettings;
use crate::error::QboError;
use std::time::Duration;

/// Bounded retry policy used by `QuickBooksService`.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Upper bound on total attempts, including the initial request.
    pub max_attempts: u32,
    /// Base delay used for exponential backoff.
    pub initial_backoff: Duration,
    /// Maximum allowed delay between retry attempts.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&NetworkSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(network: &NetworkSettings) -> Self {
        Self {
            max_attempts: network.max_attempts.max(1),
            initial_backoff: Duration::from_millis(network.initial_backoff_ms),
            max_backoff: Duration::from_secs(8),
        }
    }

    /// Decide whether another retry attempt should be scheduled.
    pub(super) fn should_retry(&self, err: &QboError, attempt: u32) -> bool {
        if attempt.saturating_add(1) >= self.max_attempts {
            return false;
        }
        match err {
            QboError::Http(inner) => inner.is_timeout() || inner.is_connect(),
            QboError::Status { code, .. } => matches!(*code, 408 | 429 | 500..=599),
            _ => false,
        }
    }

    /// Compute retry delay, respecting `Retry-After` when present.
    pub(super) fn retry_delay_for(&self, attempt: u32, err: &QboError) -> Duration {
        if let Some(seconds) = err.retry_after_secs() {
            return Duration::from_secs(seconds.clamp(1, 300));
        }
        let pow = 2u32.saturating_pow(attempt);
        let millis = self
            .initial_backoff
            .as_millis()
            .saturating_mul(pow as u128)
            .min(self.max_backoff.as_millis());
        Duration::from_millis(millis as u64)
    }
}
