//! Retry delays for the accept loop.

use std::time::Duration;

/// Exponential back-off applied when `accept()` fails.
///
/// The first retry waits `initial_delay`; each further consecutive failure
/// doubles the delay up to `max_delay`. A successful accept resets it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl BackoffConfig {
    /// Raise both delays to at least one millisecond and order them.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use redis_proxy::server::BackoffConfig;
    ///
    /// let backoff = BackoffConfig {
    ///     initial_delay: Duration::ZERO,
    ///     max_delay: Duration::from_millis(50),
    /// }
    /// .normalized();
    /// assert_eq!(backoff.initial_delay, Duration::from_millis(1));
    /// ```
    #[must_use]
    pub fn normalized(self) -> Self {
        let floor = Duration::from_millis(1);
        let a = self.initial_delay.max(floor);
        let b = self.max_delay.max(floor);
        Self {
            initial_delay: a.min(b),
            max_delay: a.max(b),
        }
    }

    /// Delay to use after another failure following `current`.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration { (current * 2).min(self.max_delay) }
}
