//! Fixed-interval polling with an overall deadline.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::ConfigError;

/// Polls a condition every `backoff` until it holds or `timeout` has passed.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use stratadb::RetryPolicy;
///
/// let policy = RetryPolicy {
///     backoff: Duration::from_millis(1),
///     timeout: Duration::from_millis(50),
/// };
/// let mut polls = 0;
/// let value = policy
///     .retry_until("counter", || {
///         polls += 1;
///         (polls == 3).then_some(polls)
///     })
///     .unwrap();
/// assert_eq!(value, 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Sleep between two polls.
    pub backoff: Duration,
    /// Total budget, measured from the first poll.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
        }
    }
}

/// The condition still did not hold when the budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryTimeout {
    pub waited: Duration,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff.is_zero() {
            return Err(ConfigError("retry backoff must be > 0".into()));
        }
        Ok(())
    }

    /// Calls `poll` until it returns `Some`, sleeping `backoff` in between.
    ///
    /// The last sleep is shortened so the total wait never overshoots
    /// `timeout`; one final poll happens at the deadline.
    pub fn retry_until<T>(
        &self,
        what: &str,
        mut poll: impl FnMut() -> Option<T>,
    ) -> Result<T, RetryTimeout> {
        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if let Some(value) = poll() {
                if attempts > 1 {
                    debug!(what, attempts, waited_ms = started.elapsed().as_millis() as u64, "retry succeeded");
                }
                return Ok(value);
            }
            let waited = started.elapsed();
            if waited >= self.timeout {
                warn!(what, attempts, waited_ms = waited.as_millis() as u64, "retry budget exhausted");
                return Err(RetryTimeout { waited, attempts });
            }
            thread::sleep(self.backoff.min(self.timeout - waited));
        }
    }
}
