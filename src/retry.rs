//! Bounded retry for opening model streams
//!
//! Adapters retry only connection-class failures. The default policy is ten
//! attempts with a fixed three second pause between them; the backoff
//! multiplier and jitter knobs are kept so callers can opt into exponential
//! behaviour.
//!
//! # Examples
//!
//! ```rust,no_run
//! use agent_runtime::retry::{retry_with_backoff_conditional, RetryConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RetryConfig::default()
//!     .with_max_attempts(3)
//!     .with_initial_delay(Duration::from_millis(200));
//!
//! let result = retry_with_backoff_conditional(config, || async {
//!     Ok::<_, agent_runtime::Error>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Attempts made before a connection failure becomes fatal
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Pause between attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Multiplier applied per attempt (1.0 keeps the delay fixed)
    pub backoff_multiplier: f64,

    /// Random jitter as a fraction of the delay (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_RETRY_DELAY,
            max_delay: DEFAULT_RETRY_DELAY,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum number of attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set initial delay. The cap is raised along with it when needed.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        if self.max_delay < delay {
            self.max_delay = delay;
        }
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Set jitter factor (0.0 to 1.0)
    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay_ms = self.initial_delay.as_millis() as f64;
        let scaled = base_delay_ms * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = scaled.min(self.max_delay.as_millis() as f64);

        if self.jitter_factor == 0.0 {
            return Duration::from_millis(capped_delay as u64);
        }

        let jitter_range = capped_delay * self.jitter_factor;
        let jitter = rand::random::<f64>() * jitter_range;
        let final_delay = capped_delay + jitter - (jitter_range / 2.0);

        Duration::from_millis(final_delay.max(0.0) as u64)
    }
}

/// Determine if an error is retryable
///
/// Only connection-class failures qualify. Vendor errors, malformed payloads
/// and cancellation fail on the first attempt.
pub fn is_retryable_error(error: &Error) -> bool {
    error.is_connection()
}

/// Retry an async operation, only retrying connection-class errors
///
/// This is what adapters use to open a vendor stream:
///
/// ```rust,no_run
/// use agent_runtime::retry::{retry_with_backoff_conditional, RetryConfig};
///
/// # async fn example(client: reqwest::Client) -> agent_runtime::Result<()> {
/// let response = retry_with_backoff_conditional(RetryConfig::default(), || {
///     let request = client.get("http://localhost:8080/health");
///     async move { request.send().await.map_err(agent_runtime::Error::from_send) }
/// })
/// .await?;
/// # let _ = response;
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff_conditional<F, Fut, T>(
    config: RetryConfig,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !is_retryable_error(&err) {
                    return Err(err);
                }

                log::debug!(
                    "attempt {}/{} failed: {}",
                    attempt + 1,
                    config.max_attempts,
                    err
                );
                last_error = Some(err);

                if attempt + 1 < config.max_attempts {
                    sleep(config.calculate_delay(attempt)).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::other("Retry failed with no error")))
}
