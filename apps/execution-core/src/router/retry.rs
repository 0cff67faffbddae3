//! Exponential backoff for transient venue failures.
//!
//! Transport-class errors are retried with bounded exponential backoff
//! and jitter. Venue rejections and validation failures are permanent
//! and pass through on the first occurrence.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::venue::VenueError;

/// Backoff state for one logical operation.
#[derive(Debug)]
pub struct BackoffSchedule {
    current_attempt: u32,
    max_retries: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    backoff_multiplier: f64,
    jitter_factor: f64,
}

impl BackoffSchedule {
    /// Create a schedule from the retry configuration.
    ///
    /// `max_attempts` counts the initial try, so the schedule yields at
    /// most `max_attempts - 1` backoff delays.
    #[must_use]
    pub const fn new(config: &RetryConfig) -> Self {
        Self {
            current_attempt: 0,
            max_retries: config.max_attempts.saturating_sub(1),
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            backoff_multiplier: config.backoff_multiplier,
            jitter_factor: config.jitter_factor,
        }
    }

    /// Next delay to wait before retrying, or `None` when the attempt
    /// budget is spent.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.max_retries {
            return None;
        }
        let base_ms = self.base_backoff_ms();
        let jittered_ms = self.apply_jitter(base_ms).min(self.max_backoff_ms);
        self.current_attempt += 1;
        Some(Duration::from_millis(jittered_ms))
    }

    /// Retries consumed so far.
    #[must_use]
    pub const fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    fn base_backoff_ms(&self) -> u64 {
        let multiplier = self.backoff_multiplier.powi(self.current_attempt as i32);
        let backoff = (self.initial_backoff_ms as f64 * multiplier) as u64;
        backoff.min(self.max_backoff_ms)
    }

    /// Perturb the delay by up to `jitter_factor` in either direction.
    fn apply_jitter(&self, backoff_ms: u64) -> u64 {
        if self.jitter_factor <= 0.0 {
            return backoff_ms;
        }
        let mut rng = rand::rng();
        let range = backoff_ms as f64 * self.jitter_factor;
        let min = (backoff_ms as f64 - range).max(0.0);
        let max = backoff_ms as f64 + range;
        rng.random_range(min..=max) as u64
    }
}

/// Run a venue operation, retrying transient errors per the policy.
///
/// # Errors
///
/// Returns the last [`VenueError`] once retries are exhausted, or the
/// first non-retryable error immediately.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, VenueError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VenueError>>,
{
    let mut schedule = BackoffSchedule::new(config);
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() => match schedule.next_backoff() {
                Some(delay) => {
                    tracing::warn!(
                        operation = operation_name,
                        attempt = schedule.current_attempt(),
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient venue error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::error!(
                        operation = operation_name,
                        attempts = config.max_attempts,
                        error = %error,
                        "venue operation failed after retries"
                    );
                    return Err(error);
                }
            },
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn no_jitter_config() -> RetryConfig {
        RetryConfig {
            jitter_factor: 0.0,
            ..RetryConfig::default()
        }
    }

    #[test]
    fn backoff_sequence_doubles_without_jitter() {
        let mut schedule = BackoffSchedule::new(&no_jitter_config());
        // max_attempts 5 = initial try + 4 retries: 100, 200, 400, 800.
        assert_eq!(schedule.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(schedule.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(schedule.next_backoff(), Some(Duration::from_millis(400)));
        assert_eq!(schedule.next_backoff(), Some(Duration::from_millis(800)));
        assert!(schedule.next_backoff().is_none());
    }

    #[test]
    fn backoff_respects_ceiling() {
        let config = RetryConfig {
            max_attempts: 20,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 5_000,
            backoff_multiplier: 10.0,
            jitter_factor: 0.0,
        };
        let mut schedule = BackoffSchedule::new(&config);
        assert_eq!(schedule.next_backoff(), Some(Duration::from_secs(1)));
        assert_eq!(schedule.next_backoff(), Some(Duration::from_secs(5)));
        assert_eq!(schedule.next_backoff(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn jitter_stays_within_band() {
        let config = RetryConfig {
            jitter_factor: 0.2,
            ..RetryConfig::default()
        };
        for _ in 0..100 {
            let mut schedule = BackoffSchedule::new(&config);
            let delay = schedule.next_backoff().unwrap();
            assert!(
                delay >= Duration::from_millis(80) && delay <= Duration::from_millis(120),
                "delay {delay:?} outside 80-120ms"
            );
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let config = RetryConfig {
            initial_backoff_ms: 1,
            jitter_factor: 0.0,
            ..RetryConfig::default()
        };
        let calls = AtomicU32::new(0);
        let result = with_retry(&config, "submit", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(VenueError::Transport("connection reset".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejections_are_never_retried() {
        let config = no_jitter_config();
        let calls = AtomicU32::new(0);
        let result: Result<(), VenueError> = with_retry(&config, "submit", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(VenueError::InvalidRequest("bad quantity".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(VenueError::InvalidRequest(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_exhaust_with_last_error() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            jitter_factor: 0.0,
            ..RetryConfig::default()
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), VenueError> = with_retry(&config, "submit", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(VenueError::Transport("timeout".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(VenueError::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
