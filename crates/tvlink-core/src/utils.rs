/*!
 * Utility functions and helpers for tvlink.
 */
use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::Error;

/// Run a future with a timeout
///
/// # Arguments
///
/// * `duration` - The timeout duration
/// * `future` - The future to run
///
/// # Returns
///
/// The result of the future, or a timeout error converted into `E` if the
/// timeout is reached.
pub async fn with_timeout<F, T, E>(duration: Duration, future: F) -> std::result::Result<T, E>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: From<Error>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(format!(
            "Operation timed out after {:?}",
            duration
        ))
        .into()),
    }
}

/// Bounded exponential backoff schedule
///
/// Yields `base, 2*base, 4*base, ...` capped at `max`, for `attempts` items.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempts: u32,
    attempt: u32,
}

impl Backoff {
    /// Create a new schedule
    pub fn new(base: Duration, max: Duration, attempts: u32) -> Self {
        Self {
            base,
            max: max.max(base),
            attempts,
            attempt: 0,
        }
    }

    /// Delay before the given zero-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Number of attempts already handed out
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.attempt >= self.attempts {
            return None;
        }
        let delay = self.delay_for(self.attempt);
        self.attempt += 1;
        Some(delay)
    }
}

/// Spawn a task that logs its outcome
///
/// # Arguments
///
/// * `name` - A name for the task (for logging)
/// * `fut` - The future to run
pub fn spawn_and_log<F, T, E>(name: &str, fut: F) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let task_name = name.to_string();
    tokio::spawn(async move {
        match fut.await {
            Ok(_) => {
                debug!("Task '{}' completed successfully", task_name);
            }
            Err(e) => {
                warn!("Task '{}' failed: {}", task_name, e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, Error>(42)
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let delays: Vec<_> =
            Backoff::new(Duration::from_millis(200), Duration::from_millis(1000), 5).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_millis(1000),
                Duration::from_millis(1000),
            ]
        );
    }

    #[test]
    fn test_backoff_zero_attempts() {
        let mut backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(1), 0);
        assert_eq!(backoff.next(), None);
        assert_eq!(backoff.attempt(), 0);
    }

    #[test]
    fn test_backoff_large_attempt_saturates() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 100);
        assert_eq!(backoff.delay_for(64), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_spawn_and_log() {
        let handle = spawn_and_log("ok", async { Ok::<_, Error>(()) });
        handle.await.unwrap();
        let handle = spawn_and_log("fails", async { Err::<(), _>(Error::other("boom")) });
        handle.await.unwrap();
    }
}
