/// Bounded retry with fixed or exponential backoff
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How the delay between attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Same delay before every retry
    Fixed,
    /// `initial_backoff * multiplier^(attempt - 1)`
    Exponential,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Multiplier used by `BackoffStrategy::Exponential`
    pub backoff_multiplier: f64,
    pub strategy: BackoffStrategy,
    /// Add random jitter to backoff (±30%)
    pub jitter: bool,
}

impl RetryConfig {
    /// Fixed delay between a bounded number of attempts, no jitter
    pub fn fixed(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff: backoff,
            max_backoff: backoff,
            backoff_multiplier: 1.0,
            strategy: BackoffStrategy::Fixed,
            jitter: false,
        }
    }

    /// Doubling delay from `initial` up to `max`, with jitter.
    /// The attempt budget is unbounded; callers decide when to stop.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts: u32::MAX,
            initial_backoff: initial,
            max_backoff: max,
            backoff_multiplier: 2.0,
            strategy: BackoffStrategy::Exponential,
            jitter: true,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_ms = self.initial_backoff.as_millis() as f64;
        let raw_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                base_ms * self.backoff_multiplier.powi(attempt as i32 - 1)
            }
        };
        let capped = Duration::from_millis(raw_ms.min(self.max_backoff.as_millis() as f64) as u64);

        if self.jitter {
            apply_jitter(capped)
        } else {
            capped
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },
    #[error("non-retryable failure: {0}")]
    Aborted(E),
}

/// Execute a future, retrying only failures accepted by `should_retry`.
///
/// A rejected failure is returned immediately as `RetryError::Aborted`.
pub async fn with_retry_if<F, Fut, T, E, P>(
    config: RetryConfig,
    mut f: F,
    should_retry: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !should_retry(&e) => return Err(RetryError::Aborted(e)),
            Err(e) => {
                if attempt >= max_attempts {
                    warn!(attempts = attempt, error = %e, "Retry budget exhausted");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }

                let delay = config.delay_for(attempt);
                warn!(
                    "Attempt {}/{} failed ({}), retrying in {:?}",
                    attempt, max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn apply_jitter(base: Duration) -> Duration {
    let jitter_factor = 1.0 + rand::thread_rng().gen_range(-0.3..0.3);
    Duration::from_millis((base.as_millis() as f64 * jitter_factor) as u64)
}
