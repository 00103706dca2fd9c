/// Deadlines and timeout wrappers for async operations
use std::future::Future;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

#[derive(Debug, thiserror::Error)]
pub enum TimeoutError<E = std::convert::Infallible> {
    #[error("operation timed out after {0:?}")]
    Elapsed(Duration),
    #[error("operation failed: {0}")]
    Failed(E),
}

/// A fixed point in time after which an operation is abandoned
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Run `future` until it completes or the deadline passes
    pub async fn run<F, T>(&self, future: F) -> Result<T, TimeoutError>
    where
        F: Future<Output = T>,
    {
        timeout_at(self.at, future)
            .await
            .map_err(|_| TimeoutError::Elapsed(self.budget))
    }
}

/// Execute a fallible future with timeout, keeping the inner error
pub async fn with_timeout_result<F, T, E>(
    duration: Duration,
    future: F,
) -> Result<T, TimeoutError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match Deadline::after(duration).run(future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TimeoutError::Failed(e)),
        Err(_) => Err(TimeoutError::Elapsed(duration)),
    }
}
