/// Resilience primitives shared by the gateway and the data processor
///
/// - **Retry**: bounded attempts with fixed or exponential backoff and
///   a predicate deciding which failures are transient
/// - **Timeout**: deadlines and timeout wrappers for async operations
/// - **Presets**: tuned settings for Kafka publishing, Redis and storage
///
/// # Example: Kafka publish with fixed backoff
///
/// ```rust,no_run
/// use resilience::{presets, with_retry_if};
///
/// #[tokio::main]
/// async fn main() {
///     let Some(retry) = presets::kafka_publish_config().retry else {
///         return;
///     };
///
///     let result = with_retry_if(
///         retry,
///         || async { Err::<(), _>("timed out") },
///         |e| *e == "timed out",
///     )
///     .await;
///     assert!(result.is_err());
/// }
/// ```
pub mod presets;
pub mod retry;
pub mod timeout;

pub use presets::{
    database_config, kafka_publish_config, kafka_receive_backoff, redis_config, ServiceConfig,
};
pub use retry::{with_retry_if, BackoffStrategy, RetryConfig, RetryError};
pub use timeout::{with_timeout_result, Deadline, TimeoutError};
