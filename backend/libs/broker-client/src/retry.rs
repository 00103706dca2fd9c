use resilience::{with_retry_if, RetryConfig, RetryError};
use tracing::warn;

use crate::{BrokerError, Delivery, Headers, Publisher};

/// Publish, retrying only `BrokerError::Timeout` within `retry`'s attempt budget.
///
/// Exhausting the budget yields `BrokerError::Unavailable`; any other
/// failure is returned as soon as it happens.
pub async fn publish_with_retry(
    publisher: &dyn Publisher,
    retry: &RetryConfig,
    topic: &str,
    key: &str,
    payload: &[u8],
    headers: &Headers,
) -> Result<Delivery, BrokerError> {
    with_retry_if(
        retry.clone(),
        || publisher.publish(topic, key, payload, headers),
        BrokerError::is_timeout,
    )
    .await
    .map_err(|err| match err {
        RetryError::Exhausted {
            attempts,
            last_error,
        } => {
            warn!(topic = %topic, attempts, error = %last_error, "Publish retries exhausted");
            BrokerError::Unavailable(format!(
                "publish to {topic} failed after {attempts} attempts: {last_error}"
            ))
        }
        RetryError::Aborted(err) => err,
    })
}
