/// Preset configurations for the external systems the bridge talks to
use crate::retry::RetryConfig;
use std::time::Duration;

/// Configuration bundle for a dependency
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub timeout: Duration,
    pub retry: Option<RetryConfig>,
}

/// Kafka publish path
///
/// - 3 attempts, 4s apart: longer than the broker-side reconnect window
/// - per-send delivery timeout of 3s
pub fn kafka_publish_config() -> ServiceConfig {
    ServiceConfig {
        timeout: Duration::from_secs(3),
        retry: Some(RetryConfig::fixed(3, Duration::from_secs(4))),
    }
}

/// Pause between failed receives on a Kafka subscription
///
/// Starts at 500ms and doubles up to 30s while the broker stays unreachable.
pub fn kafka_receive_backoff() -> RetryConfig {
    RetryConfig::exponential(Duration::from_millis(500), Duration::from_secs(30))
}

/// Redis cache lookups
///
/// The cache is advisory, so a slow Redis is treated as a miss rather than retried.
pub fn redis_config() -> ServiceConfig {
    ServiceConfig {
        timeout: Duration::from_millis(500),
        retry: None,
    }
}

/// Storage operations in the data processor
///
/// Each query is bounded by `timeout`. No retry: a failed write is reported
/// back to the caller as an error payload.
pub fn database_config() -> ServiceConfig {
    ServiceConfig {
        timeout: Duration::from_secs(10),
        retry: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::BackoffStrategy;

    #[test]
    fn test_kafka_publish_preset() {
        let config = kafka_publish_config();
        let retry = config.retry.expect("kafka preset retries");
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.strategy, BackoffStrategy::Fixed);
        assert_eq!(retry.delay_for(1), Duration::from_secs(4));
        assert_eq!(retry.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn test_kafka_receive_backoff_grows_to_cap() {
        let backoff = RetryConfig {
            jitter: false,
            ..kafka_receive_backoff()
        };
        assert_eq!(backoff.strategy, BackoffStrategy::Exponential);
        assert_eq!(backoff.delay_for(1), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(12), Duration::from_secs(30));
        assert!(kafka_receive_backoff().jitter);
    }

    #[test]
    fn test_cache_and_storage_do_not_retry() {
        assert!(redis_config().retry.is_none());
        assert!(database_config().retry.is_none());
    }
}
