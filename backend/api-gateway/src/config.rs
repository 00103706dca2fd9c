/// Configuration for the API gateway
///
/// Everything comes from environment variables (after `.env` is loaded by `main`).
use broker_client::OffsetReset;
use resilience::RetryConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub kafka: KafkaConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Application environment (development, staging, production)
    pub env: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub request_topic: String,
    pub response_topic: String,
    /// Base consumer group; each gateway instance appends its instance id
    pub group_id: String,
    pub instance_id: String,
    pub response_offset_reset: OffsetReset,
    pub publish_attempts: u32,
    pub publish_backoff_ms: u64,
    pub call_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub url: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{key} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let kafka = KafkaConfig {
            brokers: env_or("KAFKA_BROKER", "localhost:9092"),
            request_topic: env_or("KAFKA_REQUEST_TOPIC", event_schema::REQUEST_TOPIC),
            response_topic: env_or("KAFKA_RESPONSE_TOPIC", event_schema::RESPONSE_TOPIC),
            group_id: env_or("KAFKA_GATEWAY_GROUP_ID", "api_gateway_group"),
            instance_id: env_or("HOSTNAME", "local"),
            response_offset_reset: env_or("KAFKA_RESPONSE_OFFSET_RESET", "earliest")
                .parse()
                .map_err(|e: broker_client::BrokerError| e.to_string())?,
            publish_attempts: parse_env_or("KAFKA_PUBLISH_ATTEMPTS", 3)?,
            publish_backoff_ms: parse_env_or("KAFKA_PUBLISH_BACKOFF_MS", 4000)?,
            call_timeout_ms: parse_env_or("GATEWAY_CALL_TIMEOUT_MS", 30_000)?,
        };

        if kafka.publish_attempts == 0 {
            return Err("KAFKA_PUBLISH_ATTEMPTS must be at least 1".to_string());
        }

        Ok(Config {
            app: AppConfig {
                env: env_or("APP_ENV", "development"),
                host: env_or("GATEWAY_HOST", "0.0.0.0"),
                port: parse_env_or("GATEWAY_PORT", 80)?,
            },
            kafka,
            cache: CacheConfig {
                url: env_or("REDIS_URL", "redis://localhost:6379"),
            },
        })
    }
}

impl KafkaConfig {
    /// Group used by this instance's response reader.
    ///
    /// Instances must not share a group, otherwise one instance could consume
    /// the response another instance is waiting for.
    pub fn response_group_id(&self) -> String {
        format!("{}-{}", self.group_id, self.instance_id)
    }

    pub fn publish_retry(&self) -> RetryConfig {
        RetryConfig::fixed(
            self.publish_attempts,
            Duration::from_millis(self.publish_backoff_ms),
        )
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "KAFKA_BROKER",
        "KAFKA_GATEWAY_GROUP_ID",
        "HOSTNAME",
        "KAFKA_RESPONSE_OFFSET_RESET",
        "KAFKA_PUBLISH_ATTEMPTS",
        "GATEWAY_PORT",
    ];

    fn clear() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear();
        let config = Config::from_env().unwrap();

        assert_eq!(config.app.port, 80);
        assert_eq!(config.kafka.request_topic, "data_requests");
        assert_eq!(config.kafka.response_topic, "data_responses");
        assert_eq!(config.kafka.response_offset_reset, OffsetReset::Earliest);
        assert_eq!(config.kafka.response_group_id(), "api_gateway_group-local");
        assert_eq!(config.kafka.publish_retry().max_attempts, 3);
        assert_eq!(config.kafka.call_timeout(), Duration::from_secs(30));
    }

    #[test]
    #[serial]
    fn test_instance_scoped_group() {
        clear();
        std::env::set_var("HOSTNAME", "gateway-7f9c");
        let config = Config::from_env().unwrap();
        assert_eq!(config.kafka.response_group_id(), "api_gateway_group-gateway-7f9c");
        clear();
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        clear();
        std::env::set_var("GATEWAY_PORT", "eighty");
        assert!(Config::from_env().is_err());

        clear();
        std::env::set_var("KAFKA_PUBLISH_ATTEMPTS", "0");
        assert!(Config::from_env().is_err());

        clear();
        std::env::set_var("KAFKA_RESPONSE_OFFSET_RESET", "middle");
        assert!(Config::from_env().is_err());
        clear();
    }
}
