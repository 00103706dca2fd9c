use db_pool::DbConfig;
use resilience::RetryConfig;
use std::time::Duration;

use crate::processor::ProcessorSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub env: String,
    pub kafka: KafkaConfig,
    pub database: DbConfig,
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub request_topic: String,
    pub response_topic: String,
    /// Shared by all processor instances so each request is handled once
    pub group_id: String,
    pub publish_attempts: u32,
    pub publish_backoff_ms: u64,
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
        Ok(Config {
            env: env_or("APP_ENV", "development"),
            kafka: KafkaConfig::from_env()?,
            database: DbConfig::from_env("data-processor")?,
        })
    }
}

impl KafkaConfig {
    pub fn from_env() -> Result<Self, String> {
        let config = KafkaConfig {
            brokers: env_or("KAFKA_BROKER", "localhost:9092"),
            request_topic: env_or("KAFKA_REQUEST_TOPIC", event_schema::REQUEST_TOPIC),
            response_topic: env_or("KAFKA_RESPONSE_TOPIC", event_schema::RESPONSE_TOPIC),
            group_id: env_or("KAFKA_PROCESSOR_GROUP_ID", "data_processor_group"),
            publish_attempts: parse_env_or("KAFKA_PUBLISH_ATTEMPTS", 3)?,
            publish_backoff_ms: parse_env_or("KAFKA_PUBLISH_BACKOFF_MS", 4000)?,
        };

        if config.publish_attempts == 0 {
            return Err("KAFKA_PUBLISH_ATTEMPTS must be at least 1".to_string());
        }
        Ok(config)
    }

    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            request_topic: self.request_topic.clone(),
            response_topic: self.response_topic.clone(),
            group_id: self.group_id.clone(),
            publish_retry: RetryConfig::fixed(
                self.publish_attempts,
                Duration::from_millis(self.publish_backoff_ms),
            ),
        }
    }
}
