//! Broker client used by the gateway and the data processor
//!
//! `Publisher` and `Subscriber` are the two seams over the message broker.
//! `KafkaBroker` implements them with rdkafka; `MemoryBroker` is an
//! in-process log with consumer-group offsets for tests and embedding.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub mod error;
pub mod kafka;
pub mod memory;
pub mod retry;

pub use error::BrokerError;
pub use kafka::{KafkaBroker, KafkaSettings};
pub use memory::MemoryBroker;
pub use retry::publish_with_retry;

/// Message headers as UTF-8 key/value pairs
pub type Headers = HashMap<String, String>;

/// A consumed message, detached from the client that read it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: Headers,
}

/// Where an accepted message landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// Starting position for a group with no committed offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

impl fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OffsetReset {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" | "smallest" | "beginning" => Ok(OffsetReset::Earliest),
            "latest" | "largest" | "end" => Ok(OffsetReset::Latest),
            other => Err(BrokerError::Config(format!("unknown offset reset: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Commit each message as it is delivered
    pub auto_commit: bool,
    pub offset_reset: OffsetReset,
}

impl SubscribeOptions {
    /// Offsets advance on delivery; used by the gateway's response reader
    pub fn auto_commit(offset_reset: OffsetReset) -> Self {
        Self {
            auto_commit: true,
            offset_reset,
        }
    }

    /// Offsets advance only through `Subscription::commit`
    pub fn manual_commit(offset_reset: OffsetReset) -> Self {
        Self {
            auto_commit: false,
            offset_reset,
        }
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        headers: &Headers,
    ) -> Result<Delivery, BrokerError>;

    /// Wait for in-flight messages to be delivered
    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Subscription: Send {
    /// Next message in arrival order. An error means the subscription is unusable.
    async fn recv(&mut self) -> Result<BrokerMessage, BrokerError>;

    /// Mark `message` and everything before it in its partition as processed
    async fn commit(&mut self, message: &BrokerMessage) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        options: SubscribeOptions,
    ) -> Result<Box<dyn Subscription>, BrokerError>;
}

/// Cluster reachability check for readiness endpoints
#[async_trait]
pub trait BrokerHealth: Send + Sync {
    async fn health_check(&self, timeout: Duration) -> Result<(), BrokerError>;
}
