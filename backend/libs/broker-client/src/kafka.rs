//! rdkafka-backed broker
//!
//! Producer configuration:
//! - `enable.idempotence = true` and `acks = all` so retried publishes are not duplicated
//! - `message.timeout.ms` bounds a single delivery attempt; `publish_with_retry` adds the outer budget
//!
//! Each subscription owns its own `StreamConsumer`.

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Header, Headers as _, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use resilience::RetryConfig;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    BrokerError, BrokerHealth, BrokerMessage, Delivery, Headers, Publisher, SubscribeOptions,
    Subscriber, Subscription,
};

#[derive(Debug, Clone)]
pub struct KafkaSettings {
    /// Comma-separated bootstrap servers
    pub brokers: String,
    /// Delivery timeout for a single publish attempt
    pub message_timeout: Duration,
    pub session_timeout: Duration,
}

impl KafkaSettings {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            message_timeout: resilience::kafka_publish_config().timeout,
            session_timeout: Duration::from_secs(45),
        }
    }
}

#[derive(Clone)]
pub struct KafkaBroker {
    producer: FutureProducer,
    settings: KafkaSettings,
}

impl KafkaBroker {
    pub fn connect(settings: KafkaSettings) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set(
                "message.timeout.ms",
                settings.message_timeout.as_millis().to_string(),
            )
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("max.in.flight.requests.per.connection", "5")
            .set("linger.ms", "5")
            .create()?;

        info!(brokers = %settings.brokers, "Kafka producer created");

        Ok(Self { producer, settings })
    }

    /// Create any of `topics` that do not exist yet (one partition, replication 1)
    pub async fn ensure_topics(&self, topics: &[&str]) -> Result<(), BrokerError> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.settings.brokers)
            .create()?;

        let new_topics: Vec<NewTopic<'_>> = topics
            .iter()
            .map(|name| NewTopic::new(name, 1, TopicReplication::Fixed(1)))
            .collect();

        let options = AdminOptions::new().operation_timeout(Some(Timeout::After(
            self.settings.session_timeout,
        )));

        for result in admin.create_topics(new_topics.iter(), &options).await? {
            match result {
                Ok(topic) => info!(topic = %topic, "Created Kafka topic"),
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    debug!(topic = %topic, "Kafka topic already exists")
                }
                Err((topic, code)) => {
                    return Err(BrokerError::Unavailable(format!(
                        "failed to create topic {topic}: {code}"
                    )))
                }
            }
        }

        Ok(())
    }

    fn consumer_config(&self, group_id: &str, options: SubscribeOptions) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.settings.brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", options.auto_commit.to_string())
            .set("auto.offset.reset", options.offset_reset.as_str())
            .set("enable.partition.eof", "false")
            .set(
                "session.timeout.ms",
                self.settings.session_timeout.as_millis().to_string(),
            );
        config
    }
}

#[async_trait]
impl Publisher for KafkaBroker {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        headers: &Headers,
    ) -> Result<Delivery, BrokerError> {
        let mut owned = OwnedHeaders::new_with_capacity(headers.len());
        for (name, value) in headers {
            owned = owned.insert(Header {
                key: name.as_str(),
                value: Some(value.as_str()),
            });
        }

        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload)
            .headers(owned);

        match self
            .producer
            .send(record, Timeout::After(self.settings.message_timeout))
            .await
        {
            Ok((partition, offset)) => Ok(Delivery { partition, offset }),
            Err((err, _)) => Err(err.into()),
        }
    }

    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?
            .map_err(BrokerError::from)
    }
}

#[async_trait]
impl BrokerHealth for KafkaBroker {
    /// Fetch cluster metadata within `timeout`
    async fn health_check(&self, timeout: Duration) -> Result<(), BrokerError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, Timeout::After(timeout))
                .map(|_| ())
        })
        .await
        .map_err(|e| BrokerError::Unavailable(e.to_string()))?
        .map_err(BrokerError::from)
    }
}

#[async_trait]
impl Subscriber for KafkaBroker {
    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        options: SubscribeOptions,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let consumer: StreamConsumer = self.consumer_config(group_id, options).create()?;
        consumer.subscribe(&[topic])?;

        info!(
            topic = %topic,
            group_id = %group_id,
            auto_commit = options.auto_commit,
            offset_reset = %options.offset_reset,
            "Kafka consumer subscribed"
        );

        Ok(Box::new(KafkaSubscription {
            consumer,
            backoff: resilience::kafka_receive_backoff(),
            failures: 0,
        }))
    }
}

pub struct KafkaSubscription {
    consumer: StreamConsumer,
    backoff: RetryConfig,
    /// Consecutive failed receives, reset by the next message
    failures: u32,
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn recv(&mut self) -> Result<BrokerMessage, BrokerError> {
        loop {
            match self.consumer.recv().await {
                Ok(record) => {
                    self.failures = 0;
                    return Ok(detach(&record));
                }
                Err(err) if is_fatal(&err) => {
                    return Err(BrokerError::Disconnected(err.to_string()))
                }
                Err(err) => {
                    self.failures = self.failures.saturating_add(1);
                    let delay = self.backoff.delay_for(self.failures);
                    warn!(
                        error = %err,
                        failures = self.failures,
                        retry_in = ?delay,
                        "Kafka receive error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn commit(&mut self, message: &BrokerMessage) -> Result<(), BrokerError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset + 1),
            )
            .map_err(|e| BrokerError::Commit(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Sync)
            .map_err(|e| BrokerError::Commit(e.to_string()))
    }
}

fn detach(record: &BorrowedMessage<'_>) -> BrokerMessage {
    let headers = record
        .headers()
        .map(|headers| {
            headers
                .iter()
                .filter_map(|header| {
                    let value = header.value?;
                    Some((
                        header.key.to_string(),
                        String::from_utf8_lossy(value).into_owned(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default();

    BrokerMessage {
        topic: record.topic().to_string(),
        partition: record.partition(),
        offset: record.offset(),
        key: record.key().map(|k| String::from_utf8_lossy(k).into_owned()),
        payload: record.payload().unwrap_or_default().to_vec(),
        headers,
    }
}

fn is_timeout_code(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::MessageTimedOut
            | RDKafkaErrorCode::RequestTimedOut
            | RDKafkaErrorCode::OperationTimedOut
            | RDKafkaErrorCode::QueueFull
    )
}

fn is_fatal(err: &KafkaError) -> bool {
    matches!(err, KafkaError::Canceled)
        || err.rdkafka_error_code() == Some(RDKafkaErrorCode::Fatal)
}

impl From<KafkaError> for BrokerError {
    fn from(err: KafkaError) -> Self {
        match &err {
            KafkaError::ClientConfig(..) | KafkaError::ClientCreation(_) => {
                BrokerError::Config(err.to_string())
            }
            _ if err.rdkafka_error_code().is_some_and(is_timeout_code) => {
                BrokerError::Timeout(err.to_string())
            }
            _ => BrokerError::Unavailable(err.to_string()),
        }
    }
}
