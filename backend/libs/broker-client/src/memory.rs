//! In-process broker
//!
//! Every topic is a single-partition append-only log. Consumer groups keep a
//! committed offset per topic; a new subscription starts from it, or from
//! `OffsetReset` when the group has never committed. Failures can be injected
//! for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use crate::{
    BrokerError, BrokerHealth, BrokerMessage, Delivery, Headers, OffsetReset, Publisher,
    SubscribeOptions, Subscriber, Subscription,
};

#[derive(Default)]
struct State {
    logs: HashMap<String, Vec<BrokerMessage>>,
    committed: HashMap<(String, String), i64>,
    fail_publishes: u32,
    unavailable: bool,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    appended: Notify,
}

#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                appended: Notify::new(),
            }),
        }
    }

    /// The next `count` publishes fail with `BrokerError::Timeout`
    pub async fn fail_next_publishes(&self, count: u32) {
        self.shared.state.lock().await.fail_publishes = count;
    }

    /// While set, publishes fail with `BrokerError::Unavailable`
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.shared.state.lock().await.unavailable = unavailable;
    }

    /// Disconnect every subscription and reject further publishes
    pub async fn close(&self) {
        self.shared.state.lock().await.closed = true;
        self.shared.appended.notify_waiters();
    }

    /// Snapshot of a topic's log
    pub async fn messages(&self, topic: &str) -> Vec<BrokerMessage> {
        self.shared
            .state
            .lock()
            .await
            .logs
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Next offset the group will read on `topic`, if it ever committed
    pub async fn committed_offset(&self, topic: &str, group_id: &str) -> Option<i64> {
        self.shared
            .state
            .lock()
            .await
            .committed
            .get(&(topic.to_string(), group_id.to_string()))
            .copied()
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        headers: &Headers,
    ) -> Result<Delivery, BrokerError> {
        let mut state = self.shared.state.lock().await;

        if state.closed || state.unavailable {
            return Err(BrokerError::Unavailable("memory broker offline".to_string()));
        }
        if state.fail_publishes > 0 {
            state.fail_publishes -= 1;
            return Err(BrokerError::Timeout("injected publish timeout".to_string()));
        }

        let log = state.logs.entry(topic.to_string()).or_default();
        let offset = log.len() as i64;
        log.push(BrokerMessage {
            topic: topic.to_string(),
            partition: 0,
            offset,
            key: Some(key.to_string()),
            payload: payload.to_vec(),
            headers: headers.clone(),
        });
        drop(state);

        self.shared.appended.notify_waiters();
        Ok(Delivery {
            partition: 0,
            offset,
        })
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), BrokerError> {
        Ok(())
    }
}

#[async_trait]
impl BrokerHealth for MemoryBroker {
    async fn health_check(&self, _timeout: Duration) -> Result<(), BrokerError> {
        let state = self.shared.state.lock().await;
        if state.closed || state.unavailable {
            return Err(BrokerError::Unavailable("memory broker offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Subscriber for MemoryBroker {
    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        options: SubscribeOptions,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let state = self.shared.state.lock().await;
        if state.closed {
            return Err(BrokerError::Unavailable("memory broker offline".to_string()));
        }

        let key = (topic.to_string(), group_id.to_string());
        let position = match state.committed.get(&key) {
            Some(offset) => *offset,
            None => match options.offset_reset {
                OffsetReset::Earliest => 0,
                OffsetReset::Latest => state.logs.get(topic).map_or(0, |log| log.len() as i64),
            },
        };

        Ok(Box::new(MemorySubscription {
            shared: self.shared.clone(),
            topic: key.0,
            group_id: key.1,
            auto_commit: options.auto_commit,
            position,
        }))
    }
}

pub struct MemorySubscription {
    shared: Arc<Shared>,
    topic: String,
    group_id: String,
    auto_commit: bool,
    position: i64,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn recv(&mut self) -> Result<BrokerMessage, BrokerError> {
        loop {
            let appended = self.shared.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            {
                let mut state = self.shared.state.lock().await;
                if state.closed {
                    return Err(BrokerError::Disconnected("memory broker closed".to_string()));
                }

                let next = state
                    .logs
                    .get(&self.topic)
                    .and_then(|log| log.get(self.position as usize))
                    .cloned();

                if let Some(message) = next {
                    self.position += 1;
                    if self.auto_commit {
                        state
                            .committed
                            .insert((self.topic.clone(), self.group_id.clone()), self.position);
                    }
                    return Ok(message);
                }
            }

            appended.await;
        }
    }

    async fn commit(&mut self, message: &BrokerMessage) -> Result<(), BrokerError> {
        let mut state = self.shared.state.lock().await;
        if state.closed {
            return Err(BrokerError::Commit("memory broker closed".to_string()));
        }
        state
            .committed
            .insert((message.topic.clone(), self.group_id.clone()), message.offset + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn publish(broker: &MemoryBroker, topic: &str, payload: &str) -> Delivery {
        broker
            .publish(topic, "k", payload.as_bytes(), &Headers::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_messages_arrive_in_order_with_headers() {
        let broker = MemoryBroker::new();
        let mut sub = broker
            .subscribe("t", "g", SubscribeOptions::manual_commit(OffsetReset::Earliest))
            .await
            .unwrap();

        let mut headers = Headers::new();
        headers.insert("traceparent".to_string(), "tp".to_string());
        broker.publish("t", "1", b"a", &headers).await.unwrap();
        publish(&broker, "t", "b").await;

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(first.payload, b"a");
        assert_eq!(first.headers.get("traceparent").map(String::as_str), Some("tp"));
        assert_eq!(second.offset, 1);
    }

    #[tokio::test]
    async fn test_recv_waits_for_publish() {
        let broker = MemoryBroker::new();
        let mut sub = broker
            .subscribe("t", "g", SubscribeOptions::auto_commit(OffsetReset::Earliest))
            .await
            .unwrap();

        let publisher = broker.clone();
        let handle = tokio::spawn(async move { sub.recv().await });
        tokio::task::yield_now().await;
        publish(&publisher, "t", "late").await;

        let message = handle.await.unwrap().unwrap();
        assert_eq!(message.payload, b"late");
    }

    #[tokio::test]
    async fn test_group_resumes_from_committed_offset() {
        let broker = MemoryBroker::new();
        publish(&broker, "t", "a").await;
        publish(&broker, "t", "b").await;

        let options = SubscribeOptions::manual_commit(OffsetReset::Earliest);
        let mut sub = broker.subscribe("t", "g", options).await.unwrap();
        let first = sub.recv().await.unwrap();
        sub.commit(&first).await.unwrap();
        let _uncommitted = sub.recv().await.unwrap();
        drop(sub);

        assert_eq!(broker.committed_offset("t", "g").await, Some(1));
        let mut again = broker.subscribe("t", "g", options).await.unwrap();
        assert_eq!(again.recv().await.unwrap().payload, b"b");
    }

    #[tokio::test]
    async fn test_latest_skips_existing_messages() {
        let broker = MemoryBroker::new();
        publish(&broker, "t", "old").await;

        let mut sub = broker
            .subscribe("t", "fresh", SubscribeOptions::auto_commit(OffsetReset::Latest))
            .await
            .unwrap();
        publish(&broker, "t", "new").await;

        assert_eq!(sub.recv().await.unwrap().payload, b"new");
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let broker = MemoryBroker::new();
        broker.fail_next_publishes(1).await;
        let err = broker
            .publish("t", "k", b"x", &Headers::new())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        publish(&broker, "t", "ok").await;

        broker.set_unavailable(true).await;
        let err = broker
            .publish("t", "k", b"x", &Headers::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_close_disconnects_waiting_subscription() {
        let broker = MemoryBroker::new();
        let mut sub = broker
            .subscribe("t", "g", SubscribeOptions::auto_commit(OffsetReset::Earliest))
            .await
            .unwrap();

        let handle = tokio::spawn(async move { sub.recv().await });
        tokio::task::yield_now().await;
        broker.close().await;

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(BrokerError::Disconnected(_))));
    }
}
