#![allow(dead_code)]

use api_gateway::{CorrelationEngine, EngineSettings};
use broker_client::{
    Headers, MemoryBroker, OffsetReset, Publisher, SubscribeOptions, Subscriber,
};
use event_schema::{Car, RequestEnvelope, ResponseEnvelope, REQUEST_TOPIC, RESPONSE_TOPIC};
use resilience::RetryConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub fn settings() -> EngineSettings {
    EngineSettings {
        request_topic: REQUEST_TOPIC.to_string(),
        response_topic: RESPONSE_TOPIC.to_string(),
        response_group_id: "gateway_test-local".to_string(),
        response_offset_reset: OffsetReset::Earliest,
        publish_retry: RetryConfig::fixed(3, Duration::from_millis(10)),
        call_timeout: Duration::from_secs(2),
    }
}

pub async fn engine(broker: &MemoryBroker) -> Arc<CorrelationEngine> {
    Arc::new(
        CorrelationEngine::start(Arc::new(broker.clone()), broker, settings())
            .await
            .unwrap(),
    )
}

pub fn car(id: i64, name: &str) -> Car {
    Car {
        id,
        name: name.to_string(),
        price: 100,
        year: "2020".to_string(),
    }
}

/// Stand-in for the data processor: answers each request with `reply`.
/// A `None` reply leaves the request unanswered.
pub fn responder<F>(broker: &MemoryBroker, reply: F) -> JoinHandle<()>
where
    F: Fn(&RequestEnvelope) -> Option<ResponseEnvelope> + Send + 'static,
{
    let broker = broker.clone();
    tokio::spawn(async move {
        let mut requests = broker
            .subscribe(
                REQUEST_TOPIC,
                "responder",
                SubscribeOptions::auto_commit(OffsetReset::Earliest),
            )
            .await
            .unwrap();

        while let Ok(message) = requests.recv().await {
            let Ok(request) = RequestEnvelope::from_slice(&message.payload) else {
                continue;
            };
            if let Some(response) = reply(&request) {
                let bytes = response.to_bytes().unwrap();
                let key = request.id.to_string();
                if broker
                    .publish(RESPONSE_TOPIC, &key, &bytes, &Headers::new())
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    })
}

/// Caller-chosen part of a wire correlation id (`<caller id>#<token>`)
pub fn caller_id(wire_id: &str) -> &str {
    wire_id.rsplit_once('#').map_or(wire_id, |(caller, _)| caller)
}

/// Answers every request with a car named after its caller correlation id
pub fn echo_responder(broker: &MemoryBroker) -> JoinHandle<()> {
    responder(broker, |request| {
        Some(ResponseEnvelope::found(
            request.id,
            &request.correlation_id,
            car(request.id, caller_id(&request.correlation_id)),
        ))
    })
}

/// Publish a raw payload on the response topic
pub async fn inject_response(broker: &MemoryBroker, payload: &[u8]) {
    broker
        .publish(RESPONSE_TOPIC, "0", payload, &Headers::new())
        .await
        .unwrap();
}
