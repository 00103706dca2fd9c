//! Request processor
//!
//! Reads the request topic one message at a time, runs the operation against
//! storage, publishes exactly one response per addressable request and only
//! then commits the request offset. A crash before the commit replays the
//! request; every operation is idempotent so the replay is harmless.

use broker_client::{
    publish_with_retry, BrokerMessage, Delivery, Headers, OffsetReset, Publisher,
    SubscribeOptions, Subscriber, Subscription,
};
use event_schema::{
    Car, CarFields, CarPatch, EnvelopeAddress, Operation, RequestEnvelope, ResponseEnvelope,
};
use opentelemetry_config::{carrier, TraceCarrier};
use resilience::RetryConfig;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use validator::Validate;

use crate::error::{ProcessorError, RequestError};
use crate::storage::CarRepository;

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub request_topic: String,
    pub response_topic: String,
    pub group_id: String,
    pub publish_retry: RetryConfig,
}

/// Storage result of one request, before it is put on the wire
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Document(Car),
    Deleted,
    Missing,
}

pub struct RequestProcessor {
    repository: Arc<dyn CarRepository>,
    publisher: Arc<dyn Publisher>,
    settings: ProcessorSettings,
}

impl RequestProcessor {
    pub fn new(
        repository: Arc<dyn CarRepository>,
        publisher: Arc<dyn Publisher>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            repository,
            publisher,
            settings,
        }
    }

    /// Join the processor group on the request topic with manual commits
    pub async fn subscribe(
        &self,
        subscriber: &dyn Subscriber,
    ) -> Result<Box<dyn Subscription>, ProcessorError> {
        let subscription = subscriber
            .subscribe(
                &self.settings.request_topic,
                &self.settings.group_id,
                SubscribeOptions::manual_commit(OffsetReset::Earliest),
            )
            .await?;
        Ok(subscription)
    }

    /// Process requests until the broker fails
    pub async fn run(&self, mut subscription: Box<dyn Subscription>) -> Result<(), ProcessorError> {
        info!(
            topic = %self.settings.request_topic,
            group_id = %self.settings.group_id,
            "Request processor started"
        );

        loop {
            let message = subscription.recv().await?;

            match self.handle_message(&message).await {
                Ok(_) => {}
                Err(ProcessorError::Encode(err)) => {
                    error!(offset = message.offset, error = %err, "Dropping unencodable response");
                }
                Err(err) => return Err(err),
            }

            subscription.commit(&message).await?;
        }
    }

    /// Decode one request, run it and publish the response.
    ///
    /// Returns `None` when the message cannot be addressed and was skipped.
    pub async fn handle_message(
        &self,
        message: &BrokerMessage,
    ) -> Result<Option<Delivery>, ProcessorError> {
        let request = match RequestEnvelope::from_slice(&message.payload) {
            Ok(request) => request,
            Err(err) => return self.reject(message, err).await,
        };

        let parent = TraceCarrier::from_headers(&message.headers)
            .or(TraceCarrier::from(request.context.clone()));
        let span = info_span!(
            "process_request",
            operation = %request.operation,
            id = request.id,
            correlation_id = %request.correlation_id,
            trace_id = tracing::field::Empty
        );
        carrier::attach_parent(&span, &parent);
        carrier::record_trace_id(&span);

        async {
            debug!(offset = message.offset, "Processing request");
            let response = self.dispatch(&request).await;
            self.respond(response).await.map(Some)
        }
        .instrument(span)
        .await
    }

    /// Run the request against storage and build its response
    pub async fn dispatch(&self, request: &RequestEnvelope) -> ResponseEnvelope {
        let id = request.id;
        let correlation_id = request.correlation_id.as_str();

        let span = info_span!("storage_operation", operation = %request.operation, id);
        match self.execute(request).instrument(span).await {
            Ok(Outcome::Document(car)) => ResponseEnvelope::found(id, correlation_id, car),
            Ok(Outcome::Deleted) => ResponseEnvelope::deleted(id, correlation_id),
            Ok(Outcome::Missing) => ResponseEnvelope::not_found(id, correlation_id),
            Err(err) => {
                warn!(error = %err, "Request failed");
                ResponseEnvelope::error(id, correlation_id, err.to_string())
            }
        }
    }

    async fn execute(&self, request: &RequestEnvelope) -> Result<Outcome, RequestError> {
        let id = request.id;

        match request.operation {
            Operation::Get => Ok(self
                .repository
                .get_by_id(id)
                .await?
                .map_or(Outcome::Missing, Outcome::Document)),

            Operation::Put => {
                let fields: CarFields = decode_data(request)?.ok_or_else(|| {
                    RequestError::InvalidPayload("PUT requires a document".to_string())
                })?;
                fields.validate()?;

                // the envelope id wins over anything in the body
                let stored = self.repository.upsert(&Car::from_fields(id, fields)).await?;
                Ok(Outcome::Document(stored))
            }

            Operation::Patch => {
                let patch: CarPatch = decode_data(request)?.unwrap_or_default();
                patch.validate()?;

                let Some(mut car) = self.repository.get_by_id(id).await? else {
                    return Ok(Outcome::Missing);
                };
                if patch.is_empty() {
                    return Ok(Outcome::Document(car));
                }

                car.apply(&patch);
                car.validate()?;
                let stored = self.repository.upsert(&car).await?;
                Ok(Outcome::Document(stored))
            }

            Operation::Delete => {
                if self.repository.delete_by_id(id).await? {
                    Ok(Outcome::Deleted)
                } else {
                    Ok(Outcome::Missing)
                }
            }
        }
    }

    /// Answer a request whose envelope could not be decoded, if it can be addressed
    async fn reject(
        &self,
        message: &BrokerMessage,
        err: serde_json::Error,
    ) -> Result<Option<Delivery>, ProcessorError> {
        let Some(address) = EnvelopeAddress::from_slice(&message.payload) else {
            warn!(offset = message.offset, error = %err, "Skipping unaddressable request");
            return Ok(None);
        };

        warn!(
            offset = message.offset,
            correlation_id = %address.correlation_id,
            error = %err,
            "Malformed request"
        );

        let span = info_span!(
            "process_request",
            id = address.id,
            correlation_id = %address.correlation_id,
            trace_id = tracing::field::Empty
        );
        carrier::attach_parent(&span, &TraceCarrier::from_headers(&message.headers));
        carrier::record_trace_id(&span);

        let response = ResponseEnvelope::error(
            address.id,
            &address.correlation_id,
            format!("Invalid request: {err}"),
        );
        self.respond(response).instrument(span).await.map(Some)
    }

    /// Publish a response carrying the current trace context
    async fn respond(&self, response: ResponseEnvelope) -> Result<Delivery, ProcessorError> {
        let trace = carrier::current();
        let response = response.with_context(trace.clone().into());
        let bytes = response.to_bytes()?;
        let headers: Headers = trace.into();

        let delivery = publish_with_retry(
            self.publisher.as_ref(),
            &self.settings.publish_retry,
            &self.settings.response_topic,
            &response.id.to_string(),
            &bytes,
            &headers,
        )
        .await?;

        debug!(
            correlation_id = %response.correlation_id,
            partition = delivery.partition,
            offset = delivery.offset,
            "Response published"
        );
        Ok(delivery)
    }
}

fn decode_data<T: serde::de::DeserializeOwned>(
    request: &RequestEnvelope,
) -> Result<Option<T>, RequestError> {
    request
        .data
        .clone()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| RequestError::InvalidPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryCarRepository;
    use broker_client::MemoryBroker;
    use event_schema::ResponsePayload;
    use serde_json::json;
    use std::time::Duration;

    fn car(id: i64, name: &str, price: i64) -> Car {
        Car {
            id,
            name: name.to_string(),
            price,
            year: "2020".to_string(),
        }
    }

    fn processor(repo: MemoryCarRepository) -> RequestProcessor {
        RequestProcessor::new(
            Arc::new(repo),
            Arc::new(MemoryBroker::new()),
            ProcessorSettings {
                request_topic: "req".to_string(),
                response_topic: "resp".to_string(),
                group_id: "g".to_string(),
                publish_retry: RetryConfig::fixed(1, Duration::from_millis(1)),
            },
        )
    }

    fn request(op: Operation, id: i64, data: Option<serde_json::Value>) -> RequestEnvelope {
        let mut request = RequestEnvelope::new(op, id, format!("c-{id}"));
        request.data = data;
        request
    }

    #[tokio::test]
    async fn test_patch_changes_only_present_fields() {
        let p = processor(MemoryCarRepository::with_cars([car(1, "A", 10)]));
        let response = p
            .dispatch(&request(Operation::Patch, 1, Some(json!({ "price": 20 }))))
            .await;
        assert_eq!(
            response.data,
            Some(ResponsePayload::Document(car(1, "A", 20)))
        );
    }

    #[tokio::test]
    async fn test_put_uses_envelope_id() {
        let p = processor(MemoryCarRepository::new());
        let response = p
            .dispatch(&request(
                Operation::Put,
                4,
                Some(json!({ "id": 99, "name": "B", "price": 5, "year": "2001" })),
            ))
            .await;
        match response.data {
            Some(ResponsePayload::Document(stored)) => assert_eq!(stored.id, 4),
            other => panic!("unexpected payload {other:?}"),
        }
        assert_eq!(response.correlation_id, "c-4");
    }

    #[tokio::test]
    async fn test_missing_targets_have_no_payload() {
        let p = processor(MemoryCarRepository::new());
        for op in [Operation::Get, Operation::Patch, Operation::Delete] {
            let response = p.dispatch(&request(op, 9999, Some(json!({})))).await;
            assert_eq!(response.data, None, "{op}");
        }
    }

    #[tokio::test]
    async fn test_invalid_payloads_become_errors() {
        let p = processor(MemoryCarRepository::with_cars([car(1, "A", 10)]));

        let no_body = p.dispatch(&request(Operation::Put, 1, None)).await;
        assert!(matches!(no_body.data, Some(ResponsePayload::Error { .. })));

        let wrong_type = p
            .dispatch(&request(Operation::Patch, 1, Some(json!({ "price": "cheap" }))))
            .await;
        assert!(matches!(wrong_type.data, Some(ResponsePayload::Error { .. })));

        let too_long = p
            .dispatch(&request(
                Operation::Patch,
                1,
                Some(json!({ "name": "n".repeat(101) })),
            ))
            .await;
        assert!(matches!(too_long.data, Some(ResponsePayload::Error { .. })));
    }

    #[tokio::test]
    async fn test_storage_failure_becomes_error_payload() {
        let repo = MemoryCarRepository::new();
        repo.set_failing(true);
        let p = processor(repo);

        let response = p.dispatch(&request(Operation::Get, 1, None)).await;
        match response.data {
            Some(ResponsePayload::Error { error }) => assert!(error.contains("offline")),
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
