//! Correlation engine
//!
//! Turns a CRUD call into publish → wait → match. Each call gets a fresh
//! correlation id and a registry entry created before the request is
//! published, so a fast response cannot be missed. The request carries the
//! entry's wire id (correlation id plus registration token). A single reader
//! task completes entries as responses arrive.

mod listener;
mod registry;

pub use registry::PendingCalls;

use broker_client::{
    publish_with_retry, BrokerError, Headers, OffsetReset, Publisher, SubscribeOptions, Subscriber,
};
use event_schema::{Car, Operation, RequestEnvelope, ResponsePayload};
use opentelemetry_config::carrier;
use resilience::{Deadline, RetryConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, instrument, warn};
use uuid::Uuid;

/// Result of a matched call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Found(Car),
    Deleted,
    NotFound,
}

#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// The data processor answered with an error payload
    #[error("{0}")]
    Remote(String),

    #[error("correlation id {0} is already in flight")]
    DuplicateCorrelationId(String),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub request_topic: String,
    pub response_topic: String,
    /// Consumer group of this instance's response reader
    pub response_group_id: String,
    pub response_offset_reset: OffsetReset,
    pub publish_retry: RetryConfig,
    pub call_timeout: Duration,
}

pub struct CorrelationEngine {
    publisher: Arc<dyn Publisher>,
    registry: Arc<PendingCalls>,
    settings: EngineSettings,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl CorrelationEngine {
    /// Subscribe to the response topic and start the shared reader
    pub async fn start(
        publisher: Arc<dyn Publisher>,
        subscriber: &dyn Subscriber,
        settings: EngineSettings,
    ) -> Result<Self, BrokerError> {
        let subscription = subscriber
            .subscribe(
                &settings.response_topic,
                &settings.response_group_id,
                SubscribeOptions::auto_commit(settings.response_offset_reset),
            )
            .await?;

        let registry = Arc::new(PendingCalls::new());
        let reader = listener::spawn(subscription, registry.clone());

        info!(
            request_topic = %settings.request_topic,
            response_topic = %settings.response_topic,
            group_id = %settings.response_group_id,
            "Correlation engine started"
        );

        Ok(Self {
            publisher,
            registry,
            settings,
            reader: Mutex::new(Some(reader)),
        })
    }

    pub fn default_timeout(&self) -> Duration {
        self.settings.call_timeout
    }

    pub fn registry(&self) -> &PendingCalls {
        &self.registry
    }

    /// False once the response reader has stopped
    pub fn is_running(&self) -> bool {
        !self.registry.is_closed()
    }

    pub async fn call(
        &self,
        operation: Operation,
        id: i64,
        payload: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<CallOutcome, CorrelationError> {
        let correlation_id = Uuid::new_v4().to_string();
        self.call_with_correlation_id(&correlation_id, operation, id, payload, timeout)
            .await
    }

    #[instrument(
        name = "correlation.call",
        skip_all,
        fields(
            operation = %operation,
            id,
            correlation_id = %correlation_id,
            trace_id = tracing::field::Empty
        )
    )]
    pub async fn call_with_correlation_id(
        &self,
        correlation_id: &str,
        operation: Operation,
        id: i64,
        payload: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<CallOutcome, CorrelationError> {
        carrier::record_trace_id(&tracing::Span::current());
        let mut pending = self
            .registry
            .register(correlation_id, Deadline::after(timeout))?;

        let trace = carrier::current();
        let mut envelope = RequestEnvelope::new(operation, id, &pending.wire_id())
            .with_context(trace.clone().into());
        envelope.data = payload;
        let bytes = envelope.to_bytes()?;
        let headers: Headers = trace.into();
        let key = id.to_string();

        let publish = publish_with_retry(
            self.publisher.as_ref(),
            &self.settings.publish_retry,
            &self.settings.request_topic,
            &key,
            &bytes,
            &headers,
        );

        match pending.deadline().run(publish).await {
            Ok(Ok(delivery)) => debug!(
                partition = delivery.partition,
                offset = delivery.offset,
                "Request published"
            ),
            Ok(Err(err)) => {
                warn!(error = %err, "Request publish failed");
                return Err(CorrelationError::BrokerUnavailable(err.to_string()));
            }
            Err(_) => return Err(CorrelationError::Timeout(timeout)),
        }

        let (response, response_carrier) = pending.wait().await?;

        let span = info_span!(
            "correlation.response",
            correlation_id = %correlation_id,
            trace_id = tracing::field::Empty
        );
        carrier::attach_parent(&span, &response_carrier);
        carrier::record_trace_id(&span);
        let _entered = span.enter();

        match response.data {
            None => {
                debug!("Response: not found");
                Ok(CallOutcome::NotFound)
            }
            Some(ResponsePayload::Document(car)) => Ok(CallOutcome::Found(car)),
            Some(ResponsePayload::Deleted { .. }) => Ok(CallOutcome::Deleted),
            Some(ResponsePayload::Error { error }) => {
                warn!(detail = %error, "Data processor reported an error");
                Err(CorrelationError::Remote(error))
            }
        }
    }

    /// Stop the response reader and fail calls still waiting
    pub fn shutdown(&self) {
        if let Ok(mut reader) = self.reader.lock() {
            if let Some(handle) = reader.take() {
                handle.abort();
            }
        }
        self.registry.close("gateway shutting down");
    }
}

impl Drop for CorrelationEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
