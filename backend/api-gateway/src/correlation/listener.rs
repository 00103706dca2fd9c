//! Shared response reader
//!
//! One task per gateway instance reads the response topic in arrival order
//! and completes the matching pending call. Responses nobody waits for
//! (late, duplicated, or meant for another instance) are dropped.

use broker_client::{BrokerMessage, Subscription};
use event_schema::ResponseEnvelope;
use opentelemetry_config::TraceCarrier;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::registry::{Delivered, PendingCalls};

pub(crate) fn spawn(
    subscription: Box<dyn Subscription>,
    registry: Arc<PendingCalls>,
) -> JoinHandle<()> {
    tokio::spawn(run(subscription, registry))
}

async fn run(mut subscription: Box<dyn Subscription>, registry: Arc<PendingCalls>) {
    info!("Response reader started");

    loop {
        match subscription.recv().await {
            Ok(message) => dispatch(&registry, message),
            Err(err) => {
                error!(error = %err, "Response reader stopped");
                registry.close(&err.to_string());
                break;
            }
        }
    }
}

pub(crate) fn dispatch(registry: &PendingCalls, message: BrokerMessage) {
    let envelope = match ResponseEnvelope::from_slice(&message.payload) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(
                offset = message.offset,
                error = %err,
                "Discarding undecodable response"
            );
            return;
        }
    };

    let carrier =
        TraceCarrier::from_headers(&message.headers).or(TraceCarrier::from(envelope.context.clone()));
    let wire_id = envelope.correlation_id.clone();

    if !registry.complete(&wire_id, Delivered::Response { envelope, carrier }) {
        debug!(
            correlation_id = %wire_id,
            offset = message.offset,
            "Discarding response with no waiting call"
        );
    }
}
