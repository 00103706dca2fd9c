mod common;

use api_gateway::CallOutcome;
use broker_client::{Headers, MemoryBroker, OffsetReset, Publisher, SubscribeOptions, Subscriber};
use common::engine;
use event_schema::{Operation, RequestEnvelope, ResponseEnvelope, REQUEST_TOPIC, RESPONSE_TOPIC};
use opentelemetry::trace::{SpanId, TraceId, TracerProvider as _};
use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
use opentelemetry_sdk::trace::TracerProvider;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;

const PROCESSOR_TRACE_ID: &str = "0af7651916cd43dd8448eb211c80319c";
const PROCESSOR_SPAN_ID: &str = "b7ad6b7169203331";

/// Answers the first request with a response whose headers carry the
/// processor's span, and hands back the request it answered.
async fn answer_with_processor_span(broker: &MemoryBroker) -> RequestEnvelope {
    let mut requests = broker
        .subscribe(
            REQUEST_TOPIC,
            "traced-responder",
            SubscribeOptions::auto_commit(OffsetReset::Earliest),
        )
        .await
        .unwrap();
    let message = requests.recv().await.unwrap();
    let request = RequestEnvelope::from_slice(&message.payload).unwrap();
    assert_eq!(request.context, message.headers);

    let mut headers = Headers::new();
    headers.insert(
        "traceparent".to_string(),
        format!("00-{PROCESSOR_TRACE_ID}-{PROCESSOR_SPAN_ID}-01"),
    );
    let response = ResponseEnvelope::not_found(request.id, &request.correlation_id);
    broker
        .publish(RESPONSE_TOPIC, "1", &response.to_bytes().unwrap(), &headers)
        .await
        .unwrap();
    request
}

#[tokio::test]
async fn test_response_span_is_parented_on_processor_span() {
    let exporter = InMemorySpanExporter::default();
    let provider = TracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    let subscriber = tracing_subscriber::registry()
        .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("gateway-test")));
    let _default = tracing::subscriber::set_default(subscriber);

    let broker = MemoryBroker::new();
    let engine = engine(&broker).await;
    let responder = {
        let broker = broker.clone();
        tokio::spawn(async move { answer_with_processor_span(&broker).await })
    };

    let outcome = engine
        .call(Operation::Get, 1, None, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(outcome, CallOutcome::NotFound);
    let request = responder.await.unwrap();

    for result in provider.force_flush() {
        result.unwrap();
    }
    let spans = exporter.get_finished_spans().unwrap();

    let response_span = spans
        .iter()
        .find(|span| span.name == "correlation.response")
        .expect("correlation.response span exported");
    assert_eq!(
        response_span.span_context.trace_id(),
        TraceId::from_hex(PROCESSOR_TRACE_ID).unwrap()
    );
    assert_eq!(
        response_span.parent_span_id,
        SpanId::from_hex(PROCESSOR_SPAN_ID).unwrap()
    );

    // the request went out under the call span
    let call_span = spans
        .iter()
        .find(|span| span.name == "correlation.call")
        .expect("correlation.call span exported");
    let traceparent = request.context.get("traceparent").expect("request traceparent");
    assert_eq!(
        traceparent,
        &format!(
            "00-{}-{}-01",
            call_span.span_context.trace_id(),
            call_span.span_context.span_id()
        )
    );
}
