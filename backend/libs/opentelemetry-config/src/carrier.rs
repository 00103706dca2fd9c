//! W3C trace context carrier for message envelopes and broker headers
//!
//! A `TraceCarrier` is a flat string map holding `traceparent` and, when
//! present, `tracestate`. It is written into both the envelope `context`
//! field and the message headers; on receipt the headers win.

use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{TraceContextExt, TraceId};
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub const TRACEPARENT: &str = "traceparent";
pub const TRACESTATE: &str = "tracestate";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceCarrier(HashMap<String, String>);

impl TraceCarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the trace keys from an arbitrary header map
    pub fn from_headers(headers: &HashMap<String, String>) -> Self {
        let fields = [TRACEPARENT, TRACESTATE]
            .iter()
            .filter_map(|key| headers.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect();
        Self(fields)
    }

    /// Use `self` when it carries a parent, else `fallback`
    pub fn or(self, fallback: TraceCarrier) -> TraceCarrier {
        if self.has_parent() {
            self
        } else {
            fallback
        }
    }

    pub fn has_parent(&self) -> bool {
        self.0.contains_key(TRACEPARENT)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn into_inner(self) -> HashMap<String, String> {
        self.0
    }
}

impl From<HashMap<String, String>> for TraceCarrier {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

impl From<TraceCarrier> for HashMap<String, String> {
    fn from(carrier: TraceCarrier) -> Self {
        carrier.0
    }
}

impl Injector for TraceCarrier {
    /// Empty values (an empty `tracestate`) are not written
    fn set(&mut self, key: &str, value: String) {
        if !value.is_empty() {
            self.0.insert(key.to_owned(), value);
        }
    }
}

impl Extractor for TraceCarrier {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

/// Serialize the span context of `cx`. An empty context yields an empty carrier.
pub fn encode(cx: &Context) -> TraceCarrier {
    let mut carrier = TraceCarrier::new();
    TraceContextPropagator::new().inject_context(cx, &mut carrier);
    carrier
}

/// Rebuild a remote parent context. Missing or malformed entries give an empty context.
pub fn decode(carrier: &TraceCarrier) -> Context {
    TraceContextPropagator::new().extract_with_context(&Context::new(), carrier)
}

/// Carrier for the current `tracing` span
pub fn current() -> TraceCarrier {
    encode(&tracing::Span::current().context())
}

/// Parent `span` on the context held in `carrier`, if any
pub fn attach_parent(span: &tracing::Span, carrier: &TraceCarrier) {
    if carrier.has_parent() {
        span.set_parent(decode(carrier));
    }
}

/// Trace id of `span`, when it belongs to a valid trace
pub fn trace_id_of(span: &tracing::Span) -> Option<TraceId> {
    let cx = span.context();
    let span_context = cx.span().span_context().clone();
    span_context.is_valid().then(|| span_context.trace_id())
}

/// Fill the `trace_id` field of `span` so its log lines can be joined with the trace.
/// Call after [`attach_parent`]; the span must declare `trace_id = Empty`.
pub fn record_trace_id(span: &tracing::Span) {
    if let Some(trace_id) = trace_id_of(span) {
        span.record("trace_id", tracing::field::display(trace_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{SpanContext, SpanId, TraceFlags, TraceState, TracerProvider as _};
    use tracing_subscriber::layer::SubscriberExt;

    const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
    const SPAN_ID: &str = "00f067aa0ba902b7";

    fn remote_context() -> Context {
        remote_context_with_state(TraceState::default())
    }

    fn remote_context_with_state(state: TraceState) -> Context {
        let span_context = SpanContext::new(
            TraceId::from_hex(TRACE_ID).unwrap(),
            SpanId::from_hex(SPAN_ID).unwrap(),
            TraceFlags::SAMPLED,
            true,
            state,
        );
        Context::new().with_remote_span_context(span_context)
    }

    #[test]
    fn test_encode_writes_traceparent() {
        let carrier = encode(&remote_context());
        assert_eq!(
            carrier.get(TRACEPARENT),
            Some(format!("00-{TRACE_ID}-{SPAN_ID}-01").as_str())
        );
    }

    #[test]
    fn test_tracestate_only_written_when_present() {
        let carrier = encode(&remote_context());
        assert!(carrier.get(TRACESTATE).is_none());
        assert_eq!(carrier.iter().count(), 1);

        let state = TraceState::from_key_value([("vendor", "v1")]).unwrap();
        let carrier = encode(&remote_context_with_state(state));
        assert_eq!(carrier.get(TRACESTATE), Some("vendor=v1"));
    }

    #[test]
    fn test_trace_id_follows_attached_parent() {
        let provider = opentelemetry_sdk::trace::TracerProvider::builder().build();
        let subscriber = tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("carrier-test")));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("consume", trace_id = tracing::field::Empty);
            attach_parent(&span, &encode(&remote_context()));
            record_trace_id(&span);

            assert_eq!(trace_id_of(&span), Some(TraceId::from_hex(TRACE_ID).unwrap()));

            let outgoing = span.in_scope(current);
            let traceparent = outgoing.get(TRACEPARENT).unwrap();
            assert!(traceparent.contains(TRACE_ID));
            assert!(!traceparent.contains(SPAN_ID));
        });
    }

    #[test]
    fn test_no_trace_id_without_otel_layer() {
        let span = tracing::info_span!("plain", trace_id = tracing::field::Empty);
        assert_eq!(trace_id_of(&span), None);
        record_trace_id(&span);
    }

    #[test]
    fn test_decode_restores_trace_and_span() {
        let carrier = encode(&remote_context());
        let cx = decode(&carrier);
        let span = cx.span();
        let restored = span.span_context();

        assert!(restored.is_valid());
        assert!(restored.is_remote());
        assert_eq!(restored.trace_id(), TraceId::from_hex(TRACE_ID).unwrap());
        assert_eq!(restored.span_id(), SpanId::from_hex(SPAN_ID).unwrap());
    }

    #[test]
    fn test_empty_context_round() {
        assert!(encode(&Context::new()).is_empty());
        assert!(!decode(&TraceCarrier::new()).span().span_context().is_valid());
    }

    #[test]
    fn test_malformed_traceparent_is_ignored() {
        let mut map = HashMap::new();
        map.insert(TRACEPARENT.to_string(), "not-a-trace".to_string());
        let cx = decode(&TraceCarrier::from(map));
        assert!(!cx.span().span_context().is_valid());
    }

    #[test]
    fn test_headers_preferred_over_envelope() {
        let mut headers = HashMap::new();
        headers.insert(TRACEPARENT.to_string(), "from-headers".to_string());
        headers.insert("content-type".to_string(), "json".to_string());
        let mut envelope = HashMap::new();
        envelope.insert(TRACEPARENT.to_string(), "from-envelope".to_string());

        let chosen = TraceCarrier::from_headers(&headers).or(envelope.clone().into());
        assert_eq!(chosen.get(TRACEPARENT), Some("from-headers"));
        assert!(chosen.get("content-type").is_none());

        let chosen = TraceCarrier::from_headers(&HashMap::new()).or(envelope.into());
        assert_eq!(chosen.get(TRACEPARENT), Some("from-envelope"));
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let carrier = encode(&remote_context());
        let value = serde_json::to_value(&carrier).unwrap();
        assert!(value[TRACEPARENT].is_string());
    }
}
