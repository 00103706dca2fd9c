/// Wire schema for the request/response topics
///
/// Both topics carry JSON envelopes. A request names an operation on a car
/// document by its domain id; a response echoes the id and the correlation id
/// of the request it answers. Trace context travels in `context` and, on
/// Kafka, in message headers as well.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub mod car;

pub use car::{Car, CarFields, CarPatch};

/// Default topic for requests published by the gateway
pub const REQUEST_TOPIC: &str = "data_requests";
/// Default topic for responses published by the data processor
pub const RESPONSE_TOPIC: &str = "data_responses";

/// Flat string map carrying a serialized trace context
pub type ContextMap = HashMap<String, String>;

/// CRUD operation requested from the data processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Get,
    Put,
    Patch,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Get => "GET",
            Operation::Put => "PUT",
            Operation::Patch => "PATCH",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message published on the request topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(rename = "type")]
    pub operation: Operation,
    /// Domain id of the car
    pub id: i64,
    pub correlation_id: String,
    /// Operation payload: `CarFields` for PUT, `CarPatch` for PATCH
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub context: ContextMap,
}

impl RequestEnvelope {
    pub fn new(operation: Operation, id: i64, correlation_id: impl Into<String>) -> Self {
        Self {
            operation,
            id,
            correlation_id: correlation_id.into(),
            data: None,
            context: ContextMap::new(),
        }
    }

    pub fn with_context(mut self, context: ContextMap) -> Self {
        self.context = context;
        self
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Deletion acknowledgement marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionStatus {
    Deleted,
}

/// Result carried by a response. An absent payload means "not found".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    Error { error: String },
    Deleted { status: DeletionStatus },
    Document(Car),
}

/// Message published on the response topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: i64,
    pub correlation_id: String,
    #[serde(default)]
    pub data: Option<ResponsePayload>,
    #[serde(default)]
    pub context: ContextMap,
}

impl ResponseEnvelope {
    fn reply(id: i64, correlation_id: &str, data: Option<ResponsePayload>) -> Self {
        Self {
            id,
            correlation_id: correlation_id.to_string(),
            data,
            context: ContextMap::new(),
        }
    }

    pub fn found(id: i64, correlation_id: &str, car: Car) -> Self {
        Self::reply(id, correlation_id, Some(ResponsePayload::Document(car)))
    }

    pub fn not_found(id: i64, correlation_id: &str) -> Self {
        Self::reply(id, correlation_id, None)
    }

    pub fn deleted(id: i64, correlation_id: &str) -> Self {
        Self::reply(
            id,
            correlation_id,
            Some(ResponsePayload::Deleted {
                status: DeletionStatus::Deleted,
            }),
        )
    }

    pub fn error(id: i64, correlation_id: &str, detail: impl Into<String>) -> Self {
        Self::reply(
            id,
            correlation_id,
            Some(ResponsePayload::Error {
                error: detail.into(),
            }),
        )
    }

    pub fn with_context(mut self, context: ContextMap) -> Self {
        self.context = context;
        self
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// The addressing part of a request, readable even when the rest is malformed
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnvelopeAddress {
    pub id: i64,
    pub correlation_id: String,
}

impl EnvelopeAddress {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let mut request = RequestEnvelope::new(Operation::Patch, 7, "c-1");
        request.data = Some(json!({ "price": 20 }));

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "PATCH");
        assert_eq!(value["id"], 7);
        assert_eq!(value["correlation_id"], "c-1");
        assert_eq!(value["data"]["price"], 20);
    }

    #[test]
    fn test_request_without_data_or_context() {
        let request: RequestEnvelope =
            serde_json::from_value(json!({ "type": "GET", "id": 3, "correlation_id": "x" }))
                .unwrap();
        assert_eq!(request.operation, Operation::Get);
        assert!(request.data.is_none());
        assert!(request.context.is_empty());
    }

    #[test]
    fn test_response_payload_variants() {
        let doc: ResponsePayload = serde_json::from_value(
            json!({ "_id": 1, "name": "A", "price": 10, "year": "2020" }),
        )
        .unwrap();
        assert!(matches!(doc, ResponsePayload::Document(ref car) if car.id == 1));

        let deleted: ResponsePayload =
            serde_json::from_value(json!({ "status": "deleted" })).unwrap();
        assert_eq!(
            deleted,
            ResponsePayload::Deleted {
                status: DeletionStatus::Deleted
            }
        );

        let error: ResponsePayload =
            serde_json::from_value(json!({ "error": "bad payload" })).unwrap();
        assert_eq!(
            error,
            ResponsePayload::Error {
                error: "bad payload".to_string()
            }
        );
    }

    #[test]
    fn test_not_found_serializes_null_data() {
        let response = ResponseEnvelope::not_found(9999, "c-2");
        let value = serde_json::to_value(&response).unwrap();
        assert!(value["data"].is_null());
    }

    #[test]
    fn test_address_survives_malformed_payload() {
        let raw = br#"{"type":"FROB","id":5,"correlation_id":"c-3","data":null}"#;
        assert!(RequestEnvelope::from_slice(raw).is_err());

        let address = EnvelopeAddress::from_slice(raw).unwrap();
        assert_eq!(address.id, 5);
        assert_eq!(address.correlation_id, "c-3");
    }
}
