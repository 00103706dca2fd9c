//! Waiting registry: correlation id → one-shot result slot
//!
//! Each registration gets a token, and the request carries
//! `<correlation id>#<token>` on the wire. A response only completes the
//! registration whose token it echoes, so a late answer to an earlier call
//! cannot land on a newer call that reuses the same correlation id.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use event_schema::ResponseEnvelope;
use opentelemetry_config::TraceCarrier;
use resilience::Deadline;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::CorrelationError;

/// What the response reader hands to a waiting call
#[derive(Debug)]
pub(crate) enum Delivered {
    Response {
        envelope: ResponseEnvelope,
        carrier: TraceCarrier,
    },
    ReaderFailed(String),
}

struct Waiter {
    token: u64,
    slot: oneshot::Sender<Delivered>,
}

const TOKEN_SEPARATOR: char = '#';

pub struct PendingCalls {
    waiters: DashMap<String, Waiter>,
    next_token: AtomicU64,
    closed: AtomicBool,
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingCalls {
    /// Tokens start at a random point so instances sharing a response topic
    /// do not hand out the same wire ids.
    pub fn new() -> Self {
        Self {
            waiters: DashMap::new(),
            next_token: AtomicU64::new(Uuid::new_v4().as_u64_pair().0),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a call before its request is published
    pub(crate) fn register(
        self: &Arc<Self>,
        correlation_id: &str,
        deadline: Deadline,
    ) -> Result<PendingCall, CorrelationError> {
        if self.is_closed() {
            return Err(CorrelationError::BrokerUnavailable(
                "response reader is not running".to_string(),
            ));
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (slot, receiver) = oneshot::channel();

        match self.waiters.entry(correlation_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(CorrelationError::DuplicateCorrelationId(
                    correlation_id.to_string(),
                ))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Waiter { token, slot });
            }
        }

        let pending = PendingCall {
            correlation_id: correlation_id.to_string(),
            deadline,
            token,
            receiver,
            registry: self.clone(),
        };

        // the reader may have shut down between the check above and the insert
        if self.is_closed() {
            return Err(CorrelationError::BrokerUnavailable(
                "response reader is not running".to_string(),
            ));
        }

        Ok(pending)
    }

    /// Hand a delivery to the call registered under `wire_id`. Returns false
    /// when nobody waits for it, including answers to an earlier registration.
    pub(crate) fn complete(&self, wire_id: &str, delivered: Delivered) -> bool {
        let Some((correlation_id, token)) = split_wire_id(wire_id) else {
            return false;
        };
        match self
            .waiters
            .remove_if(correlation_id, |_, waiter| waiter.token == token)
        {
            Some((_, waiter)) => waiter.slot.send(delivered).is_ok(),
            None => false,
        }
    }

    /// Refuse new calls and fail every waiting one
    pub(crate) fn close(&self, reason: &str) {
        self.closed.store(true, Ordering::SeqCst);

        let ids: Vec<String> = self.waiters.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, waiter)) = self.waiters.remove(&id) {
                let _ = waiter.slot.send(Delivered::ReaderFailed(reason.to_string()));
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.waiters.contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

fn split_wire_id(wire_id: &str) -> Option<(&str, u64)> {
    let (correlation_id, token) = wire_id.rsplit_once(TOKEN_SEPARATOR)?;
    Some((correlation_id, token.parse().ok()?))
}

/// A registered call. Dropping it removes its registry entry.
pub(crate) struct PendingCall {
    correlation_id: String,
    deadline: Deadline,
    token: u64,
    receiver: oneshot::Receiver<Delivered>,
    registry: Arc<PendingCalls>,
}

impl PendingCall {
    /// Correlation id to put on the request envelope
    pub(crate) fn wire_id(&self) -> String {
        format!("{}{}{}", self.correlation_id, TOKEN_SEPARATOR, self.token)
    }

    pub(crate) fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    pub(crate) async fn wait(&mut self) -> Result<(ResponseEnvelope, TraceCarrier), CorrelationError> {
        match self.deadline.run(&mut self.receiver).await {
            Err(_) => Err(CorrelationError::Timeout(self.deadline.budget())),
            Ok(Ok(Delivered::Response { envelope, carrier })) => Ok((envelope, carrier)),
            Ok(Ok(Delivered::ReaderFailed(reason))) => {
                Err(CorrelationError::BrokerUnavailable(reason))
            }
            Ok(Err(_)) => Err(CorrelationError::BrokerUnavailable(
                "response reader stopped".to_string(),
            )),
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        let token = self.token;
        self.registry
            .waiters
            .remove_if(&self.correlation_id, |_, waiter| waiter.token == token);
    }
}
