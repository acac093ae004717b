use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::{self, HandshakeMessage, MessageKind};

/// Identifies one browsing context: the host window or one embedded frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(String);

impl ContextId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw cross-context message as received, before discriminator filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub source: ContextId,
    pub data: Value,
}

impl InboundMessage {
    pub fn new(source: ContextId, data: Value) -> Self {
        Self { source, data }
    }

    /// Decodes the message if it carries the requested discriminator.
    #[must_use]
    pub fn accept(&self, kind: MessageKind) -> Option<HandshakeMessage> {
        protocol::accept(kind, &self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("target context {0} is gone")]
    TargetGone(ContextId),
    #[error("message could not be encoded: {0}")]
    Encode(String),
    #[error("delivery to {target} was rejected: {message}")]
    Rejected { target: ContextId, message: String },
}

/// Outbound half of a cross-context channel. Messages are addressed to one
/// specific context; there is no broadcast.
pub trait MessageSink {
    fn send(&self, target: &ContextId, message: &HandshakeMessage) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub source: ContextId,
    pub target: ContextId,
    pub data: Value,
}

#[derive(Debug, Default)]
struct BusState {
    pending: VecDeque<Envelope>,
    history: Vec<Envelope>,
    closed: HashSet<ContextId>,
}

/// Single-threaded message bus connecting simulated contexts.
///
/// Messages are serialized to JSON on send and queued until the receiving
/// side drains them, so the wire shape is exercised end to end.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBus {
    state: Rc<RefCell<BusState>>,
}

impl InMemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn endpoint(&self, source: ContextId) -> BusEndpoint {
        BusEndpoint {
            source,
            bus: self.clone(),
        }
    }

    /// Marks a context as destroyed; later sends to it fail.
    pub fn close(&self, context: &ContextId) {
        self.state.borrow_mut().closed.insert(context.clone());
    }

    /// Queues arbitrary traffic, e.g. messages from unrelated scripts.
    pub fn inject(&self, source: ContextId, target: ContextId, data: Value) {
        let envelope = Envelope {
            source,
            target,
            data,
        };
        let mut state = self.state.borrow_mut();
        state.history.push(envelope.clone());
        state.pending.push_back(envelope);
    }

    /// Removes and returns the queued messages addressed to `target`.
    pub fn drain_for(&self, target: &ContextId) -> Vec<InboundMessage> {
        let mut state = self.state.borrow_mut();
        let (matching, rest): (VecDeque<Envelope>, VecDeque<Envelope>) = state
            .pending
            .drain(..)
            .partition(|envelope| &envelope.target == target);
        state.pending = rest;
        matching
            .into_iter()
            .map(|envelope| InboundMessage::new(envelope.source, envelope.data))
            .collect()
    }

    /// Every message ever sent to `target`, drained or not.
    #[must_use]
    pub fn sent_to(&self, target: &ContextId) -> Vec<Value> {
        self.state
            .borrow()
            .history
            .iter()
            .filter(|envelope| &envelope.target == target)
            .map(|envelope| envelope.data.clone())
            .collect()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.state.borrow().pending.len()
    }
}

#[derive(Debug, Clone)]
pub struct BusEndpoint {
    source: ContextId,
    bus: InMemoryBus,
}

impl BusEndpoint {
    #[must_use]
    pub fn context(&self) -> &ContextId {
        &self.source
    }
}

impl MessageSink for BusEndpoint {
    fn send(&self, target: &ContextId, message: &HandshakeMessage) -> Result<(), DeliveryError> {
        if self.bus.state.borrow().closed.contains(target) {
            return Err(DeliveryError::TargetGone(target.clone()));
        }
        let data = serde_json::to_value(message)
            .map_err(|error| DeliveryError::Encode(error.to_string()))?;
        self.bus.inject(self.source.clone(), target.clone(), data);
        Ok(())
    }
}
