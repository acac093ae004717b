//! Identity resolution and the parent/iframe handshake for the embedded
//! suggestion box.
//!
//! The host page runs a [`responder::HandshakeResponder`] that answers the
//! iframe's readiness signal with identity data read from its storage; the
//! iframe runs a [`initiator::HandshakeInitiator`] that announces itself and
//! falls back to placeholder identity when the host stays silent.

#![cfg_attr(test, allow(clippy::expect_used))]

pub mod channel;
pub mod config;
pub mod identity;
pub mod initiator;
pub mod persistence;
pub mod protocol;
pub mod relay;
pub mod responder;
pub mod scheduler;
pub mod storage;
pub mod submission;

pub use channel::{ContextId, DeliveryError, InMemoryBus, InboundMessage, MessageSink};
pub use config::{ConfigError, HandshakeConfig};
pub use identity::{IdentityExtractor, StoreIdentity, UserIdentity};
pub use initiator::{HandshakeInitiator, MessageDisposition, Resolution};
pub use persistence::{InMemorySuggestionStore, RecordStoreConfig, StoreError, SuggestionStore};
pub use protocol::{CompositeIdentity, HandshakeMessage, MessageKind};
pub use relay::{
    RelayConfig, RelayError, RelayOutcome, RelayPayload, WebhookRelay, WebhookTransport,
};
pub use responder::{
    CycleId, CycleOutcome, CyclePhase, CycleSnapshot, HandshakeResponder, RETAINED_FINISHED_CYCLES,
};
pub use scheduler::{Scheduler, TimerId, VirtualScheduler};
pub use storage::{KeyValueStorage, MemoryStorage, StorageError};
pub use submission::{
    SubmissionReceipt, SubmitError, SuggestionCategory, SuggestionDraft, SuggestionSubmitter,
    ValidationError,
};
