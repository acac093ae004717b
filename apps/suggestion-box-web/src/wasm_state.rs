use std::rc::Rc;

use suggestion_box_core::persistence::RecordStoreConfig;
use suggestion_box_core::{
    ContextId, HandshakeConfig, HandshakeInitiator, HandshakeResponder, InMemorySuggestionStore,
};

use crate::embed::FrameIds;

#[derive(Default)]
pub(crate) struct HostRuntime {
    pub(crate) responder: Option<HandshakeResponder>,
    pub(crate) form_url: String,
    pub(crate) frame_ids: FrameIds,
    pub(crate) open_frame: Option<ContextId>,
}

#[derive(Default)]
pub(crate) struct EmbeddedRuntime {
    pub(crate) initiator: Option<HandshakeInitiator>,
    pub(crate) config: HandshakeConfig,
    pub(crate) record_store: Option<RecordStoreConfig>,
    /// Used when no record store is configured. Lives for the page.
    pub(crate) offline_store: Rc<InMemorySuggestionStore>,
}
