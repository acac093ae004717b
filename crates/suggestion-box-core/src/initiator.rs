use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::channel::{ContextId, InboundMessage, MessageSink};
use crate::config::HandshakeConfig;
use crate::protocol::{CompositeIdentity, HandshakeMessage, MessageKind};
use crate::scheduler::{Scheduler, TimerId};

pub const FALLBACK_ACCOUNT_PREFIX: &str = "fallback_account_";
pub const FALLBACK_VISITOR_PREFIX: &str = "fallback_visitor_";

/// Identity state of the embedded form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Pending,
    Resolved { identity: CompositeIdentity },
    Fallback { identity: CompositeIdentity },
}

impl Resolution {
    #[must_use]
    pub fn identity(&self) -> Option<&CompositeIdentity> {
        match self {
            Self::Pending => None,
            Self::Resolved { identity } | Self::Fallback { identity } => Some(identity),
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    #[must_use]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    /// Whether the form may be submitted with this identity.
    #[must_use]
    pub fn is_ready_to_submit(&self, allow_fallback: bool) -> bool {
        match self {
            Self::Pending => false,
            Self::Resolved { .. } => true,
            Self::Fallback { .. } => allow_fallback,
        }
    }

    #[must_use]
    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved { .. } => "connected",
            Self::Fallback { .. } => "fallback",
        }
    }
}

/// Result of feeding one inbound message to the initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    Ignored,
    Adopted,
    /// An identity was already adopted; the message was dropped.
    Duplicate,
    /// Arrived after the fallback deadline; recorded but not adopted.
    Late,
}

/// Placeholder identity adopted when the host never answers. Both ids carry
/// the clock reading so separate sessions stay distinguishable.
#[must_use]
pub fn placeholder_identity(now_ms: u64) -> CompositeIdentity {
    let visitor_id = format!("{FALLBACK_VISITOR_PREFIX}{now_ms}");
    CompositeIdentity {
        account_id: format!("{FALLBACK_ACCOUNT_PREFIX}{now_ms}"),
        store_id: visitor_id.clone(),
        visitor_id,
        ..CompositeIdentity::default()
    }
}

type ResolutionListener = Box<dyn FnOnce(&Resolution)>;

struct InitiatorState {
    announced: bool,
    shut_down: bool,
    fallback_timer: Option<TimerId>,
    resolution: Resolution,
    late_messages: Vec<CompositeIdentity>,
}

struct InitiatorInner {
    sink: Rc<dyn MessageSink>,
    scheduler: Rc<dyn Scheduler>,
    parent: ContextId,
    fallback_after: Duration,
    state: RefCell<InitiatorState>,
    listeners: RefCell<Vec<ResolutionListener>>,
}

/// Embedded-form side of the handshake.
#[derive(Clone)]
pub struct HandshakeInitiator {
    inner: Rc<InitiatorInner>,
}

impl HandshakeInitiator {
    pub fn new(
        sink: Rc<dyn MessageSink>,
        scheduler: Rc<dyn Scheduler>,
        parent: ContextId,
        config: &HandshakeConfig,
    ) -> Self {
        Self {
            inner: Rc::new(InitiatorInner {
                sink,
                scheduler,
                parent,
                fallback_after: config.fallback_timeout(),
                state: RefCell::new(InitiatorState {
                    announced: false,
                    shut_down: false,
                    fallback_timer: None,
                    resolution: Resolution::Pending,
                    late_messages: Vec::new(),
                }),
                listeners: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Announces readiness to the parent context and arms the fallback
    /// deadline. Only the first call has any effect.
    pub fn start(&self) -> bool {
        let inner = &self.inner;
        {
            let mut state = inner.state.borrow_mut();
            if state.announced || state.shut_down {
                debug!(parent = %inner.parent, "initiator already started");
                return false;
            }
            state.announced = true;
        }

        match inner.sink.send(&inner.parent, &HandshakeMessage::Ready) {
            Ok(()) => info!(parent = %inner.parent, "readiness signal sent"),
            Err(error) => warn!(
                parent = %inner.parent,
                error = %error,
                "readiness signal could not be sent; waiting for fallback"
            ),
        }

        if inner.state.borrow().resolution.is_complete() {
            return true;
        }
        let weak: Weak<InitiatorInner> = Rc::downgrade(inner);
        let timer = inner.scheduler.set_timeout(
            inner.fallback_after,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.fire_fallback();
                }
            }),
        );
        inner.state.borrow_mut().fallback_timer = Some(timer);
        true
    }

    pub fn handle_message(&self, message: &InboundMessage) -> MessageDisposition {
        let inner = &self.inner;
        let Some(HandshakeMessage::Init(identity)) = message.accept(MessageKind::Init) else {
            debug!(
                source = %message.source,
                "ignoring message without identity discriminator"
            );
            return MessageDisposition::Ignored;
        };

        let timer = {
            let mut guard = inner.state.borrow_mut();
            let state = &mut *guard;
            if state.shut_down {
                return MessageDisposition::Ignored;
            }
            match &state.resolution {
                Resolution::Pending => {
                    state.resolution = Resolution::Resolved { identity };
                    state.fallback_timer.take()
                }
                Resolution::Resolved { .. } => {
                    debug!(
                        source = %message.source,
                        "identity already adopted; dropping duplicate"
                    );
                    return MessageDisposition::Duplicate;
                }
                Resolution::Fallback { .. } => {
                    info!(
                        source = %message.source,
                        account_id = %identity.account_id,
                        "identity arrived after fallback; keeping placeholder"
                    );
                    state.late_messages.push(identity);
                    return MessageDisposition::Late;
                }
            }
        };
        if let Some(timer) = timer {
            inner.scheduler.cancel(timer);
        }
        info!(source = %message.source, "identity adopted from host");
        inner.notify();
        MessageDisposition::Adopted
    }

    #[must_use]
    pub fn resolution(&self) -> Resolution {
        self.inner.state.borrow().resolution.clone()
    }

    #[must_use]
    pub fn late_messages(&self) -> Vec<CompositeIdentity> {
        self.inner.state.borrow().late_messages.clone()
    }

    #[must_use]
    pub fn fallback_pending(&self) -> bool {
        self.inner.state.borrow().fallback_timer.is_some()
    }

    /// Registers a callback for the single transition out of `Pending`.
    /// Runs immediately when the identity is already settled.
    pub fn on_resolved(&self, listener: impl FnOnce(&Resolution) + 'static) {
        let resolution = self.resolution();
        if resolution.is_complete() {
            listener(&resolution);
        } else {
            self.inner.listeners.borrow_mut().push(Box::new(listener));
        }
    }

    /// Cancels the fallback deadline and stops accepting messages. Used when
    /// the form is torn down before the handshake settles.
    pub fn shutdown(&self) -> bool {
        let timer = {
            let mut state = self.inner.state.borrow_mut();
            state.shut_down = true;
            state.fallback_timer.take()
        };
        self.inner.listeners.borrow_mut().clear();
        match timer {
            Some(timer) => self.inner.scheduler.cancel(timer),
            None => false,
        }
    }
}

impl InitiatorInner {
    fn fire_fallback(&self) {
        {
            let mut state = self.state.borrow_mut();
            state.fallback_timer = None;
            if state.shut_down || state.resolution.is_complete() {
                return;
            }
            state.resolution = Resolution::Fallback {
                identity: placeholder_identity(self.scheduler.now_ms()),
            };
        }
        warn!(
            parent = %self.parent,
            fallback_after_ms = self.fallback_after.as_millis() as u64,
            "no identity from host; using placeholder identity"
        );
        self.notify();
    }

    fn notify(&self) {
        let listeners = std::mem::take(&mut *self.listeners.borrow_mut());
        let resolution = self.state.borrow().resolution.clone();
        for listener in listeners {
            listener(&resolution);
        }
    }
}

impl Drop for InitiatorInner {
    fn drop(&mut self) {
        if let Some(timer) = self.state.get_mut().fallback_timer.take() {
            self.scheduler.cancel(timer);
        }
    }
}
