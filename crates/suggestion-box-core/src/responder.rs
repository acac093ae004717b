use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::channel::{ContextId, InboundMessage, MessageSink};
use crate::config::HandshakeConfig;
use crate::identity::IdentityExtractor;
use crate::protocol::{CompositeIdentity, HandshakeMessage, MessageKind};
use crate::scheduler::{Scheduler, TimerId};

/// Finished cycles kept for inspection. The earliest finished are dropped
/// first; polling cycles are never dropped.
pub const RETAINED_FINISHED_CYCLES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CycleId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    Resolved,
    TimedOut,
}

impl CycleOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum CyclePhase {
    Polling,
    /// Terminal. `delivered` is false when the target context was gone.
    Delivered {
        outcome: CycleOutcome,
        delivered: bool,
    },
    /// Terminal. Cancelled before any message was sent.
    Abandoned,
}

/// Aggregate state of the responder across all cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponderState {
    Idle,
    Polling,
    Delivered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSnapshot {
    pub id: CycleId,
    pub target: ContextId,
    pub phase: CyclePhase,
    pub attempts: u32,
    pub started_at_ms: u64,
    pub finished_at_ms: Option<u64>,
    pub message: Option<CompositeIdentity>,
}

struct Cycle {
    id: CycleId,
    target: ContextId,
    phase: CyclePhase,
    attempts: u32,
    started_at_ms: u64,
    finished_at_ms: Option<u64>,
    timer: Option<TimerId>,
    message: Option<CompositeIdentity>,
}

impl Cycle {
    fn snapshot(&self) -> CycleSnapshot {
        CycleSnapshot {
            id: self.id,
            target: self.target.clone(),
            phase: self.phase,
            attempts: self.attempts,
            started_at_ms: self.started_at_ms,
            finished_at_ms: self.finished_at_ms,
            message: self.message.clone(),
        }
    }
}

struct ResponderInner {
    extractor: IdentityExtractor,
    sink: Rc<dyn MessageSink>,
    scheduler: Rc<dyn Scheduler>,
    poll_interval: Duration,
    timeout_ms: u64,
    cycles: RefCell<Vec<Cycle>>,
    next_cycle: Cell<u64>,
}

/// Host side of the handshake.
///
/// Each readiness signal starts an independent polling cycle addressed to the
/// context that sent it. A cycle re-reads host storage immediately and then
/// on every poll interval until the identity is complete or the timeout
/// elapses, and then sends exactly one identity message.
#[derive(Clone)]
pub struct HandshakeResponder {
    inner: Rc<ResponderInner>,
}

impl HandshakeResponder {
    pub fn new(
        extractor: IdentityExtractor,
        sink: Rc<dyn MessageSink>,
        scheduler: Rc<dyn Scheduler>,
        config: &HandshakeConfig,
    ) -> Self {
        Self {
            inner: Rc::new(ResponderInner {
                extractor,
                sink,
                scheduler,
                poll_interval: config.poll_interval(),
                timeout_ms: config.responder_timeout_ms,
                cycles: RefCell::new(Vec::new()),
                next_cycle: Cell::new(1),
            }),
        }
    }

    /// Entry point for every message the host window receives. Anything but
    /// a readiness signal is ignored.
    pub fn handle_message(&self, message: &InboundMessage) -> Option<CycleId> {
        if message.accept(MessageKind::Ready).is_some() {
            return Some(self.begin_cycle(message.source.clone()));
        }
        debug!(source = %message.source, "ignoring message without readiness discriminator");
        None
    }

    pub fn begin_cycle(&self, target: ContextId) -> CycleId {
        let inner = &self.inner;
        let id = CycleId(inner.next_cycle.get());
        inner.next_cycle.set(id.0 + 1);
        let started_at_ms = inner.scheduler.now_ms();

        inner.cycles.borrow_mut().push(Cycle {
            id,
            target: target.clone(),
            phase: CyclePhase::Polling,
            attempts: 0,
            started_at_ms,
            finished_at_ms: None,
            timer: None,
            message: None,
        });
        info!(cycle = id.0, target = %target, "handshake cycle started");

        inner.poll(id);
        if inner.phase_of(id) != Some(CyclePhase::Polling) {
            return id;
        }

        let weak: Weak<ResponderInner> = Rc::downgrade(inner);
        let timer = inner.scheduler.set_interval(
            inner.poll_interval,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.poll(id);
                }
            }),
        );
        if let Some(cycle) = inner.cycles.borrow_mut().iter_mut().find(|c| c.id == id) {
            cycle.timer = Some(timer);
        }
        id
    }

    #[must_use]
    pub fn cycle(&self, id: CycleId) -> Option<CycleSnapshot> {
        self.inner
            .cycles
            .borrow()
            .iter()
            .find(|cycle| cycle.id == id)
            .map(Cycle::snapshot)
    }

    #[must_use]
    pub fn cycles(&self) -> Vec<CycleSnapshot> {
        self.inner
            .cycles
            .borrow()
            .iter()
            .map(Cycle::snapshot)
            .collect()
    }

    #[must_use]
    pub fn active_cycles(&self) -> usize {
        self.inner
            .cycles
            .borrow()
            .iter()
            .filter(|cycle| cycle.phase == CyclePhase::Polling)
            .count()
    }

    #[must_use]
    pub fn state(&self) -> ResponderState {
        let cycles = self.inner.cycles.borrow();
        if cycles.is_empty() {
            ResponderState::Idle
        } else if cycles.iter().any(|cycle| cycle.phase == CyclePhase::Polling) {
            ResponderState::Polling
        } else {
            ResponderState::Delivered
        }
    }

    /// Stops a polling cycle without sending anything.
    pub fn abandon(&self, id: CycleId) -> bool {
        let timer = {
            let mut cycles = self.inner.cycles.borrow_mut();
            let Some(cycle) = cycles
                .iter_mut()
                .find(|cycle| cycle.id == id && cycle.phase == CyclePhase::Polling)
            else {
                return false;
            };
            cycle.phase = CyclePhase::Abandoned;
            cycle.finished_at_ms = Some(self.inner.scheduler.now_ms());
            cycle.timer.take()
        };
        if let Some(timer) = timer {
            self.inner.scheduler.cancel(timer);
        }
        self.inner.prune_finished();
        info!(cycle = id.0, "handshake cycle abandoned");
        true
    }

    /// Abandons every polling cycle addressed to `target`, e.g. when its
    /// frame is removed from the page.
    pub fn abandon_target(&self, target: &ContextId) -> usize {
        let ids = self
            .inner
            .cycles
            .borrow()
            .iter()
            .filter(|cycle| &cycle.target == target && cycle.phase == CyclePhase::Polling)
            .map(|cycle| cycle.id)
            .collect::<Vec<_>>();
        ids.into_iter().filter(|id| self.abandon(*id)).count()
    }
}

impl ResponderInner {
    fn phase_of(&self, id: CycleId) -> Option<CyclePhase> {
        self.cycles
            .borrow()
            .iter()
            .find(|cycle| cycle.id == id)
            .map(|cycle| cycle.phase)
    }

    fn prune_finished(&self) {
        let mut cycles = self.cycles.borrow_mut();
        let mut finished = cycles
            .iter()
            .filter(|cycle| cycle.phase != CyclePhase::Polling)
            .map(|cycle| (cycle.finished_at_ms.unwrap_or_default(), cycle.id))
            .collect::<Vec<_>>();
        if finished.len() <= RETAINED_FINISHED_CYCLES {
            return;
        }
        finished.sort_unstable();
        let excess = finished.len() - RETAINED_FINISHED_CYCLES;
        let dropped = finished[..excess]
            .iter()
            .map(|(_, id)| *id)
            .collect::<HashSet<_>>();
        cycles.retain(|cycle| !dropped.contains(&cycle.id));
    }

    fn poll(&self, id: CycleId) {
        let (attempt, started_at_ms) = {
            let mut cycles = self.cycles.borrow_mut();
            let Some(cycle) = cycles.iter_mut().find(|cycle| cycle.id == id) else {
                return;
            };
            if cycle.phase != CyclePhase::Polling {
                return;
            }
            cycle.attempts += 1;
            (cycle.attempts, cycle.started_at_ms)
        };

        let user = self.extractor.extract_user();
        let store = self.extractor.extract_store();
        let message = CompositeIdentity::assemble(&user.identity, &store.identity);
        let elapsed_ms = self.scheduler.now_ms().saturating_sub(started_at_ms);
        debug!(
            cycle = id.0,
            attempt,
            elapsed_ms,
            user_record = user.source.as_str(),
            store_record = store.source.as_str(),
            complete = message.is_complete(),
            "handshake poll attempt"
        );

        if message.is_complete() {
            self.finish(id, CycleOutcome::Resolved, message);
        } else if elapsed_ms >= self.timeout_ms {
            self.finish(id, CycleOutcome::TimedOut, message);
        }
    }

    fn finish(&self, id: CycleId, outcome: CycleOutcome, message: CompositeIdentity) {
        let now_ms = self.scheduler.now_ms();
        let (target, timer) = {
            let mut cycles = self.cycles.borrow_mut();
            let Some(cycle) = cycles.iter_mut().find(|cycle| cycle.id == id) else {
                return;
            };
            cycle.phase = CyclePhase::Delivered {
                outcome,
                delivered: false,
            };
            cycle.finished_at_ms = Some(now_ms);
            cycle.message = Some(message.clone());
            (cycle.target.clone(), cycle.timer.take())
        };
        if let Some(timer) = timer {
            self.scheduler.cancel(timer);
        }

        let delivered = match self.sink.send(&target, &HandshakeMessage::Init(message)) {
            Ok(()) => true,
            Err(error) => {
                warn!(cycle = id.0, target = %target, error = %error, "identity delivery failed");
                false
            }
        };
        if let Some(cycle) = self.cycles.borrow_mut().iter_mut().find(|c| c.id == id) {
            cycle.phase = CyclePhase::Delivered { outcome, delivered };
        }
        self.prune_finished();

        match outcome {
            CycleOutcome::Resolved => info!(
                cycle = id.0,
                target = %target,
                outcome = outcome.as_str(),
                delivered,
                "handshake identity sent"
            ),
            CycleOutcome::TimedOut => warn!(
                cycle = id.0,
                target = %target,
                outcome = outcome.as_str(),
                delivered,
                "handshake timed out; sent partial identity"
            ),
        }
    }
}

impl Drop for ResponderInner {
    fn drop(&mut self) {
        for cycle in self.cycles.get_mut().iter_mut() {
            if let Some(timer) = cycle.timer.take() {
                self.scheduler.cancel(timer);
            }
        }
    }
}
