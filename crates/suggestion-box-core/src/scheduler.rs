use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TimerId(pub u64);

/// Timer source driving the handshake. Both sides are single-threaded and
/// event driven; callbacks run on the same thread that scheduled them.
pub trait Scheduler {
    /// Milliseconds on the scheduler's clock. Only differences between two
    /// readings are meaningful, except for wall-clock backed schedulers.
    fn now_ms(&self) -> u64;

    fn set_interval(&self, period: Duration, callback: Box<dyn FnMut()>) -> TimerId;

    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId;

    /// Cancels a pending timer. Returns `false` when the timer already fired
    /// (for timeouts), was already cancelled, or never existed.
    fn cancel(&self, timer: TimerId) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("timer step limit {limit} exceeded while advancing to {target_ms}ms")]
    StepLimitExceeded { limit: usize, target_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingTimer {
    pub id: TimerId,
    pub due_at_ms: u64,
    pub interval_ms: Option<u64>,
}

enum TimerCallback {
    Once(Box<dyn FnOnce()>),
    Repeat(Box<dyn FnMut()>),
}

struct ScheduledTimer {
    id: TimerId,
    due_at_ms: u64,
    order: u64,
    interval_ms: Option<u64>,
    callback: TimerCallback,
}

#[derive(Default)]
struct VirtualClock {
    now_ms: u64,
    next_id: u64,
    next_order: u64,
    queue: Vec<ScheduledTimer>,
    running: Option<TimerId>,
    running_cancelled: bool,
    fired: u64,
}

impl VirtualClock {
    fn push(
        &mut self,
        delay_ms: u64,
        interval_ms: Option<u64>,
        callback: TimerCallback,
    ) -> TimerId {
        self.next_id += 1;
        self.next_order += 1;
        let id = TimerId(self.next_id);
        self.queue.push(ScheduledTimer {
            id,
            due_at_ms: self.now_ms.saturating_add(delay_ms),
            order: self.next_order,
            interval_ms,
            callback,
        });
        id
    }

    fn take_next_due(&mut self, limit_ms: u64) -> Option<ScheduledTimer> {
        let index = self
            .queue
            .iter()
            .enumerate()
            .filter(|(_, timer)| timer.due_at_ms <= limit_ms)
            .min_by_key(|(_, timer)| (timer.due_at_ms, timer.order))
            .map(|(index, _)| index)?;
        Some(self.queue.swap_remove(index))
    }
}

/// Deterministic scheduler with a manually advanced clock.
///
/// Timers fire in `(due time, scheduling order)` order. Callbacks may
/// schedule or cancel timers, including the one currently running.
#[derive(Clone)]
pub struct VirtualScheduler {
    clock: Rc<RefCell<VirtualClock>>,
    step_limit: usize,
}

pub const DEFAULT_TIMER_STEP_LIMIT: usize = 10_000;

impl Default for VirtualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: Rc::new(RefCell::new(VirtualClock::default())),
            step_limit: DEFAULT_TIMER_STEP_LIMIT,
        }
    }

    #[must_use]
    pub fn with_step_limit(mut self, step_limit: usize) -> Self {
        self.step_limit = step_limit.max(1);
        self
    }

    /// Moves the clock forward by `delta`, running every timer that comes due
    /// on the way. Returns the number of callbacks run.
    pub fn advance(&self, delta: Duration) -> Result<usize, SchedulerError> {
        let target_ms = self
            .clock
            .borrow()
            .now_ms
            .saturating_add(delta.as_millis() as u64);
        self.advance_to(target_ms)
    }

    pub fn advance_to(&self, target_ms: u64) -> Result<usize, SchedulerError> {
        let mut ran = 0usize;
        loop {
            let next = self.clock.borrow_mut().take_next_due(target_ms);
            let Some(timer) = next else {
                break;
            };
            if ran >= self.step_limit {
                self.clock.borrow_mut().queue.push(timer);
                return Err(SchedulerError::StepLimitExceeded {
                    limit: self.step_limit,
                    target_ms,
                });
            }
            self.run_timer(timer);
            ran += 1;
        }
        let mut clock = self.clock.borrow_mut();
        clock.now_ms = clock.now_ms.max(target_ms);
        Ok(ran)
    }

    fn run_timer(&self, timer: ScheduledTimer) {
        let ScheduledTimer {
            id,
            due_at_ms,
            interval_ms,
            callback,
            ..
        } = timer;
        {
            let mut clock = self.clock.borrow_mut();
            clock.now_ms = clock.now_ms.max(due_at_ms);
            clock.running = Some(id);
            clock.running_cancelled = false;
            clock.fired += 1;
        }

        let callback = match callback {
            TimerCallback::Once(callback) => {
                callback();
                None
            }
            TimerCallback::Repeat(mut callback) => {
                callback();
                Some(callback)
            }
        };

        let mut clock = self.clock.borrow_mut();
        let cancelled = clock.running_cancelled;
        clock.running = None;
        clock.running_cancelled = false;
        if let (Some(callback), Some(period), false) = (callback, interval_ms, cancelled) {
            clock.next_order += 1;
            let order = clock.next_order;
            clock.queue.push(ScheduledTimer {
                id,
                due_at_ms: due_at_ms.saturating_add(period),
                order,
                interval_ms,
                callback: TimerCallback::Repeat(callback),
            });
        }
    }

    #[must_use]
    pub fn pending_timers(&self) -> Vec<PendingTimer> {
        let clock = self.clock.borrow();
        let mut timers = clock
            .queue
            .iter()
            .map(|timer| (timer.due_at_ms, timer.order, timer))
            .collect::<Vec<_>>();
        timers.sort_by_key(|(due_at_ms, order, _)| (*due_at_ms, *order));
        timers
            .into_iter()
            .map(|(_, _, timer)| PendingTimer {
                id: timer.id,
                due_at_ms: timer.due_at_ms,
                interval_ms: timer.interval_ms,
            })
            .collect()
    }

    #[must_use]
    pub fn fired_count(&self) -> u64 {
        self.clock.borrow().fired
    }
}

impl Scheduler for VirtualScheduler {
    fn now_ms(&self) -> u64 {
        self.clock.borrow().now_ms
    }

    fn set_interval(&self, period: Duration, callback: Box<dyn FnMut()>) -> TimerId {
        let period_ms = (period.as_millis() as u64).max(1);
        let mut clock = self.clock.borrow_mut();
        clock.push(period_ms, Some(period_ms), TimerCallback::Repeat(callback))
    }

    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId {
        let delay_ms = delay.as_millis() as u64;
        let mut clock = self.clock.borrow_mut();
        clock.push(delay_ms, None, TimerCallback::Once(callback))
    }

    fn cancel(&self, timer: TimerId) -> bool {
        let mut clock = self.clock.borrow_mut();
        if let Some(index) = clock.queue.iter().position(|pending| pending.id == timer) {
            clock.queue.swap_remove(index);
            return true;
        }
        if clock.running == Some(timer) && !clock.running_cancelled {
            clock.running_cancelled = true;
            return true;
        }
        false
    }
}
