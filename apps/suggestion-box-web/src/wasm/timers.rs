use super::*;

    use std::collections::HashMap;
    use std::time::Duration;

    use gloo_timers::callback::{Interval, Timeout};
    use suggestion_box_core::{Scheduler, TimerId};

    // Held only for their drop, which clears the browser timer.
    enum BrowserTimer {
        Interval { _handle: Interval },
        Timeout { _handle: Timeout },
    }

    #[derive(Default)]
    struct TimerTable {
        next_id: u64,
        live: HashMap<TimerId, BrowserTimer>,
    }

    /// Scheduler over `setInterval`/`setTimeout`. The clock is wall time.
    ///
    /// Handles are dropped on a later microtask: a timer is often cancelled
    /// from inside its own callback, and dropping the handle there would free
    /// the closure that is still running.
    #[derive(Clone, Default)]
    pub(super) struct BrowserScheduler {
        table: Rc<RefCell<TimerTable>>,
    }

    impl BrowserScheduler {
        pub(super) fn new() -> Self {
            Self::default()
        }

        fn allocate(&self) -> TimerId {
            let mut table = self.table.borrow_mut();
            table.next_id += 1;
            TimerId(table.next_id)
        }
    }

    fn clamp_millis(duration: Duration) -> u32 {
        u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
    }

    fn release_later(timer: BrowserTimer) {
        // Microtasks run before the next timer task, so nothing fires between
        // the cancel and the clear.
        spawn_local(async move {
            drop(timer);
        });
    }

    impl Scheduler for BrowserScheduler {
        fn now_ms(&self) -> u64 {
            epoch_millis_now()
        }

        fn set_interval(&self, period: Duration, mut callback: Box<dyn FnMut()>) -> TimerId {
            let id = self.allocate();
            let interval = Interval::new(clamp_millis(period), move || callback());
            self.table
                .borrow_mut()
                .live
                .insert(id, BrowserTimer::Interval { _handle: interval });
            id
        }

        fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId {
            let id = self.allocate();
            let table = Rc::downgrade(&self.table);
            let timeout = Timeout::new(clamp_millis(delay), move || {
                let fired = table
                    .upgrade()
                    .and_then(|table| table.borrow_mut().live.remove(&id));
                if let Some(fired) = fired {
                    release_later(fired);
                }
                callback();
            });
            self.table
                .borrow_mut()
                .live
                .insert(id, BrowserTimer::Timeout { _handle: timeout });
            id
        }

        fn cancel(&self, timer: TimerId) -> bool {
            let removed = self.table.borrow_mut().live.remove(&timer);
            removed.map(release_later).is_some()
        }
    }
