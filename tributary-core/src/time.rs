//! Timers
//!
//! Time enters the network the same way any other input does: through sinks
//! fired at the start of a transaction. A [`TimerSystem`] wraps a pluggable
//! clock ([`TimerSystemImpl`]) and exposes
//!
//! - a `time` cell, updated at the start of every top-level transaction, and
//! - `at(alarm)`, a stream that fires when the time held in an alarm cell is
//!   reached.
//!
//! [`SimulatedTimerSystem`] is a virtual clock driven by the host, for tests
//! and discrete-time simulations.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::reactive::{Cell, CellSink, Listener, Stream, StreamSink};
use crate::transaction::Transaction;

type Callback = Box<dyn FnOnce() + Send>;

/// Orders timers that are due at the same time.
static NEXT_TIMER: AtomicU64 = AtomicU64::new(0);

/// Handle to a pending timer.
pub struct Timer {
    cancel: Mutex<Option<Callback>>,
}

impl Timer {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Stop the timer from firing. Has no effect once it has fired.
    pub fn cancel(&self) {
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }
}

/// A clock the timer system can read and set alarms on.
pub trait TimerSystemImpl<T>: Send + Sync {
    /// The current time.
    fn now(&self) -> T;

    /// Run `callback` once the clock reaches `at`.
    fn set_timer(&self, at: T, callback: Callback) -> Timer;

    /// Run the callbacks of every timer due at or before `t`, in time order.
    fn run_timers_to(&self, t: &T);
}

struct SimulatedState<T> {
    now: T,
    timers: BTreeMap<(T, u64), Callback>,
}

/// A virtual clock that only moves when told to.
pub struct SimulatedTimerSystem<T> {
    state: Arc<Mutex<SimulatedState<T>>>,
}

impl<T> SimulatedTimerSystem<T>
where
    T: Clone + Ord + Send + 'static,
{
    pub fn new(start: T) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimulatedState {
                now: start,
                timers: BTreeMap::new(),
            })),
        }
    }

    /// Move the clock to `t`. Timers due by then fire at the start of the
    /// next transaction.
    pub fn set_time(&self, t: T) {
        self.state.lock().now = t;
    }
}

impl<T> Clone for SimulatedTimerSystem<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> TimerSystemImpl<T> for SimulatedTimerSystem<T>
where
    T: Clone + Ord + Send + 'static,
{
    fn now(&self) -> T {
        self.state.lock().now.clone()
    }

    fn set_timer(&self, at: T, callback: Callback) -> Timer {
        let key = (at, NEXT_TIMER.fetch_add(1, Ordering::Relaxed));
        self.state.lock().timers.insert(key.clone(), callback);

        let state = Arc::downgrade(&self.state);
        Timer::new(move || {
            if let Some(state) = state.upgrade() {
                let callback = state.lock().timers.remove(&key);
                drop(callback);
            }
        })
    }

    fn run_timers_to(&self, t: &T) {
        loop {
            let due = {
                let mut state = self.state.lock();
                match state.timers.first_key_value() {
                    Some(((at, _), _)) if at <= t => state.timers.pop_first(),
                    _ => None,
                }
            };
            match due {
                Some((_, callback)) => callback(),
                None => break,
            }
        }
    }
}

struct Shared<T> {
    clock: Arc<dyn TimerSystemImpl<T>>,
    time: CellSink<T>,

    /// Alarms whose timers have fired, waiting to be sent in time order.
    due: Mutex<BTreeMap<(T, u64), StreamSink<T>>>,
}

impl<T> Shared<T>
where
    T: Clone + Ord + Send + Sync + 'static,
{
    /// Bring the network up to the clock's current time. Each due alarm gets
    /// its own transaction, with `time` set to the alarm time.
    fn advance(&self) {
        let now = self.clock.now();
        self.clock.run_timers_to(&now);

        loop {
            let next = {
                let mut due = self.due.lock();
                match due.first_key_value() {
                    Some(((at, _), _)) if *at <= now => due.pop_first(),
                    _ => None,
                }
            };
            let Some(((at, _), sink)) = next else {
                break;
            };
            tracing::trace!("alarm due");
            self.time.fire(at.clone());
            sink.fire(at);
        }

        self.time.fire(now);
    }
}

/// Clock-driven inputs for a network.
pub struct TimerSystem<T> {
    shared: Arc<Shared<T>>,

    /// Unregisters the start hook when the timer system is dropped.
    _hook: Listener,
}

impl<T> TimerSystem<T>
where
    T: Clone + Ord + Send + Sync + 'static,
{
    /// Drive the network from `clock`. The clock is read at the start of
    /// every top-level transaction until the timer system is dropped.
    pub fn new(clock: impl TimerSystemImpl<T> + 'static) -> Self {
        let clock: Arc<dyn TimerSystemImpl<T>> = Arc::new(clock);
        let shared = Arc::new(Shared {
            time: CellSink::new(clock.now()),
            clock,
            due: Mutex::new(BTreeMap::new()),
        });

        let weak = Arc::downgrade(&shared);
        let hook = Transaction::on_start(move || {
            if let Some(shared) = weak.upgrade() {
                shared.advance();
            }
        });

        Self { shared, _hook: hook }
    }

    /// The current time.
    pub fn time(&self) -> Cell<T> {
        self.shared.time.cell()
    }

    /// Fire once when the time held in `alarm` is reached. Changing the
    /// alarm cancels the previous one; `None` means no alarm.
    pub fn at(&self, alarm: &Cell<Option<T>>) -> Stream<T> {
        let sink: StreamSink<T> = StreamSink::new();
        let current: Arc<Mutex<Option<Timer>>> = Arc::new(Mutex::new(None));

        let shared = Arc::downgrade(&self.shared);
        let target = sink.clone();
        let listener = alarm.listen(move |when| {
            let previous = current.lock().take();
            if let Some(timer) = previous {
                timer.cancel();
            }

            let (Some(at), Some(system)) = (when.clone(), shared.upgrade()) else {
                return;
            };

            let queue = Arc::downgrade(&system);
            let sink = target.clone();
            let fire_at = at.clone();
            let timer = system.clock.set_timer(
                at,
                Box::new(move || {
                    if let Some(system) = queue.upgrade() {
                        let key = (fire_at, NEXT_TIMER.fetch_add(1, Ordering::Relaxed));
                        system.due.lock().insert(key, sink);
                        // Outside a start hook this opens a transaction, whose
                        // start hook sends the alarm.
                        Transaction::run(|_| ());
                    }
                }),
            );
            *current.lock() = Some(timer);
        });

        sink.add_cleanup(listener)
    }
}
