//! Cell Implementation
//!
//! A cell is a value that changes over time: an initial value plus a stream
//! of updates.
//!
//! # How Cells Work
//!
//! 1. The cell subscribes to its update stream at the sink node, so it sees an
//!    update only after every ranked node of the instant has fired.
//!
//! 2. An update is staged, and a commit action is queued the first time the
//!    cell updates in an instant.
//!
//! 3. The commit action promotes the staged value to the current one. Code
//!    running in the pending phase therefore always samples the value from the
//!    start of the instant, whatever else fires.
//!
//! # Lazy Initial Values
//!
//! A cell built over a loop may not know its initial value until the loop is
//! bound. Such a cell holds a [`Lazy`] instead, evaluated (and cached) the
//! first time the cell is sampled.

use std::sync::Arc;

use parking_lot::Mutex;

use super::lazy::Lazy;
use super::listener::Listener;
use super::stream::Stream;
use super::stream_loop::StreamLoop;
use crate::error::{Error, Result};
use crate::graph::NodeId;
use crate::transaction::Transaction;

struct CellState<A> {
    /// Committed value. `None` until a lazy initial value is forced.
    value: Option<A>,

    /// Value staged by this instant's update, if any.
    update: Option<A>,

    lazy: Option<Lazy<A>>,
}

pub(crate) struct CellInner<A> {
    stream: Stream<A>,
    state: Mutex<CellState<A>>,
    cleanup: Mutex<Option<Listener>>,
}

impl<A> CellInner<A>
where
    A: Clone + Send + Sync + 'static,
{
    fn stage(self: &Arc<Self>, trans: &Transaction, value: A) {
        let (first, replaced) = {
            let mut state = self.state.lock();
            let first = state.update.is_none();
            (first, state.update.replace(value))
        };
        drop(replaced);

        if first {
            let weak = Arc::downgrade(self);
            trans.on_commit(move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.commit();
                }
            });

            let weak = Arc::downgrade(self);
            trans.on_reset(move || {
                if let Some(inner) = weak.upgrade() {
                    let stale = inner.state.lock().update.take();
                    drop(stale);
                }
            });
        }
    }

    fn commit(&self) {
        let released = {
            let mut state = self.state.lock();
            match state.update.take() {
                Some(value) => Some((state.value.replace(value), state.lazy.take())),
                None => None,
            }
        };
        drop(released);
    }
}

/// A value of type `A` that changes over time.
///
/// # Example
///
/// ```rust,ignore
/// let celsius = CellSink::new(20.0);
/// let fahrenheit = celsius.map(|c: &f64| c * 9.0 / 5.0 + 32.0);
/// celsius.send(100.0)?;
/// assert_eq!(fahrenheit.sample(), 212.0);
/// ```
pub struct Cell<A> {
    inner: Arc<CellInner<A>>,
}

impl<A> Clone for Cell<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A> std::fmt::Debug for Cell<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell").field("stream", &self.inner.stream).finish()
    }
}

/// A lazy read resolved when the transaction that requested it commits.
enum LazySample<A> {
    Pending(Cell<A>),
    Resolved(A),
}

impl<A> Cell<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Hold `value` or `lazy` until `stream` fires.
    pub(crate) fn from_stream(stream: Stream<A>, value: Option<A>, lazy: Option<Lazy<A>>) -> Self {
        Transaction::run(|trans| {
            let inner = Arc::new(CellInner {
                stream: stream.clone(),
                state: Mutex::new(CellState {
                    value,
                    update: None,
                    lazy,
                }),
                cleanup: Mutex::new(None),
            });

            let weak = Arc::downgrade(&inner);
            let listener = stream.listen_in(trans, NodeId::NULL, false, move |trans, a| {
                if let Some(inner) = weak.upgrade() {
                    inner.stage(trans, a.clone());
                }
            });
            *inner.cleanup.lock() = Some(listener);

            Cell { inner }
        })
    }

    /// A cell that never changes.
    pub fn constant(value: A) -> Self {
        Self::from_stream(Stream::never(), Some(value), None)
    }

    pub(crate) fn stream(&self) -> &Stream<A> {
        &self.inner.stream
    }

    /// Install the initial value of a loop, unless one is already known.
    pub(crate) fn set_lazy(&self, lazy: Lazy<A>) {
        let mut state = self.inner.state.lock();
        if state.value.is_none() {
            state.lazy = Some(lazy);
        }
    }

    /// The committed value, forcing a lazy initial value if needed.
    pub(crate) fn try_current(&self) -> Result<A> {
        let lazy = {
            let state = self.inner.state.lock();
            if let Some(value) = &state.value {
                return Ok(value.clone());
            }
            state.lazy.clone()
        };

        let value = lazy.ok_or(Error::LoopNotBound)?.get();

        let released = {
            let mut state = self.inner.state.lock();
            if state.value.is_none() {
                state.value = Some(value.clone());
                state.lazy.take()
            } else {
                None
            }
        };
        drop(released);
        Ok(value)
    }

    pub(crate) fn sample_current(&self) -> A {
        match self.try_current() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// The value this cell will hold once the current instant commits.
    fn new_value(&self) -> Result<A> {
        let update = self.inner.state.lock().update.clone();
        match update {
            Some(value) => Ok(value),
            None => self.try_current(),
        }
    }

    /// Read the current value.
    ///
    /// Inside a transaction this is the value from the start of the instant;
    /// updates made in the instant are not visible until it commits.
    ///
    /// # Panics
    ///
    /// Panics if this is a [`CellLoop`](super::CellLoop) that has not been
    /// bound yet. Use [`try_sample`](Self::try_sample) to get an error instead.
    pub fn sample(&self) -> A {
        Transaction::run(|_| self.sample_current())
    }

    pub fn try_sample(&self) -> Result<A> {
        Transaction::run(|_| self.try_current())
    }

    /// A deferred read of the value this cell holds once the current
    /// instant commits.
    pub fn sample_lazy(&self) -> Lazy<A> {
        Transaction::run(|trans| self.sample_lazy_in(trans))
    }

    pub(crate) fn sample_lazy_in(&self, trans: &Transaction) -> Lazy<A> {
        let sample = Arc::new(Mutex::new(LazySample::Pending(self.clone())));

        let resolve = sample.clone();
        trans.on_commit(move |_| {
            let cell = match &*resolve.lock() {
                LazySample::Pending(cell) => cell.clone(),
                LazySample::Resolved(_) => return,
            };
            if let Ok(value) = cell.new_value() {
                let previous = std::mem::replace(&mut *resolve.lock(), LazySample::Resolved(value));
                drop(previous);
            }
        });

        Lazy::new(move || {
            let cell = match &*sample.lock() {
                LazySample::Resolved(value) => return value.clone(),
                LazySample::Pending(cell) => cell.clone(),
            };
            cell.sample()
        })
    }

    /// The stream of this cell's updates, one firing per instant at most.
    pub fn updates(&self) -> Stream<A> {
        self.inner.stream.coalesce(|_, last| last.clone())
    }

    /// Fires the current value once, in the instant this is called, then
    /// every update.
    pub fn value(&self) -> Stream<A> {
        Transaction::run(|trans| self.value_in(trans))
    }

    pub(crate) fn value_in(&self, trans: &Transaction) -> Stream<A> {
        let spark: Stream<()> = Stream::new();
        let fire = spark.clone();
        trans.schedule(spark.node(), move |trans| fire.send_in(trans, ()));

        // An update in the same instant wins over the sampled value.
        spark
            .snapshot_value(self)
            .merge(&self.updates(), |_, update| update.clone())
    }

    /// Run `callback` with the current value, then with every update.
    pub fn listen(&self, callback: impl Fn(&A) + Send + Sync + 'static) -> Listener {
        Transaction::run(|trans| self.value_in(trans).listen(callback))
    }

    pub fn map<B>(&self, f: impl Fn(&A) -> B + Send + Sync + 'static) -> Cell<B>
    where
        B: Clone + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Transaction::run(|trans| {
            let g = f.clone();
            let initial = self.sample_lazy_in(trans).map(move |a| g(&a));
            self.updates().map(move |a| f(a)).hold_lazy(initial)
        })
    }

    /// Run a state machine over this cell's value: `f(value, state)` returns
    /// the output and the next state. The first output is computed from the
    /// current value and `initial`.
    pub fn collect<B, S>(&self, initial: S, f: impl Fn(&A, &S) -> (B, S) + Send + Sync + 'static) -> Cell<B>
    where
        B: Clone + Send + Sync + 'static,
        S: Clone + Send + Sync + 'static,
    {
        self.collect_lazy(Lazy::from_value(initial), f)
    }

    pub fn collect_lazy<B, S>(
        &self,
        initial: Lazy<S>,
        f: impl Fn(&A, &S) -> (B, S) + Send + Sync + 'static,
    ) -> Cell<B>
    where
        B: Clone + Send + Sync + 'static,
        S: Clone + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Transaction::run(|trans| {
            let updates = self.updates();

            let g = f.clone();
            let first = self
                .sample_lazy_in(trans)
                .lift(&initial, move |a, s| g(&a, &s));

            let steps = StreamLoop::new(trans);
            let pairs = steps.hold_lazy(first);
            let state = pairs.map(|(_, s)| s.clone());
            let next = updates.snapshot(&state, move |a, s| f(a, s));
            steps.bind(&next).expect("a fresh loop binds exactly once");

            pairs.map(|(b, _)| b.clone())
        })
    }
}

impl<A> Cell<Cell<A>>
where
    A: Clone + Send + Sync + 'static,
{
    /// Track whichever inner cell is currently selected.
    ///
    /// When the selection changes, the new inner cell's value is the output
    /// for that instant; firings of the old inner cell later in the same
    /// instant are dropped.
    pub fn switch_c(&self) -> Cell<A> {
        Transaction::run(|trans| {
            let initial = self.sample_lazy_in(trans).map(|inner: Cell<A>| inner.sample());

            let out: Stream<A> = Stream::new();
            let out_node = out.node();
            let weak = out.downgrade();
            let current: Arc<Mutex<Option<Listener>>> = Arc::new(Mutex::new(None));

            let listener = self.value_in(trans).listen_in(trans, out_node, false, move |trans, inner| {
                let previous = current.lock().take();
                drop(previous);

                if let Some(out) = weak.upgrade() {
                    let listener = inner.value_in(trans).forward_in(trans, out_node, &out, false);
                    let replaced = current.lock().replace(listener);
                    drop(replaced);
                    tracing::debug!(node = out_node.raw(), "switched inner cell");
                }
            });
            out.own(listener);

            out.coalesce(|_, last| last.clone()).hold_lazy(initial)
        })
    }
}

impl<A> Cell<Stream<A>>
where
    A: Clone + Send + Sync + 'static,
{
    /// Fire whatever the currently selected stream fires.
    ///
    /// A new selection takes effect from the next instant: the old stream's
    /// firings in the switching instant are still delivered, the new one's
    /// are not.
    ///
    /// # Panics
    ///
    /// Panics if this is an unbound [`CellLoop`](super::CellLoop).
    pub fn switch_s(&self) -> Stream<A> {
        Transaction::run(|trans| {
            let out: Stream<A> = Stream::new();
            let out_node = out.node();

            let first = self.sample_current().forward_in(trans, out_node, &out, false);
            let current = Arc::new(Mutex::new(Some(first)));

            let weak = out.downgrade();
            let listener = self.updates().listen_in(trans, out_node, false, move |trans, next| {
                let current = current.clone();
                let weak = weak.clone();
                let next = next.clone();
                trans.on_commit(move |trans| {
                    let previous = current.lock().take();
                    drop(previous);

                    if let Some(out) = weak.upgrade() {
                        let listener = next.forward_in(trans, out.node(), &out, true);
                        let replaced = current.lock().replace(listener);
                        drop(replaced);
                        tracing::debug!(node = out.node().raw(), "switched inner stream");
                    }
                });
            });

            out.with_cleanup(listener)
        })
    }
}
