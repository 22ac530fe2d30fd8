//! Stream Implementation
//!
//! A stream is a sequence of discrete firings. It stores no value between
//! instants, only the firings of the current one, so that subscribers added
//! later in the same instant still see them.
//!
//! # How Streams Work
//!
//! 1. Each stream owns a node in the rank graph.
//!
//! 2. Subscribing links the stream's node to the subscriber's node and records
//!    a typed action in the stream's target list.
//!
//! 3. Firing a value queues one delivery per target in the current
//!    transaction, ordered by the target node's rank. Deliveries run the
//!    action, which usually fires the next stream down.
//!
//! # Ownership
//!
//! A derived stream owns the [`Listener`]s of its upstream subscriptions, and
//! the upstream actions only hold a weak reference back to it. Dropping the
//! last handle to a derived stream therefore detaches it from everything it
//! reads from.
//!
//! Each target carries an `active` flag checked when its delivery runs, so a
//! subscription torn down mid-instant stops receiving at once, even for
//! deliveries that were already queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::cell::Cell;
use super::context::CallbackContext;
use super::lazy::Lazy;
use super::listener::Listener;
use super::stream_loop::StreamLoop;
use crate::graph::{with_graph, EdgeId, NodeId};
use crate::transaction::Transaction;

type Action<A> = Arc<dyn Fn(&Transaction, &A) + Send + Sync>;

struct Target<A> {
    edge: EdgeId,
    node: NodeId,
    action: Action<A>,
    active: Arc<AtomicBool>,
}

struct StreamState<A> {
    /// Values fired in the current instant, in firing order.
    firings: Vec<A>,

    targets: Vec<Target<A>>,

    /// Upstream subscriptions this stream owns.
    cleanups: Vec<Listener>,
}

pub(crate) struct StreamInner<A> {
    node: NodeId,
    state: Mutex<StreamState<A>>,
}

impl<A> StreamInner<A> {
    fn remove_target(&self, edge: EdgeId) {
        let removed = {
            let mut state = self.state.lock();
            let pos = state.targets.iter().position(|t| t.edge == edge);
            pos.map(|pos| state.targets.remove(pos))
        };
        with_graph(|graph| graph.unlink(self.node, edge));
        // Actions may own other streams; release them with no lock held.
        drop(removed);
    }
}

impl<A> Drop for StreamInner<A> {
    fn drop(&mut self) {
        with_graph(|graph| graph.remove_node(self.node));
    }
}

/// A stream of discrete firings of type `A`.
///
/// Handles are cheap to clone and share the same underlying stream.
///
/// # Example
///
/// ```rust,ignore
/// let clicks = StreamSink::new();
/// let doubled = clicks.map(|n: &i32| n * 2);
/// let _listener = doubled.listen(|n| println!("{n}"));
/// clicks.send(21)?; // prints 42
/// ```
pub struct Stream<A> {
    inner: Arc<StreamInner<A>>,
}

impl<A> Clone for Stream<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A> std::fmt::Debug for Stream<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").field("node", &self.inner.node).finish()
    }
}

/// Non-owning reference held by upstream actions.
pub(crate) struct WeakStream<A>(Weak<StreamInner<A>>);

impl<A> WeakStream<A> {
    pub(crate) fn upgrade(&self) -> Option<Stream<A>> {
        self.0.upgrade().map(|inner| Stream { inner })
    }
}

impl<A> Clone for WeakStream<A> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<A> Stream<A>
where
    A: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        let node = with_graph(|graph| graph.add_node(0));
        Self {
            inner: Arc::new(StreamInner {
                node,
                state: Mutex::new(StreamState {
                    firings: Vec::new(),
                    targets: Vec::new(),
                    cleanups: Vec::new(),
                }),
            }),
        }
    }

    /// A stream that never fires.
    pub fn never() -> Self {
        Self::new()
    }

    pub(crate) fn node(&self) -> NodeId {
        self.inner.node
    }

    pub(crate) fn downgrade(&self) -> WeakStream<A> {
        WeakStream(Arc::downgrade(&self.inner))
    }

    /// Tie `listener` to this stream's lifetime.
    pub(crate) fn own(&self, listener: Listener) {
        self.inner.state.lock().cleanups.push(listener);
    }

    pub(crate) fn with_cleanup(self, listener: Listener) -> Self {
        self.own(listener);
        self
    }

    /// Fire `value` in `trans`, queueing a delivery for every target.
    pub(crate) fn send_in(&self, trans: &Transaction, value: A) {
        let (first, targets) = {
            let mut state = self.inner.state.lock();
            let first = state.firings.is_empty();
            state.firings.push(value.clone());
            let targets: SmallVec<[(NodeId, Action<A>, Arc<AtomicBool>); 4]> = state
                .targets
                .iter()
                .map(|t| (t.node, t.action.clone(), t.active.clone()))
                .collect();
            (first, targets)
        };

        if first {
            let weak = Arc::downgrade(&self.inner);
            trans.on_reset(move || {
                if let Some(inner) = weak.upgrade() {
                    let firings = std::mem::take(&mut inner.state.lock().firings);
                    drop(firings);
                }
            });
        }

        for (node, action, active) in targets {
            let value = value.clone();
            trans.schedule(node, move |trans| {
                if active.load(Ordering::Acquire) {
                    let _ctx = CallbackContext::enter();
                    action(trans, &value);
                }
            });
        }
    }

    /// Subscribe `action` to this stream, delivering at the rank of `target`.
    ///
    /// Unless `suppress_earlier` is set, values already fired in this instant
    /// are delivered too.
    pub(crate) fn listen_in(
        &self,
        trans: &Transaction,
        target: NodeId,
        suppress_earlier: bool,
        action: impl Fn(&Transaction, &A) + Send + Sync + 'static,
    ) -> Listener {
        self.subscribe(trans, target, suppress_earlier, Arc::new(action))
    }

    fn subscribe(
        &self,
        trans: &Transaction,
        target: NodeId,
        suppress_earlier: bool,
        action: Action<A>,
    ) -> Listener {
        let (edge, changed) = with_graph(|graph| graph.link(self.inner.node, target));
        if changed {
            trans.request_regen();
        }

        let active = Arc::new(AtomicBool::new(true));
        let earlier = {
            let mut state = self.inner.state.lock();
            state.targets.push(Target {
                edge,
                node: target,
                action: action.clone(),
                active: active.clone(),
            });
            if suppress_earlier {
                Vec::new()
            } else {
                state.firings.clone()
            }
        };

        if !earlier.is_empty() {
            let active = active.clone();
            trans.schedule(target, move |trans| {
                let _ctx = CallbackContext::enter();
                for value in &earlier {
                    if !active.load(Ordering::Acquire) {
                        break;
                    }
                    action(trans, value);
                }
            });
        }

        let inner = self.inner.clone();
        Listener::new(move || {
            active.store(false, Ordering::Release);
            CallbackContext::defer_or_run(move || inner.remove_target(edge));
        })
    }

    /// Re-fire every firing of this stream on `out`, delivering at the rank
    /// of `target`.
    pub(crate) fn forward_in(
        &self,
        trans: &Transaction,
        target: NodeId,
        out: &Stream<A>,
        suppress_earlier: bool,
    ) -> Listener {
        let weak = out.downgrade();
        self.listen_in(trans, target, suppress_earlier, move |trans, a| {
            if let Some(out) = weak.upgrade() {
                out.send_in(trans, a.clone());
            }
        })
    }

    /// Subscribe a derived output stream: `f` receives each firing together
    /// with the output, for as long as the output is alive.
    fn derive<B>(
        &self,
        trans: &Transaction,
        f: impl Fn(&Transaction, &Stream<B>, &A) + Send + Sync + 'static,
    ) -> Stream<B>
    where
        B: Clone + Send + Sync + 'static,
    {
        let out = Stream::new();
        let weak = out.downgrade();
        let listener = self.listen_in(trans, out.node(), false, move |trans, a| {
            if let Some(out) = weak.upgrade() {
                f(trans, &out, a);
            }
        });
        out.with_cleanup(listener)
    }

    /// Run `callback` for every firing, after the firing instant has settled.
    ///
    /// The returned [`Listener`] keeps the subscription alive.
    pub fn listen(&self, callback: impl Fn(&A) + Send + Sync + 'static) -> Listener {
        let callback = Arc::new(callback);
        Transaction::run(|trans| {
            let flag = Arc::new(AtomicBool::new(true));
            let settled_flag = flag.clone();
            let action: Action<A> = Arc::new(move |trans: &Transaction, a: &A| {
                let callback = callback.clone();
                let active = settled_flag.clone();
                let a = a.clone();
                trans.on_settled(move || {
                    if active.load(Ordering::Acquire) {
                        let _ctx = CallbackContext::enter();
                        callback(&a);
                    }
                });
            });
            self.subscribe(trans, NodeId::NULL, false, action)
                .append(Listener::new(move || flag.store(false, Ordering::Release)))
        })
    }

    pub fn map<B>(&self, f: impl Fn(&A) -> B + Send + Sync + 'static) -> Stream<B>
    where
        B: Clone + Send + Sync + 'static,
    {
        Transaction::run(|trans| self.derive(trans, move |trans, out, a| out.send_in(trans, f(a))))
    }

    /// Map every firing to a constant.
    pub fn map_to<B>(&self, value: B) -> Stream<B>
    where
        B: Clone + Send + Sync + 'static,
    {
        self.map(move |_| value.clone())
    }

    pub fn filter(&self, predicate: impl Fn(&A) -> bool + Send + Sync + 'static) -> Stream<A> {
        Transaction::run(|trans| {
            self.derive(trans, move |trans, out, a| {
                if predicate(a) {
                    out.send_in(trans, a.clone());
                }
            })
        })
    }

    /// Fire for either stream. Simultaneous firings are combined with
    /// `combine(left, right)`, where `self` is the left side.
    pub fn merge(&self, other: &Stream<A>, combine: impl Fn(&A, &A) -> A + Send + Sync + 'static) -> Stream<A> {
        Transaction::run(|trans| self.merge_raw(trans, other).coalesce(combine))
    }

    /// Merge that keeps the left value when both streams fire in one instant.
    pub fn or_else(&self, other: &Stream<A>) -> Stream<A> {
        self.merge(other, |left, _| left.clone())
    }

    /// Fire for either stream without combining: simultaneous firings are all
    /// delivered, those of `self` first.
    pub fn interleave(&self, other: &Stream<A>) -> Stream<A> {
        Transaction::run(|trans| self.merge_raw(trans, other))
    }

    /// Both streams' firings, left firings ahead of right ones.
    fn merge_raw(&self, trans: &Transaction, other: &Stream<A>) -> Stream<A> {
        let out = Stream::new();

        // `self` delivers to a helper node ranked just below `out`, so within
        // one instant its firings always reach `out` first.
        let left = with_graph(|graph| {
            let left = graph.add_node(0);
            graph.link(left, out.node());
            left
        });

        let l1 = self.forward_in(trans, left, &out, false);
        let l2 = other.forward_in(trans, out.node(), &out, false);

        out.with_cleanup(l1)
            .with_cleanup(l2)
            .with_cleanup(Listener::new(move || with_graph(|graph| graph.remove_node(left))))
    }

    /// Fold all firings of one instant into a single firing, left to right.
    pub fn coalesce(&self, combine: impl Fn(&A, &A) -> A + Send + Sync + 'static) -> Stream<A> {
        Transaction::run(|trans| {
            let acc: Arc<Mutex<Option<A>>> = Arc::new(Mutex::new(None));
            self.derive(trans, move |trans, out, a| {
                let prev = acc.lock().take();
                match prev {
                    Some(prev) => {
                        let next = combine(&prev, a);
                        *acc.lock() = Some(next);
                    }
                    None => {
                        *acc.lock() = Some(a.clone());

                        let pending = acc.clone();
                        let weak = out.downgrade();
                        trans.schedule(out.node(), move |trans| {
                            let value = pending.lock().take();
                            if let (Some(value), Some(out)) = (value, weak.upgrade()) {
                                out.send_in(trans, value);
                            }
                        });

                        let stale = acc.clone();
                        trans.on_reset(move || {
                            let value = stale.lock().take();
                            drop(value);
                        });
                    }
                }
            })
        })
    }

    /// Pair each firing with the value `cell` had at the start of the instant.
    ///
    /// # Panics
    ///
    /// A firing panics if `cell` is a loop that was never bound.
    pub fn snapshot<B, C>(&self, cell: &Cell<B>, f: impl Fn(&A, &B) -> C + Send + Sync + 'static) -> Stream<C>
    where
        B: Clone + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
    {
        let cell = cell.clone();
        Transaction::run(|trans| {
            self.derive(trans, move |trans, out, a| {
                let b = cell.sample_current();
                out.send_in(trans, f(a, &b));
            })
        })
    }

    /// Replace each firing with the value `cell` had at the start of the
    /// instant.
    pub fn snapshot_value<B>(&self, cell: &Cell<B>) -> Stream<B>
    where
        B: Clone + Send + Sync + 'static,
    {
        self.snapshot(cell, |_, b| b.clone())
    }

    /// Forward firings only while `cell` holds true.
    pub fn gate(&self, cell: &Cell<bool>) -> Stream<A> {
        self.snapshot(cell, |a, pass| pass.then(|| a.clone())).filter_option()
    }

    /// A cell starting at `initial` and taking the value of each firing once
    /// the firing instant commits.
    pub fn hold(&self, initial: A) -> Cell<A> {
        Cell::from_stream(self.clone(), Some(initial), None)
    }

    /// Like [`hold`](Self::hold), with an initial value computed on first
    /// sample.
    pub fn hold_lazy(&self, initial: Lazy<A>) -> Cell<A> {
        Cell::from_stream(self.clone(), None, Some(initial))
    }

    /// Forward only the first firing, then detach from `self`.
    pub fn once(&self) -> Stream<A> {
        Transaction::run(|trans| {
            let out = Stream::new();
            let slot: Arc<Mutex<Option<Listener>>> = Arc::new(Mutex::new(None));

            let weak = out.downgrade();
            let weak_slot = Arc::downgrade(&slot);
            let listener = self.listen_in(trans, out.node(), false, move |trans, a| {
                let taken = weak_slot.upgrade().and_then(|slot| slot.lock().take());
                if let (Some(listener), Some(out)) = (taken, weak.upgrade()) {
                    out.send_in(trans, a.clone());
                    drop(listener);
                }
            });
            *slot.lock() = Some(listener);

            out.with_cleanup(Listener::new(move || {
                let listener = slot.lock().take();
                drop(listener);
            }))
        })
    }

    /// Re-fire each value in a fresh transaction once the current one has
    /// settled.
    pub fn defer(&self) -> Stream<A> {
        Transaction::run(|trans| {
            self.derive(trans, |trans, out, a| {
                let weak = out.downgrade();
                let a = a.clone();
                trans.on_settled(move || {
                    if let Some(out) = weak.upgrade() {
                        Transaction::run(|trans| out.send_in(trans, a));
                    }
                });
            })
        })
    }

    /// Accumulate state over firings, starting from `initial`.
    pub fn accum<S>(&self, initial: S, f: impl Fn(&A, &S) -> S + Send + Sync + 'static) -> Cell<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        self.accum_lazy(Lazy::from_value(initial), f)
    }

    pub fn accum_lazy<S>(&self, initial: Lazy<S>, f: impl Fn(&A, &S) -> S + Send + Sync + 'static) -> Cell<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        Transaction::run(|trans| {
            let states = StreamLoop::new(trans);
            let state = states.hold_lazy(initial.clone());
            let next = self.snapshot(&state, f);
            states.bind(&next).expect("a fresh loop binds exactly once");
            next.hold_lazy(initial)
        })
    }

    /// Run a state machine over firings: `f(value, state)` returns the output
    /// to fire and the next state.
    pub fn collect<B, S>(&self, initial: S, f: impl Fn(&A, &S) -> (B, S) + Send + Sync + 'static) -> Stream<B>
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
    ) -> Stream<B>
    where
        B: Clone + Send + Sync + 'static,
        S: Clone + Send + Sync + 'static,
    {
        Transaction::run(|trans| {
            let states = StreamLoop::new(trans);
            let state = states.hold_lazy(initial);
            let steps = self.snapshot(&state, f);
            let out = steps.map(|(b, _)| b.clone());
            let next = steps.map(|(_, s)| s.clone());
            states.bind(&next).expect("a fresh loop binds exactly once");
            out
        })
    }

    /// A copy of this stream that also keeps `listener` registered for as long
    /// as it is alive.
    pub fn add_cleanup(&self, listener: Listener) -> Stream<A> {
        Transaction::run(|trans| {
            self.derive(trans, |trans, out, a| out.send_in(trans, a.clone()))
                .with_cleanup(listener)
        })
    }
}

impl<A> Stream<Option<A>>
where
    A: Clone + Send + Sync + 'static,
{
    /// Forward the `Some` firings, unwrapped.
    pub fn filter_option(&self) -> Stream<A> {
        Transaction::run(|trans| {
            self.derive(trans, |trans, out, a: &Option<A>| {
                if let Some(a) = a {
                    out.send_in(trans, a.clone());
                }
            })
        })
    }
}

impl<C> Stream<C>
where
    C: IntoIterator + Clone + Send + Sync + 'static,
    C::Item: Clone + Send + Sync + 'static,
{
    /// Fire each element of a collection in its own transaction, after the
    /// current one has settled.
    pub fn split(&self) -> Stream<C::Item> {
        Transaction::run(|trans| {
            self.derive(trans, |trans, out, items: &C| {
                let weak = out.downgrade();
                let items = items.clone();
                trans.on_settled(move || {
                    for item in items {
                        match weak.upgrade() {
                            Some(out) => Transaction::run(|trans| out.send_in(trans, item)),
                            None => break,
                        }
                    }
                });
            })
        })
    }
}

impl<A> Stream<Stream<A>>
where
    A: Clone + Send + Sync + 'static,
{
    /// Fire whatever the most recently fired inner stream fires. A new inner
    /// stream takes effect from the next instant.
    pub fn flatten(&self) -> Stream<A> {
        self.hold(Stream::never()).switch_s()
    }
}
