//! Lifting Functions Over Cells
//!
//! [`Cell::apply`] is the one propagation primitive for combining cells: a
//! cell of functions applied to a cell of arguments. Every lift is built from
//! it by partial application, so any arity works the same way and there is no
//! arity ceiling ([`Cell::lift_all`] takes a slice).
//!
//! # Glitch Freedom
//!
//! Both inputs deliver to a helper node ranked below the output. The result
//! is computed once per instant, at the output's rank, from whatever the two
//! inputs hold by then. Every change to either input in the instant has been
//! seen by that point, so the output never mixes old and new values.

use std::sync::Arc;

use parking_lot::Mutex;

use super::cell::Cell;
use super::context::CallbackContext;
use super::lazy::Lazy;
use super::listener::Listener;
use super::stream::{Stream, WeakStream};
use crate::graph::{with_graph, NodeId};
use crate::transaction::Transaction;

/// A function value carried by a cell.
pub type Func<A, B> = Arc<dyn Fn(&A) -> B + Send + Sync>;

struct ApplyState<A, B> {
    f: Option<Func<A, B>>,
    a: Option<A>,

    /// Whether the output is already queued this instant.
    scheduled: bool,
}

fn schedule_apply<A, B>(trans: &Transaction, state: &Arc<Mutex<ApplyState<A, B>>>, out: &WeakStream<B>, node: NodeId)
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    {
        let mut state = state.lock();
        if state.scheduled || state.f.is_none() || state.a.is_none() {
            return;
        }
        state.scheduled = true;
    }

    let pending = state.clone();
    let out = out.clone();
    trans.schedule(node, move |trans| {
        let inputs = {
            let state = pending.lock();
            state.f.clone().zip(state.a.clone())
        };
        if let (Some((f, a)), Some(out)) = (inputs, out.upgrade()) {
            let _ctx = CallbackContext::enter();
            out.send_in(trans, f(&a));
        }
    });

    let reset = state.clone();
    trans.on_reset(move || reset.lock().scheduled = false);
}

impl<A> Cell<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Apply a cell of functions to a cell of arguments.
    ///
    /// The output updates at most once per instant, however many times
    /// either input changed.
    pub fn apply<B>(cf: &Cell<Func<A, B>>, ca: &Cell<A>) -> Cell<B>
    where
        B: Clone + Send + Sync + 'static,
    {
        Transaction::run(|trans| {
            let out: Stream<B> = Stream::new();
            let out_node = out.node();
            let in_target = with_graph(|graph| {
                let node = graph.add_node(0);
                graph.link(node, out_node);
                node
            });

            let state = Arc::new(Mutex::new(ApplyState {
                f: None,
                a: None,
                scheduled: false,
            }));
            let weak = out.downgrade();

            let (s1, w1) = (state.clone(), weak.clone());
            let l1 = cf.value_in(trans).listen_in(trans, in_target, false, move |trans, f| {
                let old = s1.lock().f.replace(f.clone());
                drop(old);
                schedule_apply(trans, &s1, &w1, out_node);
            });

            let (s2, w2) = (state, weak);
            let l2 = ca.value_in(trans).listen_in(trans, in_target, false, move |trans, a| {
                let old = s2.lock().a.replace(a.clone());
                drop(old);
                schedule_apply(trans, &s2, &w2, out_node);
            });

            let (cf, ca) = (cf.clone(), ca.clone());
            let initial = Lazy::new(move || {
                let f = cf.sample();
                f(&ca.sample())
            });

            out.with_cleanup(l1)
                .with_cleanup(l2)
                .with_cleanup(Listener::new(move || with_graph(|graph| graph.remove_node(in_target))))
                .hold_lazy(initial)
        })
    }

    /// Combine two cells with `f`.
    pub fn lift<B, C>(&self, other: &Cell<B>, f: impl Fn(&A, &B) -> C + Send + Sync + 'static) -> Cell<C>
    where
        B: Clone + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Transaction::run(|_| {
            let partial = self.map(move |a| -> Func<B, C> {
                let f = f.clone();
                let a = a.clone();
                Arc::new(move |b: &B| f(&a, b))
            });
            Cell::apply(&partial, other)
        })
    }

    /// Combine three cells with `f`.
    pub fn lift3<B, C, D>(
        &self,
        b: &Cell<B>,
        c: &Cell<C>,
        f: impl Fn(&A, &B, &C) -> D + Send + Sync + 'static,
    ) -> Cell<D>
    where
        B: Clone + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
        D: Clone + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Transaction::run(|_| {
            let partial = self.lift(b, move |a, b| -> Func<C, D> {
                let f = f.clone();
                let (a, b) = (a.clone(), b.clone());
                Arc::new(move |c: &C| f(&a, &b, c))
            });
            Cell::apply(&partial, c)
        })
    }

    /// Combine any number of cells of the same type with `f`, which receives
    /// their values in slice order.
    pub fn lift_all<B>(cells: &[Cell<A>], f: impl Fn(&[A]) -> B + Send + Sync + 'static) -> Cell<B>
    where
        B: Clone + Send + Sync + 'static,
    {
        Transaction::run(|_| {
            let mut values: Cell<Vec<A>> = Cell::constant(Vec::with_capacity(cells.len()));
            for cell in cells {
                values = values.lift(cell, |values, a| {
                    let mut values = values.clone();
                    values.push(a.clone());
                    values
                });
            }
            values.map(move |values: &Vec<A>| f(values))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_combines_function_and_argument() {
        let fs: Stream<Func<i32, i32>> = Stream::new();
        let xs: Stream<i32> = Stream::new();
        let cf = fs.hold(Arc::new(|x: &i32| x + 1) as Func<i32, i32>);
        let ca = xs.hold(10);
        let out = Cell::apply(&cf, &ca);

        assert_eq!(out.sample(), 11);

        Transaction::run(|trans| xs.send_in(trans, 20));
        assert_eq!(out.sample(), 21);

        Transaction::run(|trans| fs.send_in(trans, Arc::new(|x: &i32| x * 3)));
        assert_eq!(out.sample(), 60);
    }

    #[test]
    fn lift_updates_once_when_both_inputs_change() {
        let s: Stream<i32> = Stream::new();
        let a = s.hold(1);
        let b = a.map(|x| x * 10);
        let sum = a.lift(&b, |x, y| x + y);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _l = sum.listen(move |x| seen_clone.lock().push(*x));

        Transaction::run(|trans| s.send_in(trans, 2));

        assert_eq!(*seen.lock(), vec![11, 22]);
    }

    #[test]
    fn lift3_and_lift_all() {
        let a = Cell::constant(1);
        let b = Cell::constant(2);
        let c = Cell::constant(3);

        assert_eq!(a.lift3(&b, &c, |a, b, c| a * 100 + b * 10 + c).sample(), 123);

        let s: Stream<i32> = Stream::new();
        let d = s.hold(4);
        let total = Cell::lift_all(&[a, b, c, d], |values| values.iter().sum::<i32>());
        assert_eq!(total.sample(), 10);

        Transaction::run(|trans| s.send_in(trans, 40));
        assert_eq!(total.sample(), 46);
    }

    #[test]
    fn lift_all_of_nothing_sees_an_empty_slice() {
        let count = Cell::<i32>::lift_all(&[], |values| values.len());
        assert_eq!(count.sample(), 0);
    }
}
