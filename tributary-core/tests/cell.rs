//! Integration Tests for Cells
//!
//! Cells only change when a transaction commits. Most of these tests check
//! what a listener sees as sinks are driven through a sequence of instants.

use std::sync::Arc;

use parking_lot::Mutex;
use tributary_core::reactive::Func;
use tributary_core::{Cell, CellLoop, CellSink, Lazy, Listener, Stream, StreamSink, Transaction};

fn record<A: Clone + Send + Sync + 'static>(stream: &Stream<A>) -> (Listener, Arc<Mutex<Vec<A>>>) {
    let out = Arc::new(Mutex::new(Vec::new()));
    let sink = out.clone();
    let listener = stream.listen(move |a| sink.lock().push(a.clone()));
    (listener, out)
}

fn record_cell<A: Clone + Send + Sync + 'static>(cell: &Cell<A>) -> (Listener, Arc<Mutex<Vec<A>>>) {
    let out = Arc::new(Mutex::new(Vec::new()));
    let sink = out.clone();
    let listener = cell.listen(move |a| sink.lock().push(a.clone()));
    (listener, out)
}

/// Test that a held cell reports each update.
#[test]
fn hold_updates() {
    let e = StreamSink::new();
    let b = e.hold(0);
    let (_l, out) = record(&b.updates());

    e.send(2).unwrap();
    e.send(9).unwrap();

    assert_eq!(*out.lock(), vec![2, 9]);
}

/// Test that a snapshot sees the value from before the firing instant.
#[test]
fn snapshot() {
    let c = CellSink::new(0);
    let e = StreamSink::new();
    let (_l, out) = record(&e.snapshot(&c, |x: &i32, y: &i32| format!("{x} {y}")));

    e.send(100).unwrap();
    c.send(2).unwrap();
    e.send(200).unwrap();
    c.send(9).unwrap();
    c.send(1).unwrap();
    e.send(300).unwrap();

    assert_eq!(*out.lock(), vec!["100 0", "200 2", "300 1"]);
}

/// Test that hold takes effect only after the instant that fired it.
#[test]
fn hold_is_delayed() {
    let e = StreamSink::new();
    let h = e.hold(0);
    let (_l, out) = record(&e.snapshot(&h, |a: &i32, b: &i32| format!("{a} {b}")));

    e.send(2).unwrap();
    e.send(3).unwrap();

    assert_eq!(*out.lock(), vec!["2 0", "3 2"]);
}

/// Test that listening to a cell reports its value and then every update.
#[test]
fn listen_reports_current_value_first() {
    let b = CellSink::new(9);
    let (_l, out) = record_cell(&b);

    b.send(2).unwrap();
    b.send(7).unwrap();

    assert_eq!(*out.lock(), vec![9, 2, 7]);
}

#[test]
fn constant() {
    let (_l, out) = record_cell(&Cell::constant(12));
    assert_eq!(*out.lock(), vec![12]);
}

/// Test mapping the value stream.
#[test]
fn value_then_map() {
    let b = CellSink::new(9);
    let (_l, out) = Transaction::run(|_| record(&b.value().map(|x| x + 100)));

    b.send(2).unwrap();
    b.send(7).unwrap();

    assert_eq!(*out.lock(), vec![109, 102, 107]);
}

/// Test that the value stream's first firing is an ordinary simultaneous
/// firing that can be interleaved with itself.
#[test]
fn value_twice_then_map() {
    let b = CellSink::new(9);
    let (_l, out) = Transaction::run(|_| {
        let value = b.value();
        record(&value.interleave(&value).map(|x| x + 100))
    });

    b.send(2).unwrap();
    b.send(7).unwrap();

    assert_eq!(*out.lock(), vec![109, 109, 102, 102, 107, 107]);
}

#[test]
fn value_then_coalesce() {
    let b = CellSink::new(9);
    let (_l, out) = Transaction::run(|_| record(&b.value().coalesce(|_, b| *b)));

    b.send(2).unwrap();
    b.send(7).unwrap();

    assert_eq!(*out.lock(), vec![9, 2, 7]);
}

/// Test snapshotting another cell from the value stream.
#[test]
fn value_then_snapshot() {
    let b = CellSink::new(9);
    let c = CellSink::new('a');
    let (_l, out) = Transaction::run(|_| record(&b.value().snapshot_value(&c)));

    c.send('b').unwrap();
    b.send(2).unwrap();
    c.send('c').unwrap();
    b.send(7).unwrap();

    assert_eq!(*out.lock(), vec!['a', 'b', 'c']);
}

#[test]
fn value_twice_then_snapshot() {
    let b = CellSink::new(9);
    let c = CellSink::new('a');
    let (_l, out) = Transaction::run(|_| {
        let value = b.value();
        record(&value.interleave(&value).snapshot_value(&c))
    });

    c.send('b').unwrap();
    b.send(2).unwrap();
    c.send('c').unwrap();
    b.send(7).unwrap();

    assert_eq!(*out.lock(), vec!['a', 'a', 'b', 'b', 'c', 'c']);
}

/// Test that the initial firings of two value streams combine.
#[test]
fn value_then_merge() {
    let bi = CellSink::new(9);
    let bj = CellSink::new(2);
    let (_l, out) = Transaction::run(|_| record(&bi.value().merge(&bj.value(), |x, y| x + y)));

    bi.send(1).unwrap();
    bj.send(12).unwrap();

    assert_eq!(*out.lock(), vec![11, 1, 12]);
}

#[test]
fn value_then_filter() {
    let b = CellSink::new(9);
    let (_l, out) = Transaction::run(|_| record(&b.value().filter(|_| true)));

    b.send(2).unwrap();
    b.send(7).unwrap();

    assert_eq!(*out.lock(), vec![9, 2, 7]);
}

#[test]
fn value_then_once() {
    let b = CellSink::new(9);
    let (_l, out) = Transaction::run(|_| record(&b.value().once()));

    b.send(2).unwrap();
    b.send(7).unwrap();

    assert_eq!(*out.lock(), vec![9]);
}

/// Test that the initial firing of a value stream is gone once the instant
/// that created it has closed. The other value tests listen in the creating
/// transaction for this reason.
#[test]
fn value_late_listen() {
    let b = CellSink::new(9);
    let value = b.value();
    b.send(8).unwrap();
    let (_l, out) = record(&value);

    b.send(2).unwrap();

    assert_eq!(*out.lock(), vec![2]);
}

#[test]
fn map() {
    let b = CellSink::new(6);
    let (_l, out) = record_cell(&b.map(|x: &i32| x.to_string()));

    b.send(8).unwrap();

    assert_eq!(*out.lock(), vec!["6", "8"]);
}

/// Test that a mapped cell keeps up with updates made before listening.
#[test]
fn map_late_listen() {
    let b = CellSink::new(6);
    let mapped = b.map(|x: &i32| x.to_string());
    b.send(2).unwrap();
    let (_l, out) = record_cell(&mapped);

    b.send(8).unwrap();

    assert_eq!(*out.lock(), vec!["2", "8"]);
}

/// Test applying a cell of functions.
#[test]
fn apply() {
    let first: Func<i64, String> = Arc::new(|b: &i64| format!("1 {b}"));
    let bf = CellSink::new(first);
    let ba = CellSink::new(5i64);
    let (_l, out) = record_cell(&Cell::apply(&bf, &ba));

    bf.send(Arc::new(|b: &i64| format!("12 {b}"))).unwrap();
    ba.send(6).unwrap();

    assert_eq!(*out.lock(), vec!["1 5", "12 5", "12 6"]);
}

#[test]
fn lift() {
    let a = CellSink::new(1);
    let b = CellSink::new(5i64);
    let (_l, out) = record_cell(&a.lift(&b, |x: &i32, y: &i64| format!("{x} {y}")));

    a.send(12).unwrap();
    b.send(6).unwrap();

    assert_eq!(*out.lock(), vec!["1 5", "12 5", "12 6"]);
}

/// Test that a lift over two views of the same input never mixes old and
/// new values.
#[test]
fn lift_glitch() {
    let a = CellSink::new(1);
    let a3 = a.map(|x: &i32| x * 3);
    let a5 = a.map(|x: &i32| x * 5);
    let (_l, out) = record_cell(&a3.lift(&a5, |x, y| format!("{x} {y}")));

    a.send(2).unwrap();

    assert_eq!(*out.lock(), vec!["3 5", "6 10"]);
}

/// Test a lift whose input is a loop bound in the same transaction.
#[test]
fn lift_loop() {
    let b = CellSink::new("kettle".to_string());
    let c = Transaction::run(|trans| {
        let a: CellLoop<String> = CellLoop::new(trans);
        let c = a.lift(&b, |x, y| format!("{x} {y}"));
        a.bind(&Cell::constant("tea".to_string())).unwrap();
        c
    });
    let (_l, out) = record_cell(&c);

    b.send("caddy".to_string()).unwrap();

    assert_eq!(*out.lock(), vec!["tea kettle", "tea caddy"]);
}

/// Test snapshotting a loop from the instant that binds it.
#[test]
fn loop_value_snapshot() {
    let a = Cell::constant("lettuce".to_string());
    let (_l, out) = Transaction::run(|trans| {
        let b: CellLoop<String> = CellLoop::new(trans);
        let snapped = a.value().snapshot(&b, |x, y| format!("{x} {y}"));
        b.bind(&Cell::constant("cheese".to_string())).unwrap();
        record(&snapped)
    });

    assert_eq!(*out.lock(), vec!["lettuce cheese"]);
}

/// Test holding the value stream of a loop.
#[test]
fn loop_value_hold() {
    let tick = StreamSink::new();
    let value = Transaction::run(|trans| {
        let a: CellLoop<String> = CellLoop::new(trans);
        let value = a.value().hold("onion".to_string());
        a.bind(&Cell::constant("cheese".to_string())).unwrap();
        value
    });
    let (_l, out) = record(&tick.snapshot_value(&value));

    tick.send(()).unwrap();

    assert_eq!(*out.lock(), vec!["cheese"]);
}

#[test]
fn hold_lazy_computes_on_first_sample() {
    let e: StreamSink<i32> = StreamSink::new();
    let h = e.hold_lazy(Lazy::new(|| 7));

    assert_eq!(h.sample(), 7);
    e.send(3).unwrap();
    assert_eq!(h.sample(), 3);
}

/// Test a state machine over a cell's value.
#[test]
fn collect() {
    let c = CellSink::new(5);
    let sums = c.collect(0, |a: &i32, s: &i32| (a + s, a + s));
    let (_l, out) = record_cell(&sums);

    c.send(3).unwrap();
    c.send(1).unwrap();

    assert_eq!(*out.lock(), vec![5, 8, 9]);
}

/// Test that switch_c follows the selected cell and ignores the old one.
#[test]
fn switch_c() {
    let ca = CellSink::new('A');
    let cb = CellSink::new('a');
    let sel = CellSink::new(ca.cell());
    let (_l, out) = record_cell(&sel.switch_c());

    ca.send('B').unwrap();
    sel.send(cb.cell()).unwrap();
    cb.send('b').unwrap();
    ca.send('C').unwrap();

    assert_eq!(*out.lock(), vec!['A', 'B', 'a', 'b']);
}

/// Test that switch_s changes streams from the next instant on.
#[test]
fn switch_s() {
    let sa = StreamSink::new();
    let sb = StreamSink::new();
    let sel = CellSink::new(sa.stream());
    let (_l, out) = record(&sel.switch_s());

    sa.send('A').unwrap();
    Transaction::run(|_| {
        sel.send(sb.stream()).unwrap();
        sa.send('B').unwrap();
        sb.send('x').unwrap();
    });
    sb.send('y').unwrap();
    sa.send('C').unwrap();

    assert_eq!(*out.lock(), vec!['A', 'B', 'y']);
}
