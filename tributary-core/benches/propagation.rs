//! Benchmarks for propagation through stream and cell networks.
//!
//! Run with: cargo bench -p tributary-core

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use tributary_core::{Cell, CellSink, Stream, StreamSink, Transaction};

// ============================================================================
// Stream chains
// ============================================================================

fn bench_map_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/map_chain");

    for depth in [1, 16, 128] {
        let sink = StreamSink::new();
        let mut tail: Stream<u64> = sink.stream();
        for _ in 0..depth {
            tail = tail.map(|x| x + 1);
        }
        let _listener = tail.listen(|x| {
            black_box(*x);
        });

        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| sink.send(black_box(1)).unwrap())
        });
    }

    group.finish();
}

// ============================================================================
// Fan-in
// ============================================================================

fn bench_fan_in(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/lift_all");

    for width in [4, 32, 256] {
        let source = CellSink::new(0u64);
        let views: Vec<Cell<u64>> = (0..width).map(|k| source.map(move |x| x + k)).collect();
        let total = Cell::lift_all(&views, |values| values.iter().sum::<u64>());
        let _listener = total.listen(|x| {
            black_box(*x);
        });

        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| source.send(black_box(1)).unwrap())
        });
    }

    group.finish();
}

// ============================================================================
// Transactions
// ============================================================================

fn bench_batched_sends(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/batched");

    let sink = StreamSink::with_coalescer(|a: &u64, b: &u64| a + b);
    let total = sink.accum(0u64, |a, s| a + s);
    let _listener = total.listen(|x| {
        black_box(*x);
    });

    for batch in [1, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter(|| {
                Transaction::run(|_| {
                    for i in 0..batch {
                        sink.send(black_box(i)).unwrap();
                    }
                })
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_map_chain, bench_fan_in, bench_batched_sends);
criterion_main!(benches);
