//! Reactive Primitives
//!
//! This module implements the stream and cell algebra on top of the rank
//! graph and the transaction queues.
//!
//! # Concepts
//!
//! ## Streams
//!
//! A [`Stream`] is a sequence of discrete firings. Operators such as `map`,
//! `filter`, `merge` and `snapshot` derive new streams; a [`StreamSink`] is
//! fired by application code.
//!
//! ## Cells
//!
//! A [`Cell`] is a value that changes over time, built by holding a stream.
//! Its value only changes when a transaction commits, so everything running
//! inside an instant sees a consistent snapshot. Cells are combined with
//! `map`, `lift` and `apply`, and flattened with `switch_c`/`switch_s`.
//!
//! ## Loops
//!
//! [`StreamLoop`] and [`CellLoop`] are forward references, bound once, that
//! let a network refer to its own output (accumulators, state machines).
//!
//! ## Listeners
//!
//! Every subscription returns a [`Listener`]. Dropping it unsubscribes.
//!
//! # Implementation Notes
//!
//! Operators register actions against nodes in the rank graph. Firing a
//! stream queues those actions in the current transaction, which runs them
//! lowest rank first. Values reach a listener only after everything they
//! depend on has settled, so listeners never observe glitches.

mod cell;
mod cell_loop;
mod cell_sink;
mod context;
mod lazy;
mod lift;
mod listener;
mod stream;
mod stream_loop;
mod stream_sink;

pub use cell::Cell;
pub use cell_loop::CellLoop;
pub use cell_sink::CellSink;
pub use lazy::Lazy;
pub use lift::Func;
pub use listener::Listener;
pub use stream::Stream;
pub use stream_loop::StreamLoop;
pub use stream_sink::StreamSink;
