//! Cell Sinks

use std::ops::Deref;

use super::cell::Cell;
use super::stream_sink::StreamSink;
use crate::error::Result;

/// A cell whose value is set from outside the network.
pub struct CellSink<A> {
    sink: StreamSink<A>,
    cell: Cell<A>,
}

impl<A> CellSink<A>
where
    A: Clone + Send + Sync + 'static,
{
    pub fn new(initial: A) -> Self {
        let sink = StreamSink::new();
        let cell = sink.hold(initial);
        Self { sink, cell }
    }

    /// A cell sink that folds all values sent in one transaction with
    /// `combine` instead of keeping the last.
    pub fn with_coalescer(initial: A, combine: impl Fn(&A, &A) -> A + Send + Sync + 'static) -> Self {
        let sink = StreamSink::with_coalescer(combine);
        let cell = sink.hold(initial);
        Self { sink, cell }
    }

    /// Set a new value, visible once the sending transaction commits.
    ///
    /// Fails the same way as [`StreamSink::send`].
    pub fn send(&self, value: A) -> Result<()> {
        self.sink.send(value)
    }

    pub(crate) fn fire(&self, value: A) {
        self.sink.fire(value);
    }

    /// The cell as a plain handle.
    pub fn cell(&self) -> Cell<A> {
        self.cell.clone()
    }
}

impl<A> Clone for CellSink<A> {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
            cell: self.cell.clone(),
        }
    }
}

impl<A> Deref for CellSink<A> {
    type Target = Cell<A>;

    fn deref(&self) -> &Cell<A> {
        &self.cell
    }
}
