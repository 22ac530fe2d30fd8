//! Cell Loops
//!
//! The cell counterpart of [`StreamLoop`]: a forward reference to a cell,
//! usable before its definition, bound exactly once within the transaction
//! that created it.

use std::ops::Deref;

use super::cell::Cell;
use super::stream_loop::StreamLoop;
use crate::error::Result;
use crate::transaction::Transaction;

/// A forward reference to a cell.
///
/// # Example
///
/// ```rust,ignore
/// let total = Transaction::run(|trans| {
///     let total = CellLoop::new(trans);
///     let next = deposits.snapshot(&total, |d, t| d + t).hold(0);
///     total.bind(&next)?;
///     Ok(next)
/// })?;
/// ```
pub struct CellLoop<A> {
    updates: StreamLoop<A>,
    cell: Cell<A>,
}

impl<A> CellLoop<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Create an unbound loop. Sampling it before [`bind`](Self::bind) is an
    /// error; so is closing `trans` without binding it.
    pub fn new(trans: &Transaction) -> Self {
        let updates = StreamLoop::new(trans);
        let cell = Cell::from_stream(updates.stream(), None, None);
        Self { updates, cell }
    }

    /// Make this loop follow `source`: it takes `source`'s value at the end
    /// of this instant and every update after that.
    ///
    /// Returns [`Error::LoopAlreadyBound`](crate::Error::LoopAlreadyBound) on
    /// the second and later calls.
    pub fn bind(&self, source: &Cell<A>) -> Result<()> {
        Transaction::run(|trans| {
            self.updates.bind(&source.updates())?;
            self.cell.set_lazy(source.sample_lazy_in(trans));
            Ok(())
        })
    }

    pub fn is_bound(&self) -> bool {
        self.updates.is_bound()
    }

    /// The loop as a plain cell handle.
    pub fn cell(&self) -> Cell<A> {
        self.cell.clone()
    }
}

impl<A> Deref for CellLoop<A> {
    type Target = Cell<A>;

    fn deref(&self) -> &Cell<A> {
        &self.cell
    }
}
