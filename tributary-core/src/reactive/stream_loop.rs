//! Stream Loops
//!
//! A loop is a stream that can be used before its definition exists, so that
//! a network can refer to its own output. It is created inside an explicit
//! transaction and must be bound exactly once before that transaction closes.
//!
//! Binding links the real source to the loop's node. When the source depends
//! on the loop itself this edge closes a cycle in the rank graph; the rank
//! cascade tolerates that, and because every cell reads the value from the
//! start of the instant, the self-reference sees the previous state rather
//! than recursing.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::stream::Stream;
use crate::error::{Error, Result};
use crate::transaction::Transaction;

/// A forward reference to a stream.
pub struct StreamLoop<A> {
    stream: Stream<A>,
    bound: Arc<AtomicBool>,
}

impl<A> StreamLoop<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Create an unbound loop. Closing `trans` without binding it is an
    /// error reported by [`Transaction::try_run`].
    pub fn new(trans: &Transaction) -> Self {
        let bound = Arc::new(AtomicBool::new(false));
        trans.expect_bound(bound.clone());
        Self {
            stream: Stream::new(),
            bound,
        }
    }

    /// Make this loop fire whatever `source` fires.
    ///
    /// Returns [`Error::LoopAlreadyBound`] on the second and later calls.
    pub fn bind(&self, source: &Stream<A>) -> Result<()> {
        if self.bound.swap(true, Ordering::AcqRel) {
            tracing::warn!("stream loop bound twice");
            return Err(Error::LoopAlreadyBound);
        }

        Transaction::run(|trans| {
            let listener = source.forward_in(trans, self.stream.node(), &self.stream, false);
            self.stream.own(listener);
        });
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    /// The loop as a plain stream handle.
    pub fn stream(&self) -> Stream<A> {
        self.stream.clone()
    }
}

impl<A> Deref for StreamLoop<A> {
    type Target = Stream<A>;

    fn deref(&self) -> &Stream<A> {
        &self.stream
    }
}
