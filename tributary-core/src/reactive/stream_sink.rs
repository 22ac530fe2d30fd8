//! Stream Sinks
//!
//! A sink is a stream that application code fires by hand. It is the entry
//! point of every propagation: each `send` outside a transaction opens one.

use std::ops::Deref;

use super::context::CallbackContext;
use super::stream::Stream;
use crate::error::{Error, Result};
use crate::transaction::Transaction;

/// A stream fired from outside the network.
///
/// # Example
///
/// ```rust,ignore
/// let sink = StreamSink::with_coalescer(|a: &i32, b: &i32| a + b);
/// Transaction::run(|_| {
///     sink.send(1)?;
///     sink.send(2) // listeners see a single firing of 3
/// })?;
/// ```
pub struct StreamSink<A> {
    /// Where `send` fires.
    input: Stream<A>,

    /// What subscribers see. Same as `input` unless coalescing.
    output: Stream<A>,
}

impl<A> StreamSink<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// A sink that passes every sent value through as its own firing.
    pub fn new() -> Self {
        let stream = Stream::new();
        Self {
            input: stream.clone(),
            output: stream,
        }
    }

    /// A sink that folds all values sent in one transaction into a single
    /// firing with `combine`.
    pub fn with_coalescer(combine: impl Fn(&A, &A) -> A + Send + Sync + 'static) -> Self {
        let input = Stream::new();
        let output = input.coalesce(combine);
        Self { input, output }
    }

    /// Fire `value` in the current transaction, or in a new one.
    ///
    /// Returns [`Error::SendInCallback`] when called from inside a callback
    /// the engine is running. Start a new top-level send from outside the
    /// callback instead.
    pub fn send(&self, value: A) -> Result<()> {
        if CallbackContext::is_active() {
            tracing::warn!("send() rejected inside a propagation callback");
            return Err(Error::SendInCallback);
        }
        self.fire(value);
        Ok(())
    }

    /// Fire without the callback check. For the engine's own drivers, which
    /// run from transaction start hooks.
    pub(crate) fn fire(&self, value: A) {
        Transaction::run(|trans| self.input.send_in(trans, value));
    }

    /// The stream subscribers see.
    pub fn stream(&self) -> Stream<A> {
        self.output.clone()
    }
}

impl<A> Default for StreamSink<A>
where
    A: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for StreamSink<A> {
    fn clone(&self) -> Self {
        Self {
            input: self.input.clone(),
            output: self.output.clone(),
        }
    }
}

impl<A> Deref for StreamSink<A> {
    type Target = Stream<A>;

    fn deref(&self) -> &Stream<A> {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn send_fires_listeners() {
        let sink = StreamSink::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _l = sink.listen(move |x: &i32| seen_clone.lock().push(*x));

        sink.send(1).unwrap();
        sink.send(2).unwrap();

        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn coalescer_combines_sends_of_one_transaction() {
        let sink = StreamSink::with_coalescer(|a: &i32, b: &i32| a + b);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _l = sink.listen(move |x| seen_clone.lock().push(*x));

        Transaction::run(|_| {
            sink.send(1).unwrap();
            sink.send(2).unwrap();
        });
        sink.send(5).unwrap();

        assert_eq!(*seen.lock(), vec![3, 5]);
    }

    #[test]
    fn send_from_listener_is_rejected() {
        let sink = StreamSink::new();
        let other: StreamSink<i32> = StreamSink::new();
        let result = Arc::new(Mutex::new(None));

        let result_clone = result.clone();
        let other_clone = other.clone();
        let _l = sink.listen(move |x: &i32| {
            *result_clone.lock() = Some(other_clone.send(*x));
        });

        sink.send(1).unwrap();
        assert_eq!(*result.lock(), Some(Err(Error::SendInCallback)));
    }
}
