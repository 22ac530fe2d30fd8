//! Usage Errors
//!
//! Propagation itself cannot partially fail: once an instant starts it either
//! drains completely or unwinds because a user-supplied function panicked.
//! What can go wrong is the *calling code* breaking one of the engine's
//! preconditions. Those violations are reported through [`Error`].

use thiserror::Error;

/// Result alias used by the fallible entry points of this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A precondition of the engine was violated by the calling code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// `send` was called from inside a callback the engine is running, such as
    /// a listener, or a function passed to `map`/`filter`/`snapshot`.
    #[error("send() is not allowed inside a propagation callback; start a new top-level send instead")]
    SendInCallback,

    /// A `StreamLoop` or `CellLoop` was bound a second time.
    #[error("loop has already been bound")]
    LoopAlreadyBound,

    /// A `CellLoop` was sampled before it was bound to its definition.
    #[error("cell loop was sampled before it was bound")]
    LoopNotBound,

    /// A loop was created inside a transaction that closed without binding it.
    #[error("transaction closed with a loop that was never bound")]
    LoopNeverBound,
}
