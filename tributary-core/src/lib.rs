//! Tributary Core
//!
//! This crate provides a transactional, glitch-free propagation engine for
//! functional reactive programming. It implements:
//!
//! - Streams of discrete events and cells of time-varying values
//! - Transactions that make every update atomic and consistently ordered
//! - Loops for networks that refer to their own output
//! - Switching between dynamically selected streams and cells
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Rank graph that orders firings within an instant
//! - `transaction`: Open-or-join transactions and their phase queues
//! - `reactive`: Streams, cells, sinks, loops and listeners
//! - `time`: Optional clock-driven inputs
//!
//! # Example
//!
//! ```rust,ignore
//! use tributary_core::{CellSink, StreamSink, Transaction};
//!
//! let deposits = StreamSink::new();
//! let balance = deposits.accum(0, |amount: &i64, total| total + amount);
//!
//! let _listener = balance.listen(|total| println!("balance: {total}"));
//! // prints "balance: 0"
//!
//! Transaction::run(|_| {
//!     deposits.send(10)?;
//!     deposits.send(5)
//! })?;
//! // Both deposits land in one instant: prints "balance: 5"
//! // (each snapshot sees the balance from the start of the instant).
//! ```

pub mod error;
pub mod graph;
pub mod reactive;
pub mod time;
pub mod transaction;

pub use error::{Error, Result};
pub use reactive::{Cell, CellLoop, CellSink, Lazy, Listener, Stream, StreamLoop, StreamSink};
pub use transaction::Transaction;
