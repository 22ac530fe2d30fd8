//! Callback Context
//!
//! The callback context tracks whether the current thread is running code on
//! behalf of the engine: a function passed to an operator, or a listener
//! callback. While it is active, `send` is rejected, because firing a value
//! from inside propagation would re-enter it inconsistently.
//!
//! # Implementation
//!
//! A thread-local depth counter is bumped when a callback starts and
//! dropped when the returned guard goes out of scope, so the depth is
//! restored even if the callback panics.
//!
//! Listener teardown requested while a callback runs is queued here and
//! performed when the outermost callback returns.

use std::cell::{Cell, RefCell};

type Teardown = Box<dyn FnOnce()>;

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static DEFERRED: RefCell<Vec<Teardown>> = const { RefCell::new(Vec::new()) };
}

/// Guard marking the current thread as inside an engine callback.
pub struct CallbackContext {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl CallbackContext {
    /// Enter a callback. The context is exited when the guard is dropped.
    pub fn enter() -> Self {
        DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self {
            _not_send: std::marker::PhantomData,
        }
    }

    /// Check if any callback is running on this thread.
    pub fn is_active() -> bool {
        DEPTH.with(|depth| depth.get() > 0)
    }

    /// Run `teardown` now, or once the outermost callback returns if one is
    /// running.
    pub fn defer_or_run(teardown: impl FnOnce() + 'static) {
        if Self::is_active() {
            DEFERRED.with(|queue| queue.borrow_mut().push(Box::new(teardown)));
        } else {
            teardown();
        }
    }
}

impl Drop for CallbackContext {
    fn drop(&mut self) {
        let outermost = DEPTH.with(|depth| {
            let remaining = depth.get().saturating_sub(1);
            depth.set(remaining);
            remaining == 0
        });

        if outermost {
            // A teardown may itself drop handles that queue more teardowns.
            loop {
                let pending = DEFERRED.with(|queue| std::mem::take(&mut *queue.borrow_mut()));
                if pending.is_empty() {
                    break;
                }
                for teardown in pending {
                    teardown();
                }
            }
        }
    }
}
