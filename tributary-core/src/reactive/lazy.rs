//! Deferred values.

use std::sync::Arc;

/// A value computed on demand.
///
/// Used for initial values that may not be known when a cell is constructed,
/// such as the state of a loop that is bound later in the same transaction.
/// The computation is re-run on every [`get`](Self::get); callers that need
/// the result more than once cache it themselves.
pub struct Lazy<A> {
    f: Arc<dyn Fn() -> A + Send + Sync>,
}

impl<A: 'static> Lazy<A> {
    pub fn new(f: impl Fn() -> A + Send + Sync + 'static) -> Self {
        Self { f: Arc::new(f) }
    }

    /// A lazy value that is already known.
    pub fn from_value(value: A) -> Self
    where
        A: Clone + Send + Sync,
    {
        Self::new(move || value.clone())
    }

    pub fn get(&self) -> A {
        (self.f)()
    }

    pub fn map<B: 'static>(&self, f: impl Fn(A) -> B + Send + Sync + 'static) -> Lazy<B> {
        let this = self.clone();
        Lazy::new(move || f(this.get()))
    }

    /// Combine two lazy values with `f`.
    pub fn lift<B: 'static, C: 'static>(
        &self,
        other: &Lazy<B>,
        f: impl Fn(A, B) -> C + Send + Sync + 'static,
    ) -> Lazy<C> {
        let a = self.clone();
        let b = other.clone();
        Lazy::new(move || f(a.get(), b.get()))
    }
}

impl<A> Clone for Lazy<A> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<A> std::fmt::Debug for Lazy<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Lazy(..)")
    }
}
