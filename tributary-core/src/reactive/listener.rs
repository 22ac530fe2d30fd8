//! Listener Handles
//!
//! Every subscription returns a [`Listener`]. Unregistering it (explicitly or
//! by dropping it) releases everything the subscription holds: its edge in the
//! rank graph, its entry in the source's target list, and any child listeners
//! it was composed from.

use parking_lot::Mutex;

type Teardown = Box<dyn FnOnce() + Send>;

/// Cancellation handle for a subscription.
///
/// The subscription stays active while the handle lives. Dropping the handle
/// unregisters it, like calling [`unlisten`](Self::unlisten).
///
/// # Example
///
/// ```rust,ignore
/// let sink = StreamSink::new();
/// let listener = sink.listen(|x: &i32| println!("{x}"));
/// sink.send(1)?;
/// listener.unlisten();
/// ```
#[must_use = "dropping a Listener unregisters it immediately"]
pub struct Listener {
    teardown: Mutex<Option<Teardown>>,
    children: Vec<Listener>,
}

impl Listener {
    /// A listener that runs `teardown` once when it is unregistered.
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Mutex::new(Some(Box::new(teardown))),
            children: Vec::new(),
        }
    }

    /// A listener that holds nothing.
    pub fn empty() -> Self {
        Self {
            teardown: Mutex::new(None),
            children: Vec::new(),
        }
    }

    /// Compose two listeners: unregistering the result unregisters both.
    pub fn append(mut self, other: Listener) -> Listener {
        self.children.push(other);
        self
    }

    /// Unregister the subscription and every composed child.
    ///
    /// Calling this more than once has no further effect.
    pub fn unlisten(&self) {
        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
        for child in &self.children {
            child.unlisten();
        }
    }

    /// Whether this listener or any child is still registered.
    pub fn is_listening(&self) -> bool {
        self.teardown.lock().is_some() || self.children.iter().any(Listener::is_listening)
    }
}

impl Default for Listener {
    fn default() -> Self {
        Self::empty()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.unlisten();
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("listening", &self.is_listening())
            .field("children", &self.children.len())
            .finish()
    }
}
