//! Single-threaded signals and subscriptions.
//!
//! Event sources use [`Signal`] to notify observers. Handlers are invoked
//! synchronously from [`Signal::fire`] with no internal borrow held, so a
//! handler may connect, disconnect or fire other signals.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

type Handler<T> = Rc<dyn Fn(&T)>;

struct SignalInner<T> {
    next_id: u64,
    handlers: Vec<(u64, Handler<T>)>,
}

impl<T> SignalInner<T> {
    fn is_connected(&self, id: u64) -> bool {
        self.handlers.iter().any(|(h, _)| *h == id)
    }
}

/// A multicast callback list.
///
/// Cloning yields another handle to the same signal.
pub struct Signal<T> {
    inner: Rc<RefCell<SignalInner<T>>>,
}

impl<T: 'static> Signal<T> {
    /// Create a signal with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SignalInner {
                next_id: 0,
                handlers: Vec::new(),
            })),
        }
    }

    /// Connect a handler. It stays connected until the returned
    /// [`Subscription`] is disconnected or dropped.
    pub fn connect(&self, handler: impl Fn(&T) + 'static) -> Subscription {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.handlers.push((id, Rc::new(handler)));
            id
        };
        let weak: Weak<RefCell<SignalInner<T>>> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().handlers.retain(|(h, _)| *h != id);
            }
        })
    }

    /// Invoke every connected handler with `value`.
    ///
    /// Handlers disconnected by an earlier handler in the same fire are skipped.
    pub fn fire(&self, value: &T) {
        let snapshot: Vec<(u64, Handler<T>)> = self.inner.borrow().handlers.clone();
        for (id, handler) in snapshot {
            if self.inner.borrow().is_connected(id) {
                handler(value);
            }
        }
    }

    /// Returns the number of connected handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.inner.borrow().handlers.len()
    }
}

impl<T: 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("handlers", &self.inner.borrow().handlers.len())
            .finish()
    }
}

/// A live connection to an event source.
///
/// Disconnects when dropped.
#[must_use = "dropping a subscription disconnects it"]
pub struct Subscription {
    disconnect: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Wrap a disconnect action.
    pub fn new(disconnect: impl FnOnce() + 'static) -> Self {
        Self {
            disconnect: Some(Box::new(disconnect)),
        }
    }

    /// A subscription that is already disconnected.
    pub fn empty() -> Self {
        Self { disconnect: None }
    }

    /// Disconnect. Calling this more than once has no further effect.
    pub fn disconnect(&mut self) {
        if let Some(disconnect) = self.disconnect.take() {
            disconnect();
        }
    }

    /// Returns `true` until [`disconnect`](Self::disconnect) has run.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.disconnect.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("connected", &self.is_connected())
            .finish()
    }
}
