//! Teardown handles.
//!
//! A [`Teardown`] represents "setup has run, teardown has not yet run". It is
//! consumed by [`Teardown::run`], so the engine can invoke it at most once.

use std::fmt;
use std::future::Future;

use futures::FutureExt;
use futures::future::LocalBoxFuture;

enum Action {
    Sync(Box<dyn FnOnce()>),
    Async(LocalBoxFuture<'static, ()>),
    Noop,
}

/// The live result of a successful activation.
#[must_use = "a teardown that is never run leaks its activation"]
pub struct Teardown {
    action: Action,
}

impl Teardown {
    /// Create a teardown from a synchronous closure.
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self {
            action: Action::Sync(Box::new(f)),
        }
    }

    /// Create a teardown that awaits a future.
    pub fn from_future(fut: impl Future<Output = ()> + 'static) -> Self {
        Self {
            action: Action::Async(fut.boxed_local()),
        }
    }

    /// A teardown with nothing to undo.
    pub fn noop() -> Self {
        Self {
            action: Action::Noop,
        }
    }

    /// Returns `true` if running this teardown does nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self.action, Action::Noop)
    }

    /// Run the teardown, consuming it.
    pub async fn run(self) {
        match self.action {
            Action::Sync(f) => f(),
            Action::Async(fut) => fut.await,
            Action::Noop => {}
        }
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.action {
            Action::Sync(_) => "sync",
            Action::Async(_) => "async",
            Action::Noop => "noop",
        };
        f.debug_struct("Teardown").field("kind", &kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use futures::executor::block_on;

    use super::*;

    #[test]
    fn test_sync_teardown_runs_closure() {
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let teardown = Teardown::new(move || flag.set(true));
        block_on(teardown.run());
        assert!(ran.get());
    }

    #[test]
    fn test_async_teardown_awaits_future() {
        let ran = Rc::new(Cell::new(0));
        let counter = ran.clone();
        let teardown = Teardown::from_future(async move {
            counter.set(counter.get() + 1);
        });
        block_on(teardown.run());
        assert_eq!(ran.get(), 1);
    }

    #[test]
    fn test_noop() {
        let teardown = Teardown::noop();
        assert!(teardown.is_noop());
        assert_eq!(format!("{teardown:?}"), "Teardown { kind: \"noop\" }");
        block_on(teardown.run());
    }
}
