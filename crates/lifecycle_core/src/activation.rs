//! Activation callbacks.
//!
//! An activation callback receives the observed value (or key) and returns a
//! future that resolves to the [`Teardown`] for that activation. Callbacks are
//! always invoked from inside a scheduled task, never inline from an event
//! handler.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use futures::FutureExt;
use futures::future::LocalBoxFuture;

use crate::error::{ActivationError, panic_message};
use crate::teardown::Teardown;

/// The future returned by an activation callback.
pub type ActivationFuture = LocalBoxFuture<'static, anyhow::Result<Teardown>>;

/// A type-erased, shareable activation callback.
pub type ActivateFn<V> = Rc<dyn Fn(V) -> ActivationFuture>;

/// Adapt a closure returning any future into an [`ActivateFn`].
pub fn activator<V, F, Fut>(f: F) -> ActivateFn<V>
where
    F: Fn(V) -> Fut + 'static,
    Fut: Future<Output = anyhow::Result<Teardown>> + 'static,
{
    Rc::new(move |value| f(value).boxed_local())
}

/// Invoke an activation callback and await its result.
///
/// The callback itself runs inside the returned future, so a panic raised
/// either while building the future or while polling it is captured and
/// turned into [`ActivationError::Panicked`].
///
/// # Errors
///
/// Returns [`ActivationError::Failed`] if the callback returned an error and
/// [`ActivationError::Panicked`] if it panicked.
pub async fn invoke<V>(
    activate: ActivateFn<V>,
    value: V,
    context: String,
) -> Result<Teardown, ActivationError> {
    let outcome = AssertUnwindSafe(async move { activate(value).await })
        .catch_unwind()
        .await;
    match outcome {
        Ok(Ok(teardown)) => Ok(teardown),
        Ok(Err(source)) => Err(ActivationError::Failed { context, source }),
        Err(payload) => Err(ActivationError::Panicked {
            context,
            message: panic_message(payload.as_ref()),
        }),
    }
}
