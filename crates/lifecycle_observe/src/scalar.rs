//! Scalar observer: one activation for the current value of a single slot.
//!
//! Every change notification re-reads the value and feeds it through a
//! [`GenerationSlot`], so the previous activation is torn down before the
//! next one is dispatched and late results from superseded values are
//! discarded.

use std::future::Future;
use std::rc::Rc;

use lifecycle_core::{
    Dispatcher, GenerationSlot, Guard, Subscription, Teardown, ValueSource, activator,
};
use tracing::{debug, info};
use uuid::Uuid;

/// Configuration for a scalar observer.
pub struct WatchValue<S: ValueSource> {
    source: S,
    key: S::Key,
    guard: Option<Guard<S::Value>>,
    label: Option<String>,
}

impl<S: ValueSource> WatchValue<S> {
    /// Watch the value behind `key` in `source`.
    #[must_use]
    pub fn new(source: S, key: S::Key) -> Self {
        Self {
            source,
            key,
            guard: None,
            label: None,
        }
    }

    /// Only activate for values accepted by `guard`.
    #[must_use]
    pub fn with_guard(mut self, guard: impl Fn(&S::Value) -> bool + 'static) -> Self {
        self.guard = Some(Rc::new(guard));
        self
    }

    /// Name this observer in logs and error reports.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Start observing.
    ///
    /// The current value is sampled on the next scheduling opportunity, not
    /// inside this call.
    pub fn start<F, Fut>(self, dispatcher: &Dispatcher, activate: F) -> ValueObserver<S::Value>
    where
        F: Fn(S::Value) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<Teardown>> + 'static,
    {
        let instance_id = Uuid::new_v4();
        let context = self
            .label
            .unwrap_or_else(|| format!("value {:?}", self.key));

        let mut slot = GenerationSlot::new(dispatcher.clone(), activator(activate), context.clone());
        if let Some(guard) = self.guard {
            slot = slot.with_guard(guard);
        }
        let slot = Rc::new(slot);

        let refresh: Rc<dyn Fn()> = {
            let slot = Rc::downgrade(&slot);
            let source = self.source.clone();
            let key = self.key.clone();
            Rc::new(move || {
                if let Some(slot) = slot.upgrade() {
                    slot.update(source.current_value(&key));
                }
            })
        };

        let on_change = Rc::clone(&refresh);
        let subscription = self
            .source
            .subscribe_change(&self.key, Box::new(move || on_change()));
        dispatcher.spawn("initial-sample", async move { refresh() });

        info!(%instance_id, context = %context, "value observer started");
        ValueObserver {
            slot,
            subscription,
            instance_id,
        }
    }
}

/// A running scalar observer. Stops when dropped.
#[must_use = "dropping a ValueObserver stops it"]
pub struct ValueObserver<V: 'static> {
    slot: Rc<GenerationSlot<V>>,
    subscription: Subscription,
    instance_id: Uuid,
}

impl<V: 'static> ValueObserver<V> {
    /// Cancel the change subscription and schedule teardown of the current
    /// activation. Further calls have no effect.
    pub fn stop(&mut self) {
        if self.slot.is_disposed() {
            return;
        }
        self.subscription.disconnect();
        self.slot.dispose();
        debug!(instance_id = %self.instance_id, context = self.slot.context(), "value observer stopped");
    }

    /// Returns `true` once stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.slot.is_disposed()
    }

    /// Returns `true` while a resolved activation is held.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.slot.is_active()
    }

    /// Returns the slot's generation counter.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.slot.generation()
    }

    /// Returns the unique id of this observer instance.
    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }
}

impl<V: 'static> Drop for ValueObserver<V> {
    fn drop(&mut self) {
        self.stop();
    }
}
