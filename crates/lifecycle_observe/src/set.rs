//! Set observer: one activation per eligible member of a dynamic set.
//!
//! Each key moves through `Dead → Inflight → Active → Dead`. Membership
//! events register and unregister keys; eligibility changes move them between
//! Dead and Inflight/Active. Resolutions that arrive after the key left
//! Inflight are torn down instead of stored.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::rc::Rc;

use lifecycle_core::{
    ActivateFn, ActivationError, ActivationFuture, Dispatcher, SetSource, Subscription, Teardown,
    activator, invoke,
};
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::registry::{Always, Eligibility, KeyState, Registry};

/// Activation callback that also receives the key's [`Lease`].
pub(crate) type LeasedActivateFn<K> = Rc<dyn Fn(K, Lease) -> ActivationFuture>;

/// Held by one dispatched activation while its key stays tracked and eligible.
///
/// Revoked synchronously when the key is removed, loses eligibility or its
/// activation fails, before any teardown is scheduled.
#[derive(Debug, Clone)]
pub(crate) struct Lease(Rc<Cell<bool>>);

impl Lease {
    fn new() -> Self {
        Self(Rc::new(Cell::new(true)))
    }

    pub(crate) fn is_held(&self) -> bool {
        self.0.get()
    }

    fn revoke(&self) {
        self.0.set(false);
    }
}

/// Configuration for a set observer.
pub struct WatchSet<S: SetSource, E = Always> {
    source: S,
    set: S::SetId,
    eligibility: E,
    label: Option<String>,
}

impl<S: SetSource> WatchSet<S, Always> {
    /// Watch every member of `set` in `source`.
    #[must_use]
    pub fn new(source: S, set: S::SetId) -> Self {
        Self {
            source,
            set,
            eligibility: Always,
            label: None,
        }
    }
}

impl<S: SetSource, E> WatchSet<S, E> {
    /// Only activate members accepted by `eligibility`.
    #[must_use]
    pub fn within<E2: Eligibility<S::Key>>(self, eligibility: E2) -> WatchSet<S, E2> {
        WatchSet {
            source: self.source,
            set: self.set,
            eligibility,
            label: self.label,
        }
    }

    /// Name this observer in logs and error reports.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl<S, E> WatchSet<S, E>
where
    S: SetSource,
    E: Eligibility<S::Key> + 'static,
{
    /// Start observing.
    ///
    /// Existing members are enumerated on the next scheduling opportunity,
    /// not inside this call.
    pub fn start<F, Fut>(self, dispatcher: &Dispatcher, activate: F) -> SetObserver<S::Key>
    where
        F: Fn(S::Key) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<Teardown>> + 'static,
    {
        let activate = activator(activate);
        self.start_with(dispatcher, Rc::new(move |key: S::Key, _lease: Lease| activate(key)))
    }

    pub(crate) fn start_with(
        self,
        dispatcher: &Dispatcher,
        activate: LeasedActivateFn<S::Key>,
    ) -> SetObserver<S::Key> {
        let label = self
            .label
            .unwrap_or_else(|| format!("set {:?}", self.set));
        let core = Rc::new(SetCore {
            registry: RefCell::new(Registry::new()),
            leases: RefCell::new(HashMap::new()),
            stopped: Cell::new(false),
            dispatcher: dispatcher.clone(),
            activate,
            eligibility: Box::new(self.eligibility),
            label,
            instance_id: Uuid::new_v4(),
        });

        let added = {
            let core = Rc::downgrade(&core);
            self.source.subscribe_added(
                &self.set,
                Box::new(move |key| {
                    if let Some(core) = core.upgrade() {
                        core.key_added(key.clone());
                    }
                }),
            )
        };
        let removed = {
            let core = Rc::downgrade(&core);
            self.source.subscribe_removed(
                &self.set,
                Box::new(move |key| {
                    if let Some(core) = core.upgrade() {
                        core.key_removed(key);
                    }
                }),
            )
        };

        {
            let core = Rc::downgrade(&core);
            let source = self.source.clone();
            let set = self.set.clone();
            dispatcher.spawn("initial-enumeration", async move {
                let Some(core) = core.upgrade() else {
                    return;
                };
                if core.stopped.get() {
                    return;
                }
                let members = source.current_members(&set);
                debug!(
                    instance_id = %core.instance_id,
                    count = members.len(),
                    "enumerating existing members"
                );
                for key in members {
                    core.key_added(key);
                }
            });
        }

        info!(instance_id = %core.instance_id, label = %core.label, "set observer started");
        SetObserver {
            core,
            subscriptions: vec![added, removed],
        }
    }
}

struct SetCore<K> {
    registry: RefCell<Registry<K>>,
    leases: RefCell<HashMap<K, Lease>>,
    stopped: Cell<bool>,
    dispatcher: Dispatcher,
    activate: LeasedActivateFn<K>,
    eligibility: Box<dyn Eligibility<K>>,
    label: String,
    instance_id: Uuid,
}

impl<K: Clone + Eq + Hash + Debug + 'static> SetCore<K> {
    fn key_added(self: &Rc<Self>, key: K) {
        if self.stopped.get() || !self.registry.borrow_mut().insert(key.clone()) {
            return;
        }
        trace!(instance_id = %self.instance_id, ?key, "key registered");

        let core = Rc::downgrade(self);
        let watched = key.clone();
        let watch = self.eligibility.watch(
            &key,
            Box::new(move || {
                if let Some(core) = core.upgrade() {
                    core.reevaluate(&watched);
                }
            }),
        );
        if let Some(watch) = watch {
            drop(self.registry.borrow_mut().attach_watch(&key, watch));
        }
        self.reevaluate(&key);
    }

    fn reevaluate(self: &Rc<Self>, key: &K) {
        if !self.registry.borrow().contains(key) {
            return;
        }
        if self.eligibility.is_eligible(key) {
            let ticket = self.registry.borrow_mut().begin(key);
            if let Some(ticket) = ticket {
                self.dispatch(key.clone(), ticket);
            }
        } else {
            self.revoke(key);
            let released = self.registry.borrow_mut().deactivate(key);
            if let Some(teardown) = released {
                debug!(instance_id = %self.instance_id, ?key, "key lost eligibility");
                self.dispatcher.schedule_teardown(teardown);
            }
        }
    }

    fn dispatch(self: &Rc<Self>, key: K, ticket: u64) {
        let lease = Lease::new();
        if let Some(previous) = self.leases.borrow_mut().insert(key.clone(), lease.clone()) {
            previous.revoke();
        }
        let core = Rc::downgrade(self);
        let dispatcher = self.dispatcher.clone();
        let activate: ActivateFn<K> = {
            let activate = Rc::clone(&self.activate);
            Rc::new(move |key: K| activate(key, lease.clone()))
        };
        let context = format!("{} {:?}", self.label, key);
        debug!(instance_id = %self.instance_id, ?key, ticket, "dispatching activation");
        self.dispatcher.spawn("activation", async move {
            let outcome = invoke(activate, key.clone(), context).await;
            match core.upgrade() {
                Some(core) => core.settle(&key, ticket, outcome),
                None => match outcome {
                    Ok(teardown) => dispatcher.schedule_teardown(teardown),
                    Err(err) => dispatcher.report(err),
                },
            }
        });
    }

    fn settle(&self, key: &K, ticket: u64, outcome: Result<Teardown, ActivationError>) {
        match outcome {
            Ok(teardown) => {
                let rejected = self.registry.borrow_mut().settle(key, ticket, teardown);
                if let Some(teardown) = rejected {
                    debug!(instance_id = %self.instance_id, ?key, ticket, "discarding stale activation");
                    self.dispatcher.schedule_teardown(teardown);
                }
            }
            Err(err) => {
                let current = self.registry.borrow_mut().fail(key, ticket);
                if current {
                    self.revoke(key);
                }
                trace!(instance_id = %self.instance_id, ?key, current, "activation failed");
                self.dispatcher.report(err);
            }
        }
    }

    fn revoke(&self, key: &K) {
        let lease = self.leases.borrow_mut().remove(key);
        if let Some(lease) = lease {
            lease.revoke();
        }
    }

    fn key_removed(&self, key: &K) {
        self.revoke(key);
        let removed = self.registry.borrow_mut().remove(key);
        let Some(removed) = removed else {
            return;
        };
        if let Some(teardown) = removed.teardown {
            self.dispatcher.schedule_teardown(teardown);
        }
        drop(removed.watch);
        trace!(instance_id = %self.instance_id, ?key, "key unregistered");
    }

    fn drain(&self) {
        loop {
            let next = self.registry.borrow().first_key();
            let Some(key) = next else {
                break;
            };
            self.key_removed(&key);
        }
    }
}

/// A running set observer. Stops when dropped.
#[must_use = "dropping a SetObserver stops it"]
pub struct SetObserver<K: Clone + Eq + Hash + Debug + 'static> {
    core: Rc<SetCore<K>>,
    subscriptions: Vec<Subscription>,
}

impl<K: Clone + Eq + Hash + Debug + 'static> SetObserver<K> {
    /// Cancel membership subscriptions, then force every tracked key out,
    /// scheduling teardown for each held activation. Further calls have no
    /// effect.
    pub fn stop(&mut self) {
        if self.core.stopped.replace(true) {
            return;
        }
        self.subscriptions.clear();
        self.core.drain();
        debug!(instance_id = %self.core.instance_id, label = %self.core.label, "set observer stopped");
    }

    /// Returns `true` once stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.core.stopped.get()
    }

    /// Returns the state of `key`, or `None` if it is not tracked.
    #[must_use]
    pub fn state(&self, key: &K) -> Option<KeyState> {
        self.core.registry.borrow().state(key)
    }

    /// Returns the number of tracked keys.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.core.registry.borrow().len()
    }

    /// Returns the keys currently holding an activation.
    #[must_use]
    pub fn active_keys(&self) -> Vec<K> {
        self.core.registry.borrow().active_keys()
    }

    /// Returns the unique id of this observer instance.
    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.core.instance_id
    }
}

impl<K: Clone + Eq + Hash + Debug + 'static> Drop for SetObserver<K> {
    fn drop(&mut self) {
        self.stop();
    }
}
