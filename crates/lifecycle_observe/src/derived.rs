//! Derived observer: one activation per transient child of each set member.
//!
//! A [`SetObserver`] tracks the parents. Each active parent owns a
//! [`ChildTracker`] holding a [`GenerationSlot`] fed by "child appeared" and
//! "child detached" events instead of value changes. Removing the parent
//! revokes its lease at once, so the tracker ignores further children, and
//! the parent's teardown disposes the tracker along with the current child
//! activation.

use std::cell::RefCell;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::rc::Rc;

use futures::FutureExt;
use lifecycle_core::{
    ActivateFn, ActivationFuture, ChildSource, Dispatcher, GenerationSlot, SetSource, Subscription,
    Teardown,
};
use tracing::trace;
use uuid::Uuid;

use crate::registry::KeyState;
use crate::set::{Lease, LeasedActivateFn, SetObserver, WatchSet};

type ChildActivateFn<P, C> = Rc<dyn Fn(P, C) -> ActivationFuture>;

/// Configuration for a derived observer.
pub struct WatchChildren<S: SetSource, C> {
    parents: S,
    set: S::SetId,
    children: C,
    label: Option<String>,
}

impl<S, C> WatchChildren<S, C>
where
    S: SetSource,
    C: ChildSource<Parent = S::Key>,
{
    /// Watch the children of every member of `set`.
    #[must_use]
    pub fn new(parents: S, set: S::SetId, children: C) -> Self {
        Self {
            parents,
            set,
            children,
            label: None,
        }
    }

    /// Name this observer in logs and error reports.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Start observing. `activate` receives the parent and its current child.
    pub fn start<F, Fut>(self, dispatcher: &Dispatcher, activate: F) -> ChildObserver<S::Key>
    where
        F: Fn(S::Key, C::Child) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<Teardown>> + 'static,
    {
        let activate: ChildActivateFn<S::Key, C::Child> =
            Rc::new(move |parent: S::Key, child: C::Child| activate(parent, child).boxed_local());
        let label = self
            .label
            .unwrap_or_else(|| format!("children of {:?}", self.set));

        let per_parent: LeasedActivateFn<S::Key> = {
            let children = self.children;
            let dispatcher = dispatcher.clone();
            let label = label.clone();
            Rc::new(move |parent: S::Key, lease: Lease| {
                let children = children.clone();
                let dispatcher = dispatcher.clone();
                let activate = Rc::clone(&activate);
                let label = label.clone();
                async move {
                    if !lease.is_held() {
                        return Ok(Teardown::noop());
                    }
                    let tracker =
                        ChildTracker::attach(children, dispatcher, parent, lease, activate, &label);
                    Ok(Teardown::new(move || tracker.detach()))
                }
                .boxed_local()
            })
        };

        let parents = WatchSet::new(self.parents, self.set)
            .with_label(label)
            .start_with(dispatcher, per_parent);
        ChildObserver { parents }
    }
}

/// Follows the current child of one parent.
struct ChildTracker<C: ChildSource> {
    source: C,
    slot: GenerationSlot<C::Child>,
    lease: Lease,
    current: RefCell<Option<(C::Child, Subscription)>>,
    appeared: RefCell<Option<Subscription>>,
}

impl<C: ChildSource> ChildTracker<C> {
    fn attach(
        source: C,
        dispatcher: Dispatcher,
        parent: C::Parent,
        lease: Lease,
        activate: ChildActivateFn<C::Parent, C::Child>,
        label: &str,
    ) -> Rc<Self> {
        let slot_activate: ActivateFn<C::Child> = {
            let parent = parent.clone();
            Rc::new(move |child: C::Child| activate(parent.clone(), child))
        };
        let tracker = Rc::new(Self {
            source: source.clone(),
            slot: GenerationSlot::new(dispatcher, slot_activate, format!("{label} {parent:?}")),
            lease,
            current: RefCell::new(None),
            appeared: RefCell::new(None),
        });

        let appeared = {
            let tracker = Rc::downgrade(&tracker);
            source.subscribe_child_added(
                &parent,
                Box::new(move |child| {
                    if let Some(tracker) = tracker.upgrade() {
                        tracker.child_appeared(child.clone());
                    }
                }),
            )
        };
        *tracker.appeared.borrow_mut() = Some(appeared);

        if let Some(child) = source.current_child(&parent) {
            tracker.child_appeared(child);
        }
        tracker
    }

    fn child_appeared(self: &Rc<Self>, child: C::Child) {
        if self.slot.is_disposed() || !self.lease.is_held() {
            return;
        }
        let known = self
            .current
            .borrow()
            .as_ref()
            .is_some_and(|(current, _)| *current == child);
        if known {
            return;
        }

        let detached = {
            let tracker = Rc::downgrade(self);
            let watched = child.clone();
            self.source.subscribe_detached(
                &child,
                Box::new(move || {
                    if let Some(tracker) = tracker.upgrade() {
                        tracker.child_detached(&watched);
                    }
                }),
            )
        };
        drop(self.current.replace(Some((child.clone(), detached))));
        trace!(context = %self.slot.context(), ?child, "child appeared");
        self.slot.update(Some(child));
    }

    fn child_detached(&self, child: &C::Child) {
        let matches = self
            .current
            .borrow()
            .as_ref()
            .is_some_and(|(current, _)| current == child);
        if !matches {
            return;
        }
        drop(self.current.take());
        trace!(context = %self.slot.context(), ?child, "child detached");
        self.slot.update(None);
    }

    fn detach(&self) {
        drop(self.appeared.take());
        drop(self.current.take());
        self.slot.dispose();
    }
}

/// A running derived observer. Stops when dropped.
#[must_use = "dropping a ChildObserver stops it"]
pub struct ChildObserver<P: Clone + Eq + Hash + Debug + 'static> {
    parents: SetObserver<P>,
}

impl<P: Clone + Eq + Hash + Debug + 'static> ChildObserver<P> {
    /// Stop tracking parents and tear down every child activation.
    pub fn stop(&mut self) {
        self.parents.stop();
    }

    /// Returns `true` once stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.parents.is_stopped()
    }

    /// Returns the state of `parent`'s tracker, or `None` if untracked.
    #[must_use]
    pub fn parent_state(&self, parent: &P) -> Option<KeyState> {
        self.parents.state(parent)
    }

    /// Returns the number of tracked parents.
    #[must_use]
    pub fn tracked_parents(&self) -> usize {
        self.parents.tracked()
    }

    /// Returns the unique id of the underlying parent observer.
    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.parents.instance_id()
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::LocalPool;

    use super::*;
    use crate::fixtures::{Children, Members, Probe};

    const PLAYERS: &str = "Players";

    struct Harness {
        pool: LocalPool,
        dispatcher: Dispatcher,
        members: Members,
        children: Children,
        probe: Probe<(u32, u32)>,
    }

    impl Harness {
        fn new(probe: Probe<(u32, u32)>) -> Self {
            let pool = LocalPool::new();
            let dispatcher = Dispatcher::new(pool.spawner());
            Self {
                pool,
                dispatcher,
                members: Members::default(),
                children: Children::default(),
                probe,
            }
        }

        fn start(&self) -> ChildObserver<u32> {
            let activate = self.probe.activator();
            WatchChildren::new(self.members.clone(), PLAYERS, self.children.clone()).start(
                &self.dispatcher,
                move |parent, child| -> ActivationFuture { activate((parent, child)) },
            )
        }

        fn run(&mut self) {
            self.pool.run_until_stalled();
        }
    }

    #[test]
    fn test_existing_child_is_activated() {
        let mut h = Harness::new(Probe::immediate());
        h.members.insert(1);
        h.children.preset(1, 100);
        let observer = h.start();
        h.run();
        assert_eq!(h.probe.started(), vec![(1, 100)]);
        assert_eq!(observer.parent_state(&1), Some(KeyState::Active));
        assert_eq!(observer.tracked_parents(), 1);
    }

    #[test]
    fn test_respawn_tears_down_previous_child() {
        let mut h = Harness::new(Probe::immediate());
        h.members.insert(1);
        let _observer = h.start();
        h.run();
        assert!(h.probe.started().is_empty());

        h.children.spawn(1, 100);
        h.run();
        h.children.spawn(1, 101);
        h.run();
        assert_eq!(h.probe.started(), vec![(1, 100), (1, 101)]);
        assert_eq!(h.probe.torn_down(), vec![(1, 100)]);
        assert_eq!(h.probe.live(), 1);
    }

    #[test]
    fn test_child_removal_does_not_wait_for_parent() {
        let mut h = Harness::new(Probe::immediate());
        h.members.insert(1);
        h.children.preset(1, 100);
        let observer = h.start();
        h.run();

        h.children.kill(1);
        h.run();
        assert_eq!(h.probe.torn_down(), vec![(1, 100)]);
        assert_eq!(observer.parent_state(&1), Some(KeyState::Active));

        h.children.spawn(1, 101);
        h.run();
        assert_eq!(h.probe.started(), vec![(1, 100), (1, 101)]);
    }

    #[test]
    fn test_parent_removal_tears_down_child() {
        let mut h = Harness::new(Probe::immediate());
        h.members.insert(1);
        h.children.preset(1, 100);
        let observer = h.start();
        h.run();

        h.members.remove(1);
        h.run();
        assert_eq!(h.probe.torn_down(), vec![(1, 100)]);
        assert_eq!(observer.parent_state(&1), None);

        h.children.spawn(1, 101);
        h.run();
        assert_eq!(h.probe.started(), vec![(1, 100)]);
    }

    #[test]
    fn test_removed_parent_ignores_new_children_at_once() {
        let mut h = Harness::new(Probe::immediate());
        h.members.insert(1);
        h.children.preset(1, 100);
        let observer = h.start();
        h.run();

        h.members.remove(1);
        h.children.spawn(1, 101);
        h.run();
        assert_eq!(h.probe.started(), vec![(1, 100)]);
        assert_eq!(h.probe.torn_down(), vec![(1, 100)]);
        assert_eq!(observer.tracked_parents(), 0);
    }

    #[test]
    fn test_parent_removed_before_activation_never_attaches() {
        let mut h = Harness::new(Probe::immediate());
        h.children.preset(1, 100);
        let _observer = h.start();
        h.run();

        h.members.insert(1);
        h.members.remove(1);
        h.run();
        assert!(h.probe.started().is_empty());
        assert_eq!(h.children.added_listeners(1), 0);
    }

    #[test]
    fn test_stale_child_result_is_discarded() {
        let mut h = Harness::new(Probe::gated());
        h.members.insert(1);
        let _observer = h.start();
        h.run();

        h.children.spawn(1, 100);
        h.run();
        h.children.spawn(1, 101);
        h.run();
        h.probe.release(&(1, 101));
        h.run();
        h.probe.release(&(1, 100));
        h.run();
        assert_eq!(h.probe.torn_down(), vec![(1, 100)]);
        assert_eq!(h.probe.live(), 1);
    }

    #[test]
    fn test_stop_drains_every_parent() {
        let mut h = Harness::new(Probe::immediate());
        for (parent, child) in [(1, 100), (2, 200)] {
            h.members.insert(parent);
            h.children.preset(parent, child);
        }
        let mut observer = h.start();
        h.run();
        assert_eq!(h.probe.live(), 2);

        observer.stop();
        observer.stop();
        h.run();
        assert!(observer.is_stopped());
        assert_eq!(h.probe.live(), 0);
        assert_eq!(observer.tracked_parents(), 0);
    }
}
