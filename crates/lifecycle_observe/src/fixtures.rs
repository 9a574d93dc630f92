//! In-memory sources and an activation recorder shared by the observer tests.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use std::rc::Rc;

use futures::FutureExt;
use futures::channel::oneshot;
use lifecycle_core::{
    ActivationFuture, ChildSource, ScopeTest, SetSource, Signal, StructuralSource, Subscription,
    Teardown, ValueSource,
};

/// Named integer slots.
#[derive(Clone, Default)]
pub struct Values {
    values: Rc<RefCell<HashMap<String, i32>>>,
    changed: Rc<RefCell<HashMap<String, Signal<()>>>>,
}

impl Values {
    fn signal(&self, key: &str) -> Signal<()> {
        self.changed
            .borrow_mut()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    pub fn set(&self, key: &str, value: Option<i32>) {
        match value {
            Some(v) => self.values.borrow_mut().insert(key.to_string(), v),
            None => self.values.borrow_mut().remove(key),
        };
        self.signal(key).fire(&());
    }

    pub fn listeners(&self, key: &str) -> usize {
        self.signal(key).handler_count()
    }
}

impl ValueSource for Values {
    type Key = String;
    type Value = i32;

    fn current_value(&self, key: &String) -> Option<i32> {
        self.values.borrow().get(key).copied()
    }

    fn subscribe_change(&self, key: &String, handler: Box<dyn Fn()>) -> Subscription {
        self.signal(key).connect(move |_| handler())
    }
}

/// A single dynamic set of `u32` keys, where each key sits in a numbered scope.
#[derive(Clone, Default)]
pub struct Members {
    members: Rc<RefCell<BTreeSet<u32>>>,
    added: Signal<u32>,
    removed: Signal<u32>,
    scope_of: Rc<RefCell<HashMap<u32, u32>>>,
    moved: Rc<RefCell<HashMap<u32, Signal<()>>>>,
}

impl Members {
    pub fn insert(&self, key: u32) {
        if self.members.borrow_mut().insert(key) {
            self.added.fire(&key);
        }
    }

    pub fn remove(&self, key: u32) {
        if self.members.borrow_mut().remove(&key) {
            self.removed.fire(&key);
        }
    }

    /// Place `key` in `scope` without notifying.
    pub fn place(&self, key: u32, scope: u32) {
        self.scope_of.borrow_mut().insert(key, scope);
    }

    /// Move `key` to `scope` and fire its structural signal.
    pub fn move_to(&self, key: u32, scope: u32) {
        self.place(key, scope);
        self.moved_signal(key).fire(&());
    }

    fn moved_signal(&self, key: u32) -> Signal<()> {
        self.moved.borrow_mut().entry(key).or_default().clone()
    }

    pub fn add_listeners(&self) -> usize {
        self.added.handler_count()
    }

    pub fn structure_listeners(&self, key: u32) -> usize {
        self.moved_signal(key).handler_count()
    }
}

impl SetSource for Members {
    type SetId = &'static str;
    type Key = u32;

    fn subscribe_added(&self, _set: &&'static str, handler: Box<dyn Fn(&u32)>) -> Subscription {
        self.added.connect(move |key| handler(key))
    }

    fn subscribe_removed(&self, _set: &&'static str, handler: Box<dyn Fn(&u32)>) -> Subscription {
        self.removed.connect(move |key| handler(key))
    }

    fn current_members(&self, _set: &&'static str) -> Vec<u32> {
        self.members.borrow().iter().copied().collect()
    }
}

impl StructuralSource<u32> for Members {
    fn subscribe_structure(&self, key: &u32, handler: Box<dyn Fn()>) -> Subscription {
        self.moved_signal(*key).connect(move |_| handler())
    }
}

impl ScopeTest<u32> for Members {
    type Scope = u32;

    fn is_within(&self, key: &u32, scope: &u32) -> bool {
        self.scope_of.borrow().get(key) == Some(scope)
    }
}

/// Parent `u32` keys owning at most one `u32` child at a time.
#[derive(Clone, Default)]
pub struct Children {
    current: Rc<RefCell<HashMap<u32, u32>>>,
    added: Rc<RefCell<HashMap<u32, Signal<u32>>>>,
    detached: Rc<RefCell<HashMap<u32, Signal<()>>>>,
}

impl Children {
    fn added_signal(&self, parent: u32) -> Signal<u32> {
        self.added.borrow_mut().entry(parent).or_default().clone()
    }

    fn detached_signal(&self, child: u32) -> Signal<()> {
        self.detached.borrow_mut().entry(child).or_default().clone()
    }

    /// Attach `child` to `parent`, replacing the previous child.
    pub fn spawn(&self, parent: u32, child: u32) {
        let previous = self.current.borrow_mut().insert(parent, child);
        if let Some(previous) = previous {
            self.detached_signal(previous).fire(&());
        }
        self.added_signal(parent).fire(&child);
    }

    /// Attach `child` without notifying.
    pub fn preset(&self, parent: u32, child: u32) {
        self.current.borrow_mut().insert(parent, child);
    }

    /// Remove `parent`'s child from the hierarchy.
    pub fn kill(&self, parent: u32) {
        let child = self.current.borrow_mut().remove(&parent);
        if let Some(child) = child {
            self.detached_signal(child).fire(&());
        }
    }

    pub fn added_listeners(&self, parent: u32) -> usize {
        self.added_signal(parent).handler_count()
    }
}

impl ChildSource for Children {
    type Parent = u32;
    type Child = u32;

    fn current_child(&self, parent: &u32) -> Option<u32> {
        self.current.borrow().get(parent).copied()
    }

    fn subscribe_child_added(&self, parent: &u32, handler: Box<dyn Fn(&u32)>) -> Subscription {
        self.added_signal(*parent).connect(move |child| handler(child))
    }

    fn subscribe_detached(&self, child: &u32, handler: Box<dyn Fn()>) -> Subscription {
        self.detached_signal(*child).connect(move |_| handler())
    }
}

struct ProbeState<V> {
    gated: bool,
    started: Vec<V>,
    pending: Vec<(V, oneshot::Sender<()>)>,
    torn_down: Vec<V>,
    failing: Vec<V>,
}

/// Records activations and teardowns. A gated probe holds every activation
/// until [`Probe::release`] is called for its value.
pub struct Probe<V> {
    state: Rc<RefCell<ProbeState<V>>>,
}

impl<V> Clone for Probe<V> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<V: Clone + PartialEq + Debug + 'static> Probe<V> {
    fn with_gate(gated: bool) -> Self {
        Self {
            state: Rc::new(RefCell::new(ProbeState {
                gated,
                started: Vec::new(),
                pending: Vec::new(),
                torn_down: Vec::new(),
                failing: Vec::new(),
            })),
        }
    }

    pub fn immediate() -> Self {
        Self::with_gate(false)
    }

    pub fn gated() -> Self {
        Self::with_gate(true)
    }

    /// Make activations for `value` return an error.
    pub fn fail_on(&self, value: V) {
        self.state.borrow_mut().failing.push(value);
    }

    pub fn activator(&self) -> impl Fn(V) -> ActivationFuture + 'static {
        let state = Rc::clone(&self.state);
        move |value: V| {
            let state = Rc::clone(&state);
            async move {
                let gate = {
                    let mut s = state.borrow_mut();
                    s.started.push(value.clone());
                    if s.gated {
                        let (tx, rx) = oneshot::channel();
                        s.pending.push((value.clone(), tx));
                        Some(rx)
                    } else {
                        None
                    }
                };
                if let Some(rx) = gate {
                    let _ = rx.await;
                }
                if state.borrow().failing.contains(&value) {
                    anyhow::bail!("activation refused for {value:?}");
                }
                let log = Rc::clone(&state);
                Ok(Teardown::new(move || log.borrow_mut().torn_down.push(value)))
            }
            .boxed_local()
        }
    }

    /// Let the oldest pending activation for `value` resolve.
    pub fn release(&self, value: &V) {
        let sender = {
            let mut s = self.state.borrow_mut();
            let pos = s
                .pending
                .iter()
                .position(|(v, _)| v == value)
                .unwrap_or_else(|| panic!("no pending activation for {value:?}"));
            s.pending.remove(pos).1
        };
        let _ = sender.send(());
    }

    pub fn started(&self) -> Vec<V> {
        self.state.borrow().started.clone()
    }

    pub fn torn_down(&self) -> Vec<V> {
        self.state.borrow().torn_down.clone()
    }

    /// Activations started and not yet torn down.
    pub fn live(&self) -> usize {
        let s = self.state.borrow();
        s.started.len() - s.torn_down.len()
    }
}
