//! Event-source contracts.
//!
//! Engines know nothing about where values, memberships or hierarchy events
//! come from. Any type implementing these traits can drive them. Handlers
//! passed to `subscribe_*` are called synchronously by the source; engines
//! only perform state transitions inside them and schedule user code.

use std::fmt::Debug;
use std::hash::Hash;

use crate::signal::Subscription;

/// A source of single observable values.
pub trait ValueSource: Clone + 'static {
    /// Identifies one observable slot (e.g. an attribute on an entity).
    type Key: Clone + Debug + 'static;
    /// The observed value.
    type Value: Clone + 'static;

    /// Returns the current value, or `None` if absent.
    fn current_value(&self, key: &Self::Key) -> Option<Self::Value>;

    /// Call `handler` whenever the value behind `key` changes.
    fn subscribe_change(&self, key: &Self::Key, handler: Box<dyn Fn()>) -> Subscription;
}

/// A source of dynamic sets of keys.
pub trait SetSource: Clone + 'static {
    /// Identifies one set (e.g. a tag name).
    type SetId: Clone + Debug + 'static;
    /// A member of a set.
    type Key: Clone + Eq + Hash + Debug + 'static;

    /// Call `handler` whenever a key joins `set`.
    fn subscribe_added(&self, set: &Self::SetId, handler: Box<dyn Fn(&Self::Key)>)
    -> Subscription;

    /// Call `handler` whenever a key leaves `set`.
    fn subscribe_removed(
        &self,
        set: &Self::SetId,
        handler: Box<dyn Fn(&Self::Key)>,
    ) -> Subscription;

    /// Returns the keys currently in `set`.
    fn current_members(&self, set: &Self::SetId) -> Vec<Self::Key>;
}

/// Per-key structural notifications (e.g. ancestry changes).
pub trait StructuralSource<K>: Clone + 'static {
    /// Call `handler` whenever the structure around `key` changes.
    fn subscribe_structure(&self, key: &K, handler: Box<dyn Fn()>) -> Subscription;
}

/// Tests whether a key lies within a scope.
pub trait ScopeTest<K> {
    /// A region keys can be nested under.
    type Scope: Clone + Debug + 'static;

    /// Returns `true` if `key` is nested under `scope`.
    fn is_within(&self, key: &K, scope: &Self::Scope) -> bool;
}

/// A source of transient children hanging off a parent, such as the
/// character currently spawned for a player.
pub trait ChildSource: Clone + 'static {
    /// The owner of a child.
    type Parent: Clone + Debug + 'static;
    /// The transient child resource.
    type Child: Clone + PartialEq + Debug + 'static;

    /// Returns the child currently attached to `parent`, if any.
    fn current_child(&self, parent: &Self::Parent) -> Option<Self::Child>;

    /// Call `handler` whenever a new child appears for `parent`.
    fn subscribe_child_added(
        &self,
        parent: &Self::Parent,
        handler: Box<dyn Fn(&Self::Child)>,
    ) -> Subscription;

    /// Call `handler` once `child` has been removed from the hierarchy.
    fn subscribe_detached(&self, child: &Self::Child, handler: Box<dyn Fn()>) -> Subscription;
}
