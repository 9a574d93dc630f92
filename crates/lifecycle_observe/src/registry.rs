//! Per-key registry and eligibility filtering for set observers.
//!
//! The [`Registry`] is a pure state machine: it never runs user code. Every
//! transition that releases an activation hands the [`Teardown`] back to the
//! caller, which schedules it.

use std::collections::HashMap;
use std::hash::Hash;

use lifecycle_core::{ScopeTest, StructuralSource, Subscription, Teardown};

/// Externally visible state of a tracked key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// Tracked but not activated.
    Dead,
    /// Activation dispatched, not yet resolved.
    Inflight,
    /// Holding a live activation.
    Active,
}

#[derive(Debug)]
enum Status {
    Dead,
    Inflight { ticket: u64 },
    Active(Teardown),
}

#[derive(Debug)]
struct Entry {
    status: Status,
    watch: Option<Subscription>,
}

/// What [`Registry::remove`] released.
#[derive(Debug)]
pub struct Removed {
    /// The activation held when the key was removed.
    pub teardown: Option<Teardown>,
    /// The key's eligibility watch.
    pub watch: Option<Subscription>,
}

/// Maps each tracked key to its activation status.
///
/// Inflight activations carry a ticket drawn from a registry-wide counter,
/// so a resolution is accepted only by the exact dispatch that produced it,
/// even if the key was removed and re-added in between.
#[derive(Debug)]
pub struct Registry<K> {
    entries: HashMap<K, Entry>,
    next_ticket: u64,
}

impl<K: Clone + Eq + Hash> Registry<K> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_ticket: 0,
        }
    }

    /// Track `key` as Dead. Returns `false` if it was already tracked.
    pub fn insert(&mut self, key: K) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(
            key,
            Entry {
                status: Status::Dead,
                watch: None,
            },
        );
        true
    }

    /// Store the eligibility watch for `key`. Hands the subscription back if
    /// the key is no longer tracked.
    pub fn attach_watch(&mut self, key: &K, watch: Subscription) -> Option<Subscription> {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.watch = Some(watch);
                None
            }
            None => Some(watch),
        }
    }

    /// Dead → Inflight. Returns the dispatch ticket, or `None` if the key is
    /// untracked or not Dead.
    pub fn begin(&mut self, key: &K) -> Option<u64> {
        let entry = self.entries.get_mut(key)?;
        if !matches!(entry.status, Status::Dead) {
            return None;
        }
        self.next_ticket += 1;
        entry.status = Status::Inflight {
            ticket: self.next_ticket,
        };
        Some(self.next_ticket)
    }

    /// Inflight → Active if `ticket` is still the pending dispatch for `key`.
    /// Otherwise the result is stale and `teardown` is handed back.
    pub fn settle(&mut self, key: &K, ticket: u64, teardown: Teardown) -> Option<Teardown> {
        match self.entries.get_mut(key) {
            Some(entry) if matches!(entry.status, Status::Inflight { ticket: t } if t == ticket) => {
                entry.status = Status::Active(teardown);
                None
            }
            _ => Some(teardown),
        }
    }

    /// Inflight → Dead after a failed activation. Returns `false` if the
    /// failure was for a superseded dispatch.
    pub fn fail(&mut self, key: &K, ticket: u64) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if matches!(entry.status, Status::Inflight { ticket: t } if t == ticket) => {
                entry.status = Status::Dead;
                true
            }
            _ => false,
        }
    }

    /// Active/Inflight → Dead. Returns the held teardown if the key was Active.
    pub fn deactivate(&mut self, key: &K) -> Option<Teardown> {
        let entry = self.entries.get_mut(key)?;
        match std::mem::replace(&mut entry.status, Status::Dead) {
            Status::Active(teardown) => Some(teardown),
            Status::Dead | Status::Inflight { .. } => None,
        }
    }

    /// Deactivate and untrack `key`.
    pub fn remove(&mut self, key: &K) -> Option<Removed> {
        let teardown = self.deactivate(key);
        let entry = self.entries.remove(key)?;
        Some(Removed {
            teardown,
            watch: entry.watch,
        })
    }

    /// Returns the state of `key`, or `None` if untracked.
    #[must_use]
    pub fn state(&self, key: &K) -> Option<KeyState> {
        self.entries.get(key).map(|entry| match entry.status {
            Status::Dead => KeyState::Dead,
            Status::Inflight { .. } => KeyState::Inflight,
            Status::Active(_) => KeyState::Active,
        })
    }

    /// Returns `true` if `key` is tracked.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns any tracked key.
    #[must_use]
    pub fn first_key(&self) -> Option<K> {
        self.entries.keys().next().cloned()
    }

    /// Returns all keys currently holding an activation.
    #[must_use]
    pub fn active_keys(&self) -> Vec<K> {
        self.entries
            .iter()
            .filter(|(_, entry)| matches!(entry.status, Status::Active(_)))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Returns the number of tracked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no key is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Clone + Eq + Hash> Default for Registry<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Decides whether a tracked key may hold an activation.
pub trait Eligibility<K> {
    /// Returns `true` if `key` may currently be activated.
    fn is_eligible(&self, key: &K) -> bool;

    /// Call `on_change` whenever eligibility of `key` may have changed.
    /// Returns `None` if eligibility never changes.
    fn watch(&self, key: &K, on_change: Box<dyn Fn()>) -> Option<Subscription>;
}

/// Every tracked key is eligible; membership alone governs activation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Always;

impl<K> Eligibility<K> for Always {
    fn is_eligible(&self, _key: &K) -> bool {
        true
    }

    fn watch(&self, _key: &K, _on_change: Box<dyn Fn()>) -> Option<Subscription> {
        None
    }
}

/// A key is eligible while it is nested under at least one of the scopes.
/// Eligibility is re-checked on every structural change of the key.
#[derive(Debug, Clone)]
pub struct WithinScopes<S, Sc> {
    source: S,
    scopes: Vec<Sc>,
}

impl<S, Sc> WithinScopes<S, Sc> {
    /// Restrict activation to keys under any of `scopes`.
    pub fn new(source: S, scopes: impl IntoIterator<Item = Sc>) -> Self {
        Self {
            source,
            scopes: scopes.into_iter().collect(),
        }
    }

    /// Returns the admissible scopes.
    #[must_use]
    pub fn scopes(&self) -> &[Sc] {
        &self.scopes
    }
}

impl<K, S, Sc> Eligibility<K> for WithinScopes<S, Sc>
where
    S: StructuralSource<K> + ScopeTest<K, Scope = Sc>,
{
    fn is_eligible(&self, key: &K) -> bool {
        self.scopes
            .iter()
            .any(|scope| self.source.is_within(key, scope))
    }

    fn watch(&self, key: &K, on_change: Box<dyn Fn()>) -> Option<Subscription> {
        Some(self.source.subscribe_structure(key, on_change))
    }
}
