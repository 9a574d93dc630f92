//! World: a single-threaded entity hierarchy with change notifications.
//!
//! Entities form a tree under a fixed root. Each entity carries a name,
//! JSON attributes and string tags. Some entities are registered as players,
//! and a player may own one character entity at a time.
//!
//! Every mutation updates the state first, releases all borrows and only
//! then fires notifications, so handlers may read or mutate the world.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;
use std::rc::Rc;

use lifecycle_core::{Signal, Subscription};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::WorldError;

pub type EntityId = u64;

/// The root entity. Entities are attached while they descend from it.
pub const ROOT: EntityId = 1;

/// Built-in entity properties that can be observed like attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    Name,
    Parent,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Attribute(String),
    Property(Property),
}

/// Identifies one observable value on an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldKey {
    pub entity: EntityId,
    pub field: Field,
}

impl FieldKey {
    pub fn attribute(entity: EntityId, name: impl Into<String>) -> Self {
        Self {
            entity,
            field: Field::Attribute(name.into()),
        }
    }

    pub fn property(entity: EntityId, property: Property) -> Self {
        Self {
            entity,
            field: Field::Property(property),
        }
    }
}

/// A dynamic set of entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Entities carrying the tag.
    Tag(String),
    /// Registered players.
    Players,
}

#[derive(Debug, Clone)]
struct EntityData {
    name: String,
    parent: Option<EntityId>,
    children: BTreeSet<EntityId>,
    attributes: BTreeMap<String, Value>,
    tags: BTreeSet<String>,
}

impl EntityData {
    fn new(name: String, parent: Option<EntityId>) -> Self {
        Self {
            name,
            parent,
            children: BTreeSet::new(),
            attributes: BTreeMap::new(),
            tags: BTreeSet::new(),
        }
    }
}

pub(crate) struct WorldState {
    next_entity: EntityId,
    entities: HashMap<EntityId, EntityData>,
    /// Player entity to its current character.
    players: BTreeMap<EntityId, Option<EntityId>>,
}

impl WorldState {
    fn entity(&self, id: EntityId) -> Result<&EntityData, WorldError> {
        self.entities.get(&id).ok_or(WorldError::EntityNotFound(id))
    }

    fn entity_mut(&mut self, id: EntityId) -> Result<&mut EntityData, WorldError> {
        self.entities
            .get_mut(&id)
            .ok_or(WorldError::EntityNotFound(id))
    }

    fn parent_of(&self, id: EntityId) -> Option<EntityId> {
        self.entities.get(&id).and_then(|e| e.parent)
    }

    pub(crate) fn is_descendant_of(&self, id: EntityId, ancestor: EntityId) -> bool {
        let mut current = self.parent_of(id);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.parent_of(parent);
        }
        false
    }

    pub(crate) fn is_attached(&self, id: EntityId) -> bool {
        id == ROOT || (self.entities.contains_key(&id) && self.is_descendant_of(id, ROOT))
    }

    /// `id` followed by all of its descendants.
    fn subtree(&self, id: EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(data) = self.entities.get(&next) {
                out.push(next);
                stack.extend(data.children.iter().rev().copied());
            }
        }
        out
    }

    fn snapshot(&self, id: EntityId) -> Option<EntitySnapshot> {
        let data = self.entities.get(&id)?;
        Some(EntitySnapshot {
            id,
            name: data.name.clone(),
            attributes: data.attributes.clone(),
            tags: data.tags.iter().cloned().collect(),
            player: self.players.contains_key(&id),
            children: data
                .children
                .iter()
                .filter_map(|child| self.snapshot(*child))
                .collect(),
        })
    }
}

/// Serializable view of an entity and its subtree.
#[derive(Debug, Clone, Serialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub player: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<EntitySnapshot>,
}

#[derive(Default)]
struct Notifiers {
    fields: HashMap<FieldKey, Signal<()>>,
    ancestry: HashMap<EntityId, Signal<()>>,
    tag_added: HashMap<String, Signal<EntityId>>,
    tag_removed: HashMap<String, Signal<EntityId>>,
    player_added: Signal<EntityId>,
    player_removed: Signal<EntityId>,
    character_added: HashMap<EntityId, Signal<EntityId>>,
}

#[derive(Debug)]
enum Event {
    Field(FieldKey),
    Ancestry(EntityId),
    TagAdded(String, EntityId),
    TagRemoved(String, EntityId),
    PlayerAdded(EntityId),
    PlayerRemoved(EntityId),
    CharacterAdded { player: EntityId, character: EntityId },
}

/// Shared handle to a world. Cloning is cheap; clones see the same state.
#[derive(Clone)]
pub struct World {
    state: Rc<RefCell<WorldState>>,
    notifiers: Rc<RefCell<Notifiers>>,
}

impl World {
    pub fn new() -> Self {
        let mut entities = HashMap::new();
        entities.insert(ROOT, EntityData::new("Root".to_string(), None));
        Self {
            state: Rc::new(RefCell::new(WorldState {
                next_entity: ROOT + 1,
                entities,
                players: BTreeMap::new(),
            })),
            notifiers: Rc::new(RefCell::new(Notifiers::default())),
        }
    }

    pub fn root(&self) -> EntityId {
        ROOT
    }

    pub(crate) fn state(&self) -> &Rc<RefCell<WorldState>> {
        &self.state
    }

    // -- Entity lifecycle --

    /// Spawn a new entity under `parent`.
    pub fn spawn(&self, parent: EntityId, name: impl Into<String>) -> Result<EntityId, WorldError> {
        let mut state = self.state.borrow_mut();
        state.entity(parent)?;
        let id = state.next_entity;
        state.next_entity += 1;
        let name = name.into();
        debug!(entity = id, parent, name = %name, "spawned entity");
        state.entities.insert(id, EntityData::new(name, Some(parent)));
        state.entity_mut(parent)?.children.insert(id);
        Ok(id)
    }

    /// Remove an entity and its whole subtree.
    pub fn despawn(&self, id: EntityId) -> Result<(), WorldError> {
        if id == ROOT {
            return Err(WorldError::RootImmutable);
        }
        let mut events = Vec::new();
        let removed = {
            let mut state = self.state.borrow_mut();
            let parent = state.entity(id)?.parent;
            if let Some(parent) = parent
                && let Some(data) = state.entities.get_mut(&parent)
            {
                data.children.remove(&id);
            }

            let removed = state.subtree(id);
            let mut tags = Vec::new();
            let mut players = Vec::new();
            for entity in &removed {
                if let Some(data) = state.entities.remove(entity) {
                    tags.extend(data.tags.into_iter().map(|tag| (tag, *entity)));
                }
                if state.players.remove(entity).is_some() {
                    players.push(*entity);
                }
                for character in state.players.values_mut() {
                    if *character == Some(*entity) {
                        *character = None;
                    }
                }
            }

            events.extend(removed.iter().map(|entity| Event::Ancestry(*entity)));
            events.extend(tags.into_iter().map(|(tag, entity)| Event::TagRemoved(tag, entity)));
            events.extend(players.into_iter().map(Event::PlayerRemoved));
            removed
        };
        debug!(entity = id, count = removed.len(), "despawned subtree");

        let fields: Vec<FieldKey> = self
            .notifiers
            .borrow()
            .fields
            .keys()
            .filter(|key| removed.contains(&key.entity))
            .cloned()
            .collect();
        events.extend(fields.into_iter().map(Event::Field));
        self.emit(events);

        let mut notifiers = self.notifiers.borrow_mut();
        notifiers.fields.retain(|key, _| !removed.contains(&key.entity));
        for entity in &removed {
            notifiers.ancestry.remove(entity);
            notifiers.character_added.remove(entity);
        }
        Ok(())
    }

    /// Move `id` under `parent`, or detach it from the hierarchy with `None`.
    pub fn set_parent(&self, id: EntityId, parent: Option<EntityId>) -> Result<(), WorldError> {
        if id == ROOT {
            return Err(WorldError::RootImmutable);
        }
        let moved = {
            let mut state = self.state.borrow_mut();
            let previous = state.entity(id)?.parent;
            if let Some(parent) = parent {
                state.entity(parent)?;
                if parent == id || state.is_descendant_of(parent, id) {
                    return Err(WorldError::Cycle { entity: id, parent });
                }
            }
            if previous == parent {
                return Ok(());
            }
            if let Some(previous) = previous
                && let Some(data) = state.entities.get_mut(&previous)
            {
                data.children.remove(&id);
            }
            if let Some(parent) = parent {
                state.entity_mut(parent)?.children.insert(id);
            }
            state.entity_mut(id)?.parent = parent;
            state.subtree(id)
        };
        trace!(entity = id, ?parent, "reparented");

        let mut events = vec![Event::Field(FieldKey::property(id, Property::Parent))];
        events.extend(moved.into_iter().map(Event::Ancestry));
        self.emit(events);
        Ok(())
    }

    pub fn set_name(&self, id: EntityId, name: impl Into<String>) -> Result<(), WorldError> {
        let name = name.into();
        {
            let mut state = self.state.borrow_mut();
            let data = state.entity_mut(id)?;
            if data.name == name {
                return Ok(());
            }
            data.name = name;
        }
        self.emit(vec![Event::Field(FieldKey::property(id, Property::Name))]);
        Ok(())
    }

    // -- Queries --

    pub fn exists(&self, id: EntityId) -> bool {
        self.state.borrow().entities.contains_key(&id)
    }

    pub fn name(&self, id: EntityId) -> Option<String> {
        self.state.borrow().entities.get(&id).map(|e| e.name.clone())
    }

    pub fn parent(&self, id: EntityId) -> Option<EntityId> {
        self.state.borrow().parent_of(id)
    }

    pub fn children(&self, id: EntityId) -> Vec<EntityId> {
        self.state
            .borrow()
            .entities
            .get(&id)
            .map(|e| e.children.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Find a direct child of `parent` by name.
    pub fn find_child(&self, parent: EntityId, name: &str) -> Option<EntityId> {
        let state = self.state.borrow();
        let data = state.entities.get(&parent)?;
        data.children
            .iter()
            .copied()
            .find(|child| state.entities.get(child).is_some_and(|e| e.name == name))
    }

    /// Returns `true` if `ancestor` is a strict ancestor of `id`.
    pub fn is_descendant_of(&self, id: EntityId, ancestor: EntityId) -> bool {
        self.state.borrow().is_descendant_of(id, ancestor)
    }

    /// Returns `true` if `id` exists and descends from the root.
    pub fn is_attached(&self, id: EntityId) -> bool {
        self.state.borrow().is_attached(id)
    }

    pub fn entity_count(&self) -> usize {
        self.state.borrow().entities.len()
    }

    /// Snapshot of the tree below the root.
    pub fn snapshot(&self) -> Option<EntitySnapshot> {
        self.state.borrow().snapshot(ROOT)
    }

    // -- Attributes --

    pub fn attribute(&self, id: EntityId, name: &str) -> Option<Value> {
        self.state
            .borrow()
            .entities
            .get(&id)
            .and_then(|e| e.attributes.get(name).cloned())
    }

    /// Set an attribute. Returns `true` if the stored value changed.
    pub fn set_attribute(
        &self,
        id: EntityId,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<bool, WorldError> {
        let value = value.into();
        {
            let mut state = self.state.borrow_mut();
            let data = state.entity_mut(id)?;
            if data.attributes.get(name) == Some(&value) {
                return Ok(false);
            }
            data.attributes.insert(name.to_string(), value);
        }
        self.emit(vec![Event::Field(FieldKey::attribute(id, name))]);
        Ok(true)
    }

    /// Remove an attribute, returning its previous value.
    pub fn remove_attribute(&self, id: EntityId, name: &str) -> Result<Option<Value>, WorldError> {
        let previous = self.state.borrow_mut().entity_mut(id)?.attributes.remove(name);
        if previous.is_some() {
            self.emit(vec![Event::Field(FieldKey::attribute(id, name))]);
        }
        Ok(previous)
    }

    // -- Tags --

    /// Tag an entity. Returns `false` if it already had the tag.
    pub fn add_tag(&self, id: EntityId, tag: &str) -> Result<bool, WorldError> {
        let added = self.state.borrow_mut().entity_mut(id)?.tags.insert(tag.to_string());
        if added {
            self.emit(vec![Event::TagAdded(tag.to_string(), id)]);
        }
        Ok(added)
    }

    /// Untag an entity. Returns `false` if it did not have the tag.
    pub fn remove_tag(&self, id: EntityId, tag: &str) -> Result<bool, WorldError> {
        let removed = self.state.borrow_mut().entity_mut(id)?.tags.remove(tag);
        if removed {
            self.emit(vec![Event::TagRemoved(tag.to_string(), id)]);
        }
        Ok(removed)
    }

    pub fn has_tag(&self, id: EntityId, tag: &str) -> bool {
        self.state
            .borrow()
            .entities
            .get(&id)
            .is_some_and(|e| e.tags.contains(tag))
    }

    /// All entities carrying `tag`, in id order.
    pub fn tagged(&self, tag: &str) -> Vec<EntityId> {
        let state = self.state.borrow();
        let mut ids: Vec<EntityId> = state
            .entities
            .iter()
            .filter(|(_, e)| e.tags.contains(tag))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    // -- Players --

    /// Register a new player entity under the root.
    pub fn add_player(&self, name: impl Into<String>) -> Result<EntityId, WorldError> {
        let id = self.spawn(ROOT, name)?;
        self.state.borrow_mut().players.insert(id, None);
        self.emit(vec![Event::PlayerAdded(id)]);
        Ok(id)
    }

    /// Remove a player together with its character.
    pub fn remove_player(&self, player: EntityId) -> Result<(), WorldError> {
        let character = {
            let state = self.state.borrow();
            *state
                .players
                .get(&player)
                .ok_or(WorldError::NotAPlayer(player))?
        };
        if let Some(character) = character
            && self.exists(character)
        {
            self.despawn(character)?;
        }
        self.despawn(player)
    }

    pub fn players(&self) -> Vec<EntityId> {
        self.state.borrow().players.keys().copied().collect()
    }

    pub fn is_player(&self, id: EntityId) -> bool {
        self.state.borrow().players.contains_key(&id)
    }

    /// Spawn a fresh character for `player` under `parent`, despawning the
    /// previous one.
    pub fn spawn_character(&self, player: EntityId, parent: EntityId) -> Result<EntityId, WorldError> {
        let (previous, name) = {
            let state = self.state.borrow();
            let previous = *state
                .players
                .get(&player)
                .ok_or(WorldError::NotAPlayer(player))?;
            state.entity(parent)?;
            (previous, state.entity(player)?.name.clone())
        };
        if let Some(previous) = previous
            && self.exists(previous)
        {
            self.despawn(previous)?;
        }

        let character = self.spawn(parent, name)?;
        if let Some(slot) = self.state.borrow_mut().players.get_mut(&player) {
            *slot = Some(character);
        }
        self.emit(vec![Event::CharacterAdded { player, character }]);
        Ok(character)
    }

    /// The player's current character, if it still exists.
    pub fn character(&self, player: EntityId) -> Option<EntityId> {
        let state = self.state.borrow();
        state
            .players
            .get(&player)
            .copied()
            .flatten()
            .filter(|c| state.entities.contains_key(c))
    }

    // -- Notifications --

    fn emit(&self, events: Vec<Event>) {
        for event in events {
            trace!(?event, "world event");
            match event {
                Event::Field(key) => {
                    let signal = self.notifiers.borrow().fields.get(&key).cloned();
                    if let Some(signal) = signal {
                        signal.fire(&());
                    }
                }
                Event::Ancestry(id) => {
                    let signal = self.notifiers.borrow().ancestry.get(&id).cloned();
                    if let Some(signal) = signal {
                        signal.fire(&());
                    }
                }
                Event::TagAdded(tag, id) => {
                    let signal = self.notifiers.borrow().tag_added.get(&tag).cloned();
                    if let Some(signal) = signal {
                        signal.fire(&id);
                    }
                }
                Event::TagRemoved(tag, id) => {
                    let signal = self.notifiers.borrow().tag_removed.get(&tag).cloned();
                    if let Some(signal) = signal {
                        signal.fire(&id);
                    }
                }
                Event::PlayerAdded(id) => {
                    let signal = self.notifiers.borrow().player_added.clone();
                    signal.fire(&id);
                }
                Event::PlayerRemoved(id) => {
                    let signal = self.notifiers.borrow().player_removed.clone();
                    signal.fire(&id);
                }
                Event::CharacterAdded { player, character } => {
                    let signal = self.notifiers.borrow().character_added.get(&player).cloned();
                    if let Some(signal) = signal {
                        signal.fire(&character);
                    }
                }
            }
        }
    }

    pub fn on_field_changed(&self, key: FieldKey, handler: impl Fn() + 'static) -> Subscription {
        connect_keyed(&self.notifiers, |n| &mut n.fields, key, move |_: &()| handler())
    }

    /// Fires when `id` or any of its ancestors is reparented or despawned.
    pub fn on_ancestry_changed(&self, id: EntityId, handler: impl Fn() + 'static) -> Subscription {
        connect_keyed(&self.notifiers, |n| &mut n.ancestry, id, move |_: &()| handler())
    }

    pub fn on_tag_added(&self, tag: &str, handler: impl Fn(&EntityId) + 'static) -> Subscription {
        connect_keyed(&self.notifiers, |n| &mut n.tag_added, tag.to_string(), handler)
    }

    pub fn on_tag_removed(&self, tag: &str, handler: impl Fn(&EntityId) + 'static) -> Subscription {
        connect_keyed(&self.notifiers, |n| &mut n.tag_removed, tag.to_string(), handler)
    }

    pub fn on_player_added(&self, handler: impl Fn(&EntityId) + 'static) -> Subscription {
        let signal = self.notifiers.borrow().player_added.clone();
        signal.connect(handler)
    }

    pub fn on_player_removed(&self, handler: impl Fn(&EntityId) + 'static) -> Subscription {
        let signal = self.notifiers.borrow().player_removed.clone();
        signal.connect(handler)
    }

    pub fn on_character_added(
        &self,
        player: EntityId,
        handler: impl Fn(&EntityId) + 'static,
    ) -> Subscription {
        connect_keyed(&self.notifiers, |n| &mut n.character_added, player, handler)
    }
}

/// Connect `handler` to the signal stored under `key` in one of the keyed
/// notifier maps. The entry is removed once its last handler disconnects.
fn connect_keyed<K, T>(
    notifiers: &Rc<RefCell<Notifiers>>,
    map: fn(&mut Notifiers) -> &mut HashMap<K, Signal<T>>,
    key: K,
    handler: impl Fn(&T) + 'static,
) -> Subscription
where
    K: Clone + Eq + Hash + 'static,
    T: 'static,
{
    let signal = map(&mut *notifiers.borrow_mut())
        .entry(key.clone())
        .or_default()
        .clone();
    let connection = signal.connect(handler);
    let notifiers = Rc::downgrade(notifiers);
    Subscription::new(move || {
        drop(connection);
        let Some(notifiers) = notifiers.upgrade() else {
            return;
        };
        let Ok(mut notifiers) = notifiers.try_borrow_mut() else {
            return;
        };
        let signals = map(&mut *notifiers);
        if signals.get(&key).is_some_and(|signal| signal.handler_count() == 0) {
            signals.remove(&key);
        }
    })
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("World")
            .field("entities", &state.entities.len())
            .field("players", &state.players.len())
            .finish()
    }
}
