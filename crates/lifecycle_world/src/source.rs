//! Event-source implementations that let observers watch a [`World`].

use std::rc::Rc;

use lifecycle_core::{
    ChildSource, ScopeTest, SetSource, StructuralSource, Subscription, ValueSource,
};
use serde_json::Value;

use crate::world::{Collection, EntityId, Field, FieldKey, Property, World};

impl ValueSource for World {
    type Key = FieldKey;
    type Value = Value;

    fn current_value(&self, key: &FieldKey) -> Option<Value> {
        match &key.field {
            Field::Attribute(name) => self.attribute(key.entity, name),
            Field::Property(Property::Name) => self.name(key.entity).map(Value::String),
            Field::Property(Property::Parent) => self.parent(key.entity).map(Value::from),
        }
    }

    fn subscribe_change(&self, key: &FieldKey, handler: Box<dyn Fn()>) -> Subscription {
        self.on_field_changed(key.clone(), handler)
    }
}

impl SetSource for World {
    type SetId = Collection;
    type Key = EntityId;

    fn subscribe_added(&self, set: &Collection, handler: Box<dyn Fn(&EntityId)>) -> Subscription {
        match set {
            Collection::Tag(tag) => self.on_tag_added(tag, handler),
            Collection::Players => self.on_player_added(handler),
        }
    }

    fn subscribe_removed(
        &self,
        set: &Collection,
        handler: Box<dyn Fn(&EntityId)>,
    ) -> Subscription {
        match set {
            Collection::Tag(tag) => self.on_tag_removed(tag, handler),
            Collection::Players => self.on_player_removed(handler),
        }
    }

    fn current_members(&self, set: &Collection) -> Vec<EntityId> {
        match set {
            Collection::Tag(tag) => self.tagged(tag),
            Collection::Players => self.players(),
        }
    }
}

impl StructuralSource<EntityId> for World {
    fn subscribe_structure(&self, key: &EntityId, handler: Box<dyn Fn()>) -> Subscription {
        self.on_ancestry_changed(*key, handler)
    }
}

impl ScopeTest<EntityId> for World {
    type Scope = EntityId;

    fn is_within(&self, key: &EntityId, scope: &EntityId) -> bool {
        self.is_descendant_of(*key, *scope)
    }
}

/// Player → character view of a world.
///
/// A character counts as detached once it no longer descends from the root,
/// whether it was despawned, replaced or moved out of the hierarchy.
#[derive(Debug, Clone)]
pub struct Characters {
    world: World,
}

impl Characters {
    pub fn new(world: World) -> Self {
        Self { world }
    }
}

impl ChildSource for Characters {
    type Parent = EntityId;
    type Child = EntityId;

    fn current_child(&self, player: &EntityId) -> Option<EntityId> {
        self.world
            .character(*player)
            .filter(|character| self.world.is_attached(*character))
    }

    fn subscribe_child_added(
        &self,
        player: &EntityId,
        handler: Box<dyn Fn(&EntityId)>,
    ) -> Subscription {
        self.world.on_character_added(*player, handler)
    }

    fn subscribe_detached(&self, character: &EntityId, handler: Box<dyn Fn()>) -> Subscription {
        let state = Rc::downgrade(self.world.state());
        let character = *character;
        self.world.on_ancestry_changed(character, move || {
            let attached = state
                .upgrade()
                .is_some_and(|state| state.borrow().is_attached(character));
            if !attached {
                handler();
            }
        })
    }
}
