//! Named entry points for observing a [`World`].
//!
//! Each returns the observer configuration so callers can add a guard,
//! eligibility scopes or a label before starting it.

use lifecycle_observe::{WatchChildren, WatchSet, WatchValue, WithinScopes};

use crate::source::Characters;
use crate::world::{Collection, EntityId, FieldKey, Property, World};

impl World {
    /// Observe one attribute of `entity`.
    pub fn observe_attribute(&self, entity: EntityId, name: &str) -> WatchValue<World> {
        WatchValue::new(self.clone(), FieldKey::attribute(entity, name))
            .with_label(format!("attribute `{name}` of {entity}"))
    }

    /// Observe a built-in property of `entity`.
    pub fn observe_property(&self, entity: EntityId, property: Property) -> WatchValue<World> {
        WatchValue::new(self.clone(), FieldKey::property(entity, property))
            .with_label(format!("property {property:?} of {entity}"))
    }

    /// Observe every entity carrying `tag`.
    pub fn observe_tag(&self, tag: &str) -> WatchSet<World> {
        WatchSet::new(self.clone(), Collection::Tag(tag.to_string())).with_label(format!("tag `{tag}`"))
    }

    /// Eligibility filter admitting entities nested under any of `scopes`.
    pub fn within(&self, scopes: impl IntoIterator<Item = EntityId>) -> WithinScopes<World, EntityId> {
        WithinScopes::new(self.clone(), scopes)
    }

    /// Observe every registered player.
    pub fn observe_players(&self) -> WatchSet<World> {
        WatchSet::new(self.clone(), Collection::Players).with_label("players")
    }

    /// Observe the current character of every player.
    pub fn observe_characters(&self) -> WatchChildren<World, Characters> {
        WatchChildren::new(self.clone(), Collection::Players, Characters::new(self.clone()))
            .with_label("characters")
    }
}
