use thiserror::Error;

use crate::world::EntityId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldError {
    #[error("entity {0} not found")]
    EntityNotFound(EntityId),
    #[error("entity {0} is not a player")]
    NotAPlayer(EntityId),
    #[error("cannot parent entity {entity} under its own descendant {parent}")]
    Cycle { entity: EntityId, parent: EntityId },
    #[error("the root entity cannot be moved or despawned")]
    RootImmutable,
}
