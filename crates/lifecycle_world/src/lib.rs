//! # lifecycle_world
//!
//! An in-memory entity hierarchy that drives the lifecycle observers.
//!
//! [`World`] implements every event-source contract from `lifecycle_core`:
//! attribute and property changes as values, tags and players as dynamic
//! sets, ancestry changes as structural signals, and each player's character
//! as a transient child. The `observe_*` methods wire those sources into the
//! observers from `lifecycle_observe`.

pub mod error;
pub mod observe;
pub mod source;
pub mod world;

pub use error::WorldError;
pub use source::Characters;
pub use world::{Collection, EntityId, EntitySnapshot, Field, FieldKey, Property, ROOT, World};
