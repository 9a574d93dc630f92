//! # lifecycle_observe
//!
//! Observers built on [`lifecycle_core`].
//!
//! - [`scalar`]: [`WatchValue`] keeps one activation for the current value
//!   of a single slot.
//! - [`set`]: [`WatchSet`] keeps one activation per eligible member of a
//!   dynamic set.
//! - [`registry`]: the per-key state machine and eligibility filters behind
//!   set observers.
//! - [`derived`]: [`WatchChildren`] keeps one activation per transient child
//!   of each set member.
//!
//! Every observer is started against a [`lifecycle_core::Dispatcher`] and
//! returns a handle that stops it when dropped.

pub mod derived;
pub mod registry;
pub mod scalar;
pub mod set;

#[cfg(test)]
mod fixtures;

pub use derived::{ChildObserver, WatchChildren};
pub use registry::{Always, Eligibility, KeyState, Registry, Removed, WithinScopes};
pub use scalar::{ValueObserver, WatchValue};
pub use set::{SetObserver, WatchSet};
