//! # lifecycle_core
//!
//! Building blocks for the reactive lifecycle engine.
//!
//! An observer watches some external state and runs an asynchronous
//! *activation* whenever that state becomes relevant. Each activation
//! resolves to a [`Teardown`], which the engine schedules exactly once when
//! the state stops being relevant. Late results from superseded activations
//! are detected through generation counters and torn down immediately.
//!
//! This crate provides:
//!
//! - [`teardown`]: the [`Teardown`] handle produced by an activation.
//! - [`activation`]: activation callback types and panic-safe invocation.
//! - [`scheduler`]: the [`Scheduler`] seam and the [`Dispatcher`] every engine runs on.
//! - [`signal`]: single-threaded [`Signal`]s and RAII [`Subscription`]s.
//! - [`slot`]: the generation-guarded [`GenerationSlot`] primitive.
//! - [`source`]: the contracts event sources implement.
//! - [`error`]: activation error types.
//!
//! All state lives on one dispatch timeline: engines are `!Send`, their
//! tasks are spawned locally and no locks are taken.

pub mod activation;
pub mod error;
pub mod scheduler;
pub mod signal;
pub mod slot;
pub mod source;
pub mod teardown;

pub use activation::{ActivateFn, ActivationFuture, activator, invoke};
pub use error::ActivationError;
pub use scheduler::{Dispatcher, Scheduler, TokioScheduler};
pub use signal::{Signal, Subscription};
pub use slot::{Guard, GenerationSlot};
pub use source::{ChildSource, ScopeTest, SetSource, StructuralSource, ValueSource};
pub use teardown::Teardown;
