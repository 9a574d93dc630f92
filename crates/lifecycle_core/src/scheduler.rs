//! Task scheduling.
//!
//! Engines never call user code inline from an event handler. Every
//! activation and teardown is handed to a [`Scheduler`] and runs on the next
//! scheduling opportunity. The [`Dispatcher`] pairs a scheduler with the
//! error reporting path shared by all engines built on it.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use futures::FutureExt;
use futures::executor::LocalSpawner;
use futures::future::LocalBoxFuture;
use futures::task::LocalSpawnExt;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::error::{ActivationError, panic_message};
use crate::teardown::Teardown;

/// Runs fire-and-forget tasks on a single-threaded timeline.
pub trait Scheduler {
    /// Queue `task` to run later. Must not poll it synchronously.
    fn schedule(&self, task: LocalBoxFuture<'static, ()>);
}

/// Schedules onto the tokio [`LocalSet`](tokio::task::LocalSet) that was
/// current when it was created.
///
/// Tasks travel over a channel to a driver task on that `LocalSet`, so
/// [`schedule`](Scheduler::schedule) works from anywhere, including an
/// observer's `Drop` outside the `LocalSet`. Tasks scheduled after the
/// `LocalSet` is gone are dropped with a warning.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    tasks: mpsc::UnboundedSender<LocalBoxFuture<'static, ()>>,
}

impl TokioScheduler {
    /// Spawn the driver task on the current `LocalSet`.
    ///
    /// # Panics
    ///
    /// Panics outside a `LocalSet`, as `tokio::task::spawn_local` does.
    #[must_use]
    pub fn new() -> Self {
        let (tasks, mut queue) = mpsc::unbounded_channel::<LocalBoxFuture<'static, ()>>();
        drop(tokio::task::spawn_local(async move {
            while let Some(task) = queue.recv().await {
                drop(tokio::task::spawn_local(task));
            }
        }));
        Self { tasks }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, task: LocalBoxFuture<'static, ()>) {
        if self.tasks.send(task).is_err() {
            warn!("local task set is gone, dropping scheduled task");
        }
    }
}

impl Scheduler for LocalSpawner {
    fn schedule(&self, task: LocalBoxFuture<'static, ()>) {
        if let Err(err) = self.spawn_local(task) {
            error!(%err, "local pool rejected task");
        }
    }
}

/// Callback receiving every reported activation error.
pub type ErrorSink = Rc<dyn Fn(&ActivationError)>;

/// Scheduler plus error reporting, shared by every engine instance.
///
/// Cloning is cheap; clones share the same scheduler and sink.
#[derive(Clone)]
pub struct Dispatcher {
    scheduler: Rc<dyn Scheduler>,
    sink: Option<ErrorSink>,
}

impl Dispatcher {
    /// Create a dispatcher over the given scheduler.
    pub fn new(scheduler: impl Scheduler + 'static) -> Self {
        Self {
            scheduler: Rc::new(scheduler),
            sink: None,
        }
    }

    /// Create a dispatcher that spawns onto the current tokio `LocalSet`.
    ///
    /// # Panics
    ///
    /// Panics outside a `LocalSet`. See [`TokioScheduler::new`].
    #[must_use]
    pub fn tokio() -> Self {
        Self::new(TokioScheduler::new())
    }

    /// Forward reported activation errors to `sink` in addition to logging them.
    #[must_use]
    pub fn with_error_sink(mut self, sink: impl Fn(&ActivationError) + 'static) -> Self {
        self.sink = Some(Rc::new(sink));
        self
    }

    /// Spawn a task. A panic inside it is logged and contained.
    pub fn spawn(&self, task: &'static str, fut: impl Future<Output = ()> + 'static) {
        let guarded = AssertUnwindSafe(fut).catch_unwind().map(move |outcome| {
            if let Err(payload) = outcome {
                error!(
                    task,
                    panic = %panic_message(payload.as_ref()),
                    "scheduled task panicked"
                );
            }
        });
        self.scheduler.schedule(guarded.boxed_local());
    }

    /// Schedule a teardown to run on the next scheduling opportunity.
    pub fn schedule_teardown(&self, teardown: Teardown) {
        self.spawn("teardown", teardown.run());
    }

    /// Report an activation error.
    pub fn report(&self, err: ActivationError) {
        warn!(context = err.context(), %err, "activation failed");
        if let Some(sink) = &self.sink {
            sink(&err);
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("has_error_sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use futures::executor::LocalPool;

    use super::*;

    #[test]
    fn test_spawn_is_deferred() {
        let mut pool = LocalPool::new();
        let dispatcher = Dispatcher::new(pool.spawner());
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        dispatcher.spawn("probe", async move { flag.set(true) });
        assert!(!ran.get(), "task must not run inline");
        pool.run_until_stalled();
        assert!(ran.get());
    }

    #[test]
    fn test_teardown_panic_is_contained() {
        let mut pool = LocalPool::new();
        let dispatcher = Dispatcher::new(pool.spawner());
        let after = Rc::new(Cell::new(false));
        let flag = after.clone();
        dispatcher.schedule_teardown(Teardown::new(|| panic!("teardown exploded")));
        dispatcher.spawn("after", async move { flag.set(true) });
        pool.run_until_stalled();
        assert!(after.get(), "later tasks still run after a panicking teardown");
    }

    #[test]
    fn test_report_forwards_to_sink() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let dispatcher = Dispatcher::new(LocalPool::new().spawner())
            .with_error_sink(move |err| sink.borrow_mut().push(err.context().to_string()));
        dispatcher.report(ActivationError::Panicked {
            context: "players Entity(3)".into(),
            message: "boom".into(),
        });
        assert_eq!(*seen.borrow(), vec!["players Entity(3)".to_string()]);
        assert!(format!("{dispatcher:?}").contains("has_error_sink: true"));
    }

    #[tokio::test]
    async fn test_tokio_scheduler_runs_on_local_set() {
        let local = tokio::task::LocalSet::new();
        let ran = Rc::new(Cell::new(0));
        let counter = ran.clone();
        local
            .run_until(async move {
                let dispatcher = Dispatcher::tokio();
                dispatcher.schedule_teardown(Teardown::new(move || counter.set(counter.get() + 1)));
                tokio::task::yield_now().await;
            })
            .await;
        local.await;
        assert_eq!(ran.get(), 1);
    }

    #[tokio::test]
    async fn test_tokio_scheduler_accepts_tasks_outside_local_set() {
        let local = tokio::task::LocalSet::new();
        let dispatcher = local.run_until(async { Dispatcher::tokio() }).await;
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        dispatcher.schedule_teardown(Teardown::new(move || flag.set(true)));
        assert!(!ran.get());

        drop(dispatcher);
        local.await;
        assert!(ran.get());
    }

    #[tokio::test]
    async fn test_tokio_scheduler_drops_tasks_after_local_set_is_gone() {
        let local = tokio::task::LocalSet::new();
        let dispatcher = local.run_until(async { Dispatcher::tokio() }).await;
        drop(local);

        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        dispatcher.schedule_teardown(Teardown::new(move || flag.set(true)));
        assert!(!ran.get());
    }
}
