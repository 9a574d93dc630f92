//! Generation-guarded single-slot activation.
//!
//! A [`GenerationSlot`] holds at most one live activation. Every update tears
//! down the current activation, bumps the generation counter and, if the new
//! value is admitted by the guard, dispatches an activation for it. When that
//! activation resolves, its teardown is kept only if no newer update or
//! disposal happened in the meantime; otherwise it is scheduled immediately.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::activation::{ActivateFn, invoke};
use crate::scheduler::Dispatcher;
use crate::teardown::Teardown;

/// Admission predicate applied to each new value.
pub type Guard<V> = Rc<dyn Fn(&V) -> bool>;

#[derive(Debug, Default)]
struct SlotState {
    generation: u64,
    current: Option<Teardown>,
    disposed: bool,
}

/// A single activation slot with stale-result detection.
pub struct GenerationSlot<V> {
    state: Rc<RefCell<SlotState>>,
    dispatcher: Dispatcher,
    activate: ActivateFn<V>,
    guard: Option<Guard<V>>,
    context: String,
}

impl<V: 'static> GenerationSlot<V> {
    /// Create an empty slot. `context` identifies the slot in reports.
    pub fn new(dispatcher: Dispatcher, activate: ActivateFn<V>, context: impl Into<String>) -> Self {
        Self {
            state: Rc::new(RefCell::new(SlotState::default())),
            dispatcher,
            activate,
            guard: None,
            context: context.into(),
        }
    }

    /// Only values for which `guard` returns `true` are activated.
    #[must_use]
    pub fn with_guard(mut self, guard: Guard<V>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Feed a new value into the slot.
    ///
    /// Returns `true` if an activation was dispatched. `None` and values the
    /// guard rejects only tear down the current activation.
    pub fn update(&self, value: Option<V>) -> bool {
        let (id, previous) = {
            let mut state = self.state.borrow_mut();
            if state.disposed {
                return false;
            }
            state.generation += 1;
            (state.generation, state.current.take())
        };
        if let Some(teardown) = previous {
            trace!(context = %self.context, "tearing down previous activation");
            self.dispatcher.schedule_teardown(teardown);
        }

        let Some(value) = value else {
            return false;
        };
        if let Some(guard) = &self.guard
            && !guard(&value)
        {
            trace!(context = %self.context, generation = id, "value rejected by guard");
            return false;
        }

        let state = Rc::downgrade(&self.state);
        let dispatcher = self.dispatcher.clone();
        let activate = Rc::clone(&self.activate);
        let context = self.context.clone();
        debug!(context = %context, generation = id, "dispatching activation");
        self.dispatcher.spawn("activation", async move {
            match invoke(activate, value, context.clone()).await {
                Ok(teardown) => settle(&state, &dispatcher, id, teardown, &context),
                Err(err) => dispatcher.report(err),
            }
        });
        true
    }

    /// Dispose the slot: tear down the current activation and mark any
    /// in-flight activation stale. Later updates are ignored.
    pub fn dispose(&self) {
        let previous = {
            let mut state = self.state.borrow_mut();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.generation += 1;
            state.current.take()
        };
        if let Some(teardown) = previous {
            self.dispatcher.schedule_teardown(teardown);
        }
        debug!(context = %self.context, "slot disposed");
    }

    /// Returns `true` if a resolved activation is currently held.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.borrow().current.is_some()
    }

    /// Returns `true` once [`dispose`](Self::dispose) has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.state.borrow().disposed
    }

    /// Returns the current generation counter.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.borrow().generation
    }

    /// Returns the context string used in reports.
    #[must_use]
    pub fn context(&self) -> &str {
        &self.context
    }
}

/// Accept `teardown` as the slot's activation if generation `id` is still
/// current, otherwise schedule it.
fn settle(
    state: &Weak<RefCell<SlotState>>,
    dispatcher: &Dispatcher,
    id: u64,
    teardown: Teardown,
    context: &str,
) {
    let rejected = match state.upgrade() {
        Some(state) => {
            let mut state = state.borrow_mut();
            if state.generation == id && !state.disposed {
                state.current = Some(teardown);
                None
            } else {
                Some(teardown)
            }
        }
        None => Some(teardown),
    };
    if let Some(teardown) = rejected {
        debug!(context, generation = id, "discarding stale activation");
        dispatcher.schedule_teardown(teardown);
    }
}

impl<V> fmt::Debug for GenerationSlot<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("GenerationSlot")
            .field("context", &self.context)
            .field("generation", &state.generation)
            .field("active", &state.current.is_some())
            .field("disposed", &state.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use futures::channel::oneshot;
    use futures::executor::LocalPool;

    use super::*;
    use crate::activation::activator;

    /// Records activations and teardowns; each activation waits for a
    /// release before resolving.
    #[derive(Default)]
    struct Gate {
        pending: RefCell<Vec<(i32, oneshot::Sender<()>)>>,
        started: RefCell<Vec<i32>>,
        torn_down: RefCell<Vec<i32>>,
    }

    impl Gate {
        fn activate(self: &Rc<Self>) -> ActivateFn<i32> {
            let gate = Rc::clone(self);
            activator(move |value: i32| {
                let gate = Rc::clone(&gate);
                async move {
                    let (tx, rx) = oneshot::channel();
                    gate.started.borrow_mut().push(value);
                    gate.pending.borrow_mut().push((value, tx));
                    let _ = rx.await;
                    let log = Rc::clone(&gate);
                    Ok(Teardown::new(move || log.torn_down.borrow_mut().push(value)))
                }
            })
        }

        fn release(&self, value: i32) {
            let mut pending = self.pending.borrow_mut();
            let pos = pending.iter().position(|(v, _)| *v == value).unwrap();
            let (_, tx) = pending.remove(pos);
            tx.send(()).unwrap();
        }
    }

    fn setup() -> (LocalPool, Rc<Gate>, GenerationSlot<i32>) {
        let pool = LocalPool::new();
        let gate = Rc::new(Gate::default());
        let slot = GenerationSlot::new(Dispatcher::new(pool.spawner()), gate.activate(), "test slot");
        (pool, gate, slot)
    }

    #[test]
    fn test_activation_is_not_inline() {
        let (mut pool, gate, slot) = setup();
        assert!(slot.update(Some(1)));
        assert!(gate.started.borrow().is_empty());
        pool.run_until_stalled();
        assert_eq!(*gate.started.borrow(), vec![1]);
    }

    #[test]
    fn test_resolved_activation_is_held() {
        let (mut pool, gate, slot) = setup();
        slot.update(Some(1));
        pool.run_until_stalled();
        gate.release(1);
        pool.run_until_stalled();
        assert!(slot.is_active());
        assert!(gate.torn_down.borrow().is_empty());
    }

    #[test]
    fn test_update_tears_down_previous() {
        let (mut pool, gate, slot) = setup();
        slot.update(Some(1));
        pool.run_until_stalled();
        gate.release(1);
        pool.run_until_stalled();

        slot.update(Some(2));
        pool.run_until_stalled();
        assert_eq!(*gate.torn_down.borrow(), vec![1]);
        assert!(!slot.is_active());
        gate.release(2);
        pool.run_until_stalled();
        assert!(slot.is_active());
    }

    #[test]
    fn test_out_of_order_resolution_drops_stale() {
        let (mut pool, gate, slot) = setup();
        slot.update(Some(1));
        slot.update(Some(2));
        pool.run_until_stalled();
        assert_eq!(*gate.started.borrow(), vec![1, 2]);

        gate.release(2);
        pool.run_until_stalled();
        assert!(slot.is_active());

        gate.release(1);
        pool.run_until_stalled();
        assert_eq!(*gate.torn_down.borrow(), vec![1]);
        assert!(slot.is_active(), "newer activation stays held");
    }

    #[test]
    fn test_guard_rejection_still_tears_down() {
        let (mut pool, gate, slot) = setup();
        let slot = slot.with_guard(Rc::new(|v: &i32| *v > 0));
        slot.update(Some(5));
        pool.run_until_stalled();
        gate.release(5);
        pool.run_until_stalled();

        assert!(!slot.update(Some(-1)));
        pool.run_until_stalled();
        assert_eq!(*gate.started.borrow(), vec![5]);
        assert_eq!(*gate.torn_down.borrow(), vec![5]);
        assert!(!slot.is_active());
    }

    #[test]
    fn test_rejected_update_makes_inflight_stale() {
        let (mut pool, gate, slot) = setup();
        slot.update(Some(3));
        pool.run_until_stalled();
        slot.update(None);
        gate.release(3);
        pool.run_until_stalled();
        assert!(!slot.is_active());
        assert_eq!(*gate.torn_down.borrow(), vec![3]);
    }

    #[test]
    fn test_dispose_while_inflight() {
        let (mut pool, gate, slot) = setup();
        slot.update(Some(4));
        pool.run_until_stalled();
        slot.dispose();
        gate.release(4);
        pool.run_until_stalled();
        assert!(!slot.is_active());
        assert_eq!(*gate.torn_down.borrow(), vec![4]);
        assert!(!slot.update(Some(5)), "disposed slot ignores updates");
    }

    #[test]
    fn test_dispose_twice_tears_down_once() {
        let (mut pool, gate, slot) = setup();
        slot.update(Some(1));
        pool.run_until_stalled();
        gate.release(1);
        pool.run_until_stalled();
        slot.dispose();
        slot.dispose();
        pool.run_until_stalled();
        assert_eq!(*gate.torn_down.borrow(), vec![1]);
    }

    #[test]
    fn test_dropped_slot_still_tears_down_late_result() {
        let (mut pool, gate, slot) = setup();
        slot.update(Some(9));
        pool.run_until_stalled();
        drop(slot);
        gate.release(9);
        pool.run_until_stalled();
        assert_eq!(*gate.torn_down.borrow(), vec![9]);
    }

    #[test]
    fn test_failed_activation_is_reported() {
        let mut pool = LocalPool::new();
        let reports = Rc::new(Cell::new(0));
        let counter = reports.clone();
        let dispatcher = Dispatcher::new(pool.spawner())
            .with_error_sink(move |_| counter.set(counter.get() + 1));
        let slot = GenerationSlot::new(
            dispatcher,
            activator(|_: i32| async { Err(anyhow::anyhow!("refused")) }),
            "failing slot",
        );
        slot.update(Some(1));
        pool.run_until_stalled();
        assert_eq!(reports.get(), 1);
        assert!(!slot.is_active());
    }
}
