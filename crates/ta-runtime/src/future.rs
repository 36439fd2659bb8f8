use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::Result;
use crate::world::World;

type Callback = Box<dyn FnOnce()>;

struct State<T> {
    value: Option<T>,
    callbacks: Vec<Callback>,
}

/// A single-assignment, process-local value that may not exist yet.
///
/// Clones share the same slot. Callbacks registered before the value is set
/// run exactly once, in registration order, when [`set`](Future::set) is
/// called; callbacks registered afterwards run immediately.
pub struct Future<T> {
    state: Rc<RefCell<State<T>>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Future {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: 'static> Default for Future<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Future<T> {
    /// An unassigned future.
    pub fn new() -> Self {
        Future {
            state: Rc::new(RefCell::new(State {
                value: None,
                callbacks: Vec::new(),
            })),
        }
    }

    /// A future that already holds `value`.
    pub fn ready(value: T) -> Self {
        Future {
            state: Rc::new(RefCell::new(State {
                value: Some(value),
                callbacks: Vec::new(),
            })),
        }
    }

    /// Returns true once a value has been assigned. Never blocks.
    pub fn probe(&self) -> bool {
        self.state.borrow().value.is_some()
    }

    /// Assign the value and run pending callbacks.
    ///
    /// # Panics
    /// Panics if the future was already assigned.
    pub fn set(&self, value: T) {
        let callbacks = {
            let mut state = self.state.borrow_mut();
            assert!(state.value.is_none(), "future assigned twice");
            state.value = Some(value);
            std::mem::take(&mut state.callbacks)
        };
        for cb in callbacks {
            cb();
        }
    }

    pub fn register_callback(&self, cb: impl FnOnce() + 'static) {
        let mut state = self.state.borrow_mut();
        if state.value.is_some() {
            drop(state);
            cb();
        } else {
            state.callbacks.push(Box::new(cb));
        }
    }

    /// Borrow the value, if assigned.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.state.borrow().value.as_ref().map(f)
    }

    /// Returns true if both handles share the same slot.
    pub fn ptr_eq(&self, other: &Future<T>) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl<T: Clone + 'static> Future<T> {
    pub fn try_get(&self) -> Option<T> {
        self.state.borrow().value.clone()
    }

    /// Wait for the value, executing other work of this process meanwhile.
    pub fn get(&self, world: &World) -> Result<T> {
        loop {
            if let Some(value) = self.try_get() {
                return Ok(value);
            }
            world.await_until("future", || self.probe())?;
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ready = self.state.try_borrow().map(|s| s.value.is_some()).ok();
        f.debug_struct("Future").field("ready", &ready).finish()
    }
}

/// Something a task can wait on.
pub trait Dependency {
    fn probe(&self) -> bool;

    /// Run `cb` once the dependency is satisfied.
    fn on_ready(&self, cb: Box<dyn FnOnce()>);
}

impl<T: 'static> Dependency for Future<T> {
    fn probe(&self) -> bool {
        Future::probe(self)
    }

    fn on_ready(&self, cb: Box<dyn FnOnce()>) {
        self.register_callback(cb);
    }
}
