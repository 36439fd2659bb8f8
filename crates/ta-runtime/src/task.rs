use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::Result;
use crate::fabric::Fabric;
use crate::future::Dependency;
use crate::world::World;

pub(crate) type Task = Box<dyn FnOnce(&World) -> Result<()>>;

/// Ready queue of one process.
///
/// Every queued task is counted as in-flight work on the fabric until it has
/// run, so fences cannot complete while tasks are pending.
pub(crate) struct TaskQueue {
    ready: RefCell<VecDeque<Task>>,
    fabric: Arc<Fabric>,
}

impl TaskQueue {
    pub fn new(fabric: Arc<Fabric>) -> Self {
        TaskQueue {
            ready: RefCell::new(VecDeque::new()),
            fabric,
        }
    }

    pub fn push(&self, task: Task) {
        self.fabric.begin();
        self.ready.borrow_mut().push_back(task);
    }

    /// Queue a task whose work is already counted (a parked message).
    pub fn push_counted(&self, task: Task) {
        self.ready.borrow_mut().push_back(task);
    }

    pub fn pop(&self) -> Option<Task> {
        self.ready.borrow_mut().pop_front()
    }

    pub fn len(&self) -> usize {
        self.ready.borrow().len()
    }

    pub fn clear(&self) {
        let dropped = std::mem::take(&mut *self.ready.borrow_mut());
        for _ in 0..dropped.len() {
            self.fabric.finish();
        }
    }
}

/// A task waiting on unresolved inputs.
struct PendingTask {
    remaining: Cell<usize>,
    task: RefCell<Option<Task>>,
}

/// Queue `task` once every dependency is satisfied.
pub(crate) fn schedule(queue: &Rc<TaskQueue>, deps: &[&dyn Dependency], task: Task) {
    let unresolved: Vec<&&dyn Dependency> = deps.iter().filter(|d| !d.probe()).collect();
    if unresolved.is_empty() {
        queue.push(task);
        return;
    }
    let node = Rc::new(PendingTask {
        remaining: Cell::new(unresolved.len()),
        task: RefCell::new(Some(task)),
    });
    for dep in unresolved {
        let node = Rc::clone(&node);
        let queue = Rc::clone(queue);
        dep.on_ready(Box::new(move || {
            let left = node.remaining.get() - 1;
            node.remaining.set(left);
            if left == 0 {
                if let Some(task) = node.task.borrow_mut().take() {
                    queue.push(task);
                }
            }
        }));
    }
}
