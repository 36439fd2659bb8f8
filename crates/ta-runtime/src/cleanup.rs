use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::error;

use crate::world::{panic_message, ObjectId, World};

/// Objects whose release waits for the next fence.
///
/// A registered object may still be the target of in-flight messages when its
/// last local handle goes away, so it is only removed from the registry once
/// the group has passed a fence.
#[derive(Clone, Default)]
pub struct CleanupRegistry {
    deferred: Rc<RefCell<Vec<ObjectId>>>,
    released: Rc<Cell<usize>>,
}

impl CleanupRegistry {
    pub fn defer(&self, id: ObjectId) {
        self.deferred.borrow_mut().push(id);
    }

    /// Objects waiting for a fence.
    pub fn pending(&self) -> usize {
        self.deferred.borrow().len()
    }

    /// Objects released so far.
    pub fn released(&self) -> usize {
        self.released.get()
    }

    /// Drop every deferred object. A panic while dropping is logged and the
    /// remaining objects are still released.
    pub(crate) fn release_deferred(&self, world: &World) -> usize {
        let ids = std::mem::take(&mut *self.deferred.borrow_mut());
        let mut count = 0;
        for id in ids {
            let Some(obj) = world.unregister(id) else {
                continue;
            };
            count += 1;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || drop(obj))) {
                error!(
                    rank = world.rank(),
                    id,
                    reason = %panic_message(payload.as_ref()),
                    "failed to release object"
                );
            }
        }
        self.released.set(self.released.get() + count);
        count
    }
}

/// Handle whose drop schedules release of a registered object.
pub struct ReleaseGuard {
    world: World,
    id: ObjectId,
}

impl ReleaseGuard {
    pub fn new(world: World, id: ObjectId) -> Self {
        ReleaseGuard { world, id }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn world(&self) -> &World {
        &self.world
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.world.cleanup().defer(self.id);
    }
}

impl std::fmt::Debug for ReleaseGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseGuard").field("id", &self.id).finish()
    }
}
