use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::cleanup::CleanupRegistry;
use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::fabric::{Fabric, Handler, Message, ObjectHandler};
use crate::future::{Dependency, Future};
use crate::task::{self, Task, TaskQueue};

/// Identifier of a registered object.
///
/// Ids are handed out in registration order, so objects constructed in the
/// same order on every rank share an id.
pub type ObjectId = u64;

#[derive(Default)]
struct ObjectRegistry {
    next_id: ObjectId,
    objects: HashMap<ObjectId, Rc<dyn Any>>,
    /// Messages that arrived before their target was registered here.
    parked: HashMap<ObjectId, Vec<ObjectHandler>>,
}

struct WorldInner {
    rank: usize,
    config: RuntimeConfig,
    fabric: Arc<Fabric>,
    tasks: Rc<TaskQueue>,
    objects: RefCell<ObjectRegistry>,
    replies: RefCell<HashMap<u64, Rc<dyn Any>>>,
    next_request: Cell<u64>,
    cleanup: CleanupRegistry,
}

/// One process's view of the process group.
///
/// A `World` is confined to its process thread. Clones are cheap handles to
/// the same state.
#[derive(Clone)]
pub struct World {
    inner: Rc<WorldInner>,
}

impl World {
    pub(crate) fn new(rank: usize, config: RuntimeConfig, fabric: Arc<Fabric>) -> Self {
        World {
            inner: Rc::new(WorldInner {
                rank,
                config,
                tasks: Rc::new(TaskQueue::new(Arc::clone(&fabric))),
                fabric,
                objects: RefCell::new(ObjectRegistry::default()),
                replies: RefCell::new(HashMap::new()),
                next_request: Cell::new(0),
                cleanup: CleanupRegistry::default(),
            }),
        }
    }

    pub fn rank(&self) -> usize {
        self.inner.rank
    }

    /// Number of processes in the group.
    pub fn size(&self) -> usize {
        self.inner.fabric.size()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn cleanup(&self) -> &CleanupRegistry {
        &self.inner.cleanup
    }

    /// Number of tasks ready to run on this process.
    pub fn ready_tasks(&self) -> usize {
        self.inner.tasks.len()
    }

    // --- tasks -------------------------------------------------------------

    /// Run `f` as a task on this process.
    pub fn spawn<R, E, F>(&self, f: F) -> Future<R>
    where
        R: 'static,
        E: fmt::Display,
        F: FnOnce(&World) -> std::result::Result<R, E> + 'static,
    {
        self.add_task(&[], f)
    }

    /// Run `f` as a task once every dependency is satisfied.
    ///
    /// The returned future holds the task's value. An `Err` from `f` fails the
    /// task, which aborts the process group.
    pub fn add_task<R, E, F>(&self, deps: &[&dyn Dependency], f: F) -> Future<R>
    where
        R: 'static,
        E: fmt::Display,
        F: FnOnce(&World) -> std::result::Result<R, E> + 'static,
    {
        let result = Future::new();
        let out = result.clone();
        let task: Task = Box::new(move |world: &World| -> Result<()> {
            let value = f(world).map_err(|e| world.task_error(e))?;
            out.set(value);
            Ok(())
        });
        task::schedule(&self.inner.tasks, deps, task);
        result
    }

    fn task_error(&self, e: impl fmt::Display) -> RuntimeError {
        RuntimeError::TaskFailed {
            rank: self.rank(),
            msg: e.to_string(),
        }
    }

    // --- messaging ---------------------------------------------------------

    /// Run `f` on process `dest`.
    pub fn send<E, F>(&self, dest: usize, f: F) -> Result<()>
    where
        E: fmt::Display,
        F: FnOnce(&World) -> std::result::Result<(), E> + Send + 'static,
    {
        trace!(from = self.rank(), dest, "send");
        let handler: Box<dyn FnOnce(&World) -> Result<()> + Send> =
            Box::new(move |world: &World| f(world).map_err(|e| world.task_error(e)));
        self.inner.fabric.send(
            dest,
            Message {
                from: self.rank(),
                handler: Handler::World(handler),
            },
        )
    }

    /// Run `f` on process `dest` against its instance of object `id`.
    ///
    /// Messages that arrive before `dest` has registered `id` are held until
    /// it does.
    pub fn send_to_object<O, E, F>(&self, dest: usize, id: ObjectId, f: F) -> Result<()>
    where
        O: 'static,
        E: fmt::Display,
        F: FnOnce(&World, Rc<O>) -> std::result::Result<(), E> + Send + 'static,
    {
        trace!(from = self.rank(), dest, id, "send to object");
        let handler: ObjectHandler =
            Box::new(move |world: &World, any: Rc<dyn Any>| -> Result<()> {
                let obj = any.downcast::<O>().map_err(|_| RuntimeError::UnknownObject {
                    rank: world.rank(),
                    id,
                })?;
                f(world, obj).map_err(|e| world.task_error(e))
            });
        self.inner.fabric.send(
            dest,
            Message {
                from: self.rank(),
                handler: Handler::Object(id, handler),
            },
        )
    }

    /// One-sided fetch: run `f` against object `id` on `dest` and return a
    /// future for the value of the future it yields.
    ///
    /// If `f` fails on `dest`, the reply aborts the group with
    /// [`RuntimeError::RemoteFetch`].
    pub fn request<O, T, E, F>(&self, dest: usize, id: ObjectId, f: F) -> Result<Future<T>>
    where
        O: 'static,
        T: Clone + Send + 'static,
        E: fmt::Display,
        F: FnOnce(&World, Rc<O>) -> std::result::Result<Future<T>, E> + Send + 'static,
    {
        let result: Future<T> = Future::new();
        let request_id = self.inner.next_request.get();
        self.inner.next_request.set(request_id + 1);
        self.inner
            .replies
            .borrow_mut()
            .insert(request_id, Rc::new(result.clone()));

        let origin = self.rank();
        self.send_to_object::<O, RuntimeError, _>(dest, id, move |world, obj| {
            let source = world.rank();
            match f(world, obj) {
                Ok(value) => {
                    let reply = value.clone();
                    world.add_task(&[&value], move |world| match reply.try_get() {
                        Some(v) => world.send::<RuntimeError, _>(origin, move |world| {
                            world.complete_request(request_id, source, Ok(v))
                        }),
                        None => Err(RuntimeError::TaskFailed {
                            rank: world.rank(),
                            msg: "reply value vanished".to_string(),
                        }),
                    });
                    Ok(())
                }
                Err(e) => {
                    let msg = e.to_string();
                    world.send::<RuntimeError, _>(origin, move |world| {
                        world.complete_request::<T>(request_id, source, Err(msg))
                    })
                }
            }
        })?;
        Ok(result)
    }

    fn complete_request<T: 'static>(
        &self,
        request_id: u64,
        source: usize,
        reply: std::result::Result<T, String>,
    ) -> Result<()> {
        let slot = self.inner.replies.borrow_mut().remove(&request_id);
        let future = slot
            .and_then(|any| any.downcast::<Future<T>>().ok())
            .ok_or_else(|| RuntimeError::RemoteFetch {
                rank: self.rank(),
                target: source,
                msg: format!("no pending request {}", request_id),
            })?;
        match reply {
            Ok(value) => {
                future.set(value);
                Ok(())
            }
            Err(msg) => Err(RuntimeError::RemoteFetch {
                rank: self.rank(),
                target: source,
                msg,
            }),
        }
    }

    // --- objects -----------------------------------------------------------

    /// Register `obj` so messages can address it, returning its id.
    pub fn register_object<O: 'static>(&self, obj: Rc<O>) -> ObjectId {
        let (id, parked) = {
            let mut reg = self.inner.objects.borrow_mut();
            let id = reg.next_id;
            reg.next_id += 1;
            reg.objects.insert(id, obj);
            (id, reg.parked.remove(&id).unwrap_or_default())
        };
        debug!(rank = self.rank(), id, parked = parked.len(), "registered object");
        for handler in parked {
            let task: Task = Box::new(move |world: &World| -> Result<()> {
                let obj = world.object_any(id)?;
                handler(world, obj)
            });
            self.inner.tasks.push_counted(task);
        }
        id
    }

    /// Look up a registered object.
    pub fn object<O: 'static>(&self, id: ObjectId) -> Result<Rc<O>> {
        self.object_any(id)?
            .downcast::<O>()
            .map_err(|_| RuntimeError::UnknownObject {
                rank: self.rank(),
                id,
            })
    }

    fn object_any(&self, id: ObjectId) -> Result<Rc<dyn Any>> {
        self.inner
            .objects
            .borrow()
            .objects
            .get(&id)
            .cloned()
            .ok_or(RuntimeError::UnknownObject {
                rank: self.rank(),
                id,
            })
    }

    pub fn is_registered(&self, id: ObjectId) -> bool {
        self.inner.objects.borrow().objects.contains_key(&id)
    }

    /// Remove `id` from the registry, handing back the registry's reference.
    pub(crate) fn unregister(&self, id: ObjectId) -> Option<Rc<dyn Any>> {
        self.inner.objects.borrow_mut().objects.remove(&id)
    }

    // --- progress ----------------------------------------------------------

    /// Handle one incoming message or run one ready task.
    ///
    /// Returns `Ok(false)` if there was nothing to do. A failing task or
    /// message handler aborts the group and its error is returned.
    pub fn run_one(&self) -> Result<bool> {
        let fabric = &self.inner.fabric;
        if let Some(msg) = fabric.try_recv(self.rank()) {
            if let Some(result) = self.dispatch(msg) {
                fabric.finish();
                self.check_failure(result)?;
            }
            return Ok(true);
        }
        if let Some(task) = self.inner.tasks.pop() {
            let result = self.guarded(move |world| task(world));
            fabric.finish();
            self.check_failure(result)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Returns `None` if the message was parked for a future object.
    fn dispatch(&self, msg: Message) -> Option<Result<()>> {
        match msg.handler {
            Handler::World(handler) => Some(self.guarded(move |world| handler(world))),
            Handler::Object(id, handler) => {
                let obj = self.inner.objects.borrow().objects.get(&id).cloned();
                match obj {
                    Some(obj) => Some(self.guarded(move |world| handler(world, obj))),
                    None => {
                        let mut reg = self.inner.objects.borrow_mut();
                        if id >= reg.next_id {
                            trace!(rank = self.rank(), id, "parking message");
                            reg.parked.entry(id).or_default().push(handler);
                            None
                        } else {
                            warn!(
                                rank = self.rank(),
                                id,
                                from = msg.from,
                                "dropping message for released object"
                            );
                            Some(Ok(()))
                        }
                    }
                }
            }
        }
    }

    fn guarded(&self, f: impl FnOnce(&World) -> Result<()>) -> Result<()> {
        panic::catch_unwind(AssertUnwindSafe(|| f(self))).unwrap_or_else(|payload| {
            Err(RuntimeError::TaskFailed {
                rank: self.rank(),
                msg: panic_message(payload.as_ref()),
            })
        })
    }

    fn check_failure(&self, result: Result<()>) -> Result<()> {
        if let Err(e) = &result {
            if !matches!(e, RuntimeError::Aborted { .. }) {
                self.inner.fabric.abort(self.rank(), e.to_string());
            }
        }
        result
    }

    /// Returns the group abort as an error, if one happened.
    pub fn check_abort(&self) -> Result<()> {
        match self.inner.fabric.abort_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Abort the whole process group.
    pub fn abort(&self, reason: impl Into<String>) {
        self.inner.fabric.abort(self.rank(), reason.into());
    }

    /// Keep executing work until `ready` returns true.
    ///
    /// Fails if the group aborts or no progress is made within the configured
    /// wait timeout; a timeout aborts the group.
    pub fn await_until(&self, what: &str, mut ready: impl FnMut() -> bool) -> Result<()> {
        let mut last_progress = Instant::now();
        while !ready() {
            self.check_abort()?;
            if self.run_one()? {
                last_progress = Instant::now();
                continue;
            }
            self.check_timeout(last_progress, what)?;
            self.inner
                .fabric
                .idle_wait(self.rank(), self.inner.config.idle_poll);
        }
        Ok(())
    }

    /// Abort the group once `wait_timeout` has passed since `last_progress`.
    fn check_timeout(&self, last_progress: Instant, what: &str) -> Result<()> {
        let timeout = self.inner.config.wait_timeout;
        if last_progress.elapsed() < timeout {
            return Ok(());
        }
        let err = RuntimeError::WaitTimeout {
            rank: self.rank(),
            timeout,
            what: what.to_string(),
        };
        self.inner.fabric.abort(self.rank(), err.to_string());
        Err(err)
    }

    /// Collective barrier.
    ///
    /// Returns once every process has entered the fence and no message or
    /// task is in flight anywhere in the group. Objects whose release was
    /// deferred are then dropped.
    pub fn fence(&self) -> Result<()> {
        let fabric = &self.inner.fabric;
        let generation = fabric.arrive();
        trace!(rank = self.rank(), generation, "fence");
        let mut last_progress = Instant::now();
        loop {
            self.check_abort()?;
            if self.run_one()? {
                last_progress = Instant::now();
                continue;
            }
            if fabric.try_complete(generation) {
                break;
            }
            self.check_timeout(last_progress, "fence")?;
            fabric.idle_wait(self.rank(), self.inner.config.idle_poll);
        }
        let released = self.inner.cleanup.release_deferred(self);
        if released > 0 {
            debug!(rank = self.rank(), released, "released deferred objects");
        }
        Ok(())
    }

    /// Fence until no deferred release is pending.
    pub fn wait_for_lazy_cleanup(&self) -> Result<()> {
        loop {
            self.fence()?;
            if self.inner.cleanup.pending() == 0 {
                return Ok(());
            }
        }
    }

    /// Drop everything this process still holds.
    pub(crate) fn shutdown(&self) {
        self.inner.tasks.clear();
        let (objects, parked) = {
            let mut reg = self.inner.objects.borrow_mut();
            (
                std::mem::take(&mut reg.objects),
                std::mem::take(&mut reg.parked),
            )
        };
        for _ in parked.values().flatten() {
            self.inner.fabric.finish();
        }
        drop(parked);
        drop(objects);
        self.inner.replies.borrow_mut().clear();
        // Drops above may have queued more work.
        self.inner.tasks.clear();
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("rank", &self.rank())
            .field("size", &self.size())
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
