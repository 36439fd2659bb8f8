//! State shared by every process of a group: mailboxes, the in-flight work
//! counter used for quiescence detection, the fence barrier and the abort
//! flag.

use std::any::Any;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, RuntimeError};
use crate::world::{ObjectId, World};

pub(crate) type WorldHandler = Box<dyn FnOnce(&World) -> Result<()> + Send>;
pub(crate) type ObjectHandler = Box<dyn FnOnce(&World, Rc<dyn Any>) -> Result<()> + Send>;

pub(crate) enum Handler {
    World(WorldHandler),
    Object(ObjectId, ObjectHandler),
}

pub(crate) struct Message {
    pub from: usize,
    pub handler: Handler,
}

struct Mailbox {
    queue: Mutex<VecDeque<Message>>,
    wake: Condvar,
}

struct BarrierState {
    arrived: usize,
    generation: u64,
}

pub(crate) struct Fabric {
    mailboxes: Vec<Mailbox>,
    /// Messages not yet handled plus ready or running tasks, over all ranks.
    outstanding: AtomicUsize,
    barrier: Mutex<BarrierState>,
    aborted: AtomicBool,
    abort_info: Mutex<Option<(usize, String)>>,
}

impl Fabric {
    pub fn new(size: usize) -> Self {
        Fabric {
            mailboxes: (0..size)
                .map(|_| Mailbox {
                    queue: Mutex::new(VecDeque::new()),
                    wake: Condvar::new(),
                })
                .collect(),
            outstanding: AtomicUsize::new(0),
            barrier: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
            }),
            aborted: AtomicBool::new(false),
            abort_info: Mutex::new(None),
        }
    }

    pub fn size(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn send(&self, to: usize, msg: Message) -> Result<()> {
        let mailbox = self.mailboxes.get(to).ok_or(RuntimeError::InvalidRank {
            rank: to,
            size: self.size(),
        })?;
        self.begin();
        mailbox.queue.lock().push_back(msg);
        mailbox.wake.notify_one();
        Ok(())
    }

    pub fn try_recv(&self, rank: usize) -> Option<Message> {
        self.mailboxes[rank].queue.lock().pop_front()
    }

    /// Block until a message arrives for `rank`, the group aborts, or
    /// `timeout` elapses.
    pub fn idle_wait(&self, rank: usize, timeout: Duration) {
        let mailbox = &self.mailboxes[rank];
        let mut queue = mailbox.queue.lock();
        if queue.is_empty() && !self.is_aborted() {
            mailbox.wake.wait_for(&mut queue, timeout);
        }
    }

    /// Count a unit of work that must finish before the group is quiescent.
    pub fn begin(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    pub fn finish(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Register arrival at the next fence and return its generation.
    pub fn arrive(&self) -> u64 {
        let mut state = self.barrier.lock();
        state.arrived += 1;
        state.generation
    }

    /// Returns true once fence `generation` has completed.
    ///
    /// The fence completes when every rank has arrived and no message or task
    /// is in flight anywhere; the first rank to observe that opens the next
    /// generation.
    pub fn try_complete(&self, generation: u64) -> bool {
        let mut state = self.barrier.lock();
        if state.generation != generation {
            return true;
        }
        if self.is_aborted() {
            return false;
        }
        if state.arrived == self.size() && self.outstanding() == 0 {
            state.arrived = 0;
            state.generation += 1;
            drop(state);
            self.wake_all();
            return true;
        }
        false
    }

    pub fn abort(&self, origin: usize, reason: String) {
        if self.aborted.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::error!(origin, %reason, "aborting process group");
        *self.abort_info.lock() = Some((origin, reason));
        self.wake_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn abort_error(&self) -> Option<RuntimeError> {
        if !self.is_aborted() {
            return None;
        }
        let info = self.abort_info.lock();
        let (origin, reason) = info.clone().unwrap_or((usize::MAX, String::new()));
        Some(RuntimeError::Aborted { origin, reason })
    }

    fn wake_all(&self) {
        for mailbox in &self.mailboxes {
            let _queue = mailbox.queue.lock();
            mailbox.wake.notify_all();
        }
    }
}
