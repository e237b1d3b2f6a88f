//! The process-group execution context.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, error, info, warn};
use transport::{Comm, Rank};
use transport_codecs::WorldRef;

use crate::am::{ActiveMessages, AmState};
use crate::deferred::DeferredCleanup;
use crate::error::{WorldError, WorldResult};
use crate::gop::GlobalOps;
use crate::id::UniqueId;
use crate::registry::Registry;
use crate::runtime::Runtime;
use crate::taskq::{TaskQueue, TaskQueueState};

/// Placeholder id held until rank 0's choice has been broadcast.
const UNASSIGNED: u64 = u64::MAX;

/// Counters describing what a world has done so far on this process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorldStats {
    pub am_sent: u64,
    pub am_processed: u64,
    /// Received messages waiting for their handler to be registered.
    pub am_parked: usize,
    pub tasks_submitted: u64,
    pub tasks_executed: u64,
    pub fences: u64,
    pub deferred_pending: usize,
    pub deferred_flushed: u64,
    pub registered: usize,
}

/// One process's member of a process group.
///
/// A world is bound to one communicator and to the [`Runtime`] of the process
/// that created it. It is `!Send`: everything it owns is touched only by the
/// thread driving that runtime.
pub struct World {
    runtime: Rc<Runtime>,
    comm: Comm,
    id: Cell<u64>,
    obj_counter: Cell<u64>,
    user_state: RefCell<Option<Rc<dyn Any>>>,
    registry: RefCell<Registry>,
    deferred: DeferredCleanup,
    pub(crate) tasks: TaskQueueState,
    pub(crate) am_state: AmState,
    gop_seq: Cell<u16>,
    fences: Cell<u64>,
}

impl World {
    /// Creates a world over `comm`. Collective over the communicator.
    ///
    /// Rank 0 draws the world id from its runtime's private range and
    /// broadcasts it; the call returns after a barrier, once every member has
    /// the id.
    pub fn new(runtime: &Rc<Runtime>, comm: Comm) -> Rc<World> {
        let world = Rc::new(World {
            runtime: Rc::clone(runtime),
            comm,
            id: Cell::new(UNASSIGNED),
            obj_counter: Cell::new(1),
            user_state: RefCell::new(None),
            registry: RefCell::new(Registry::default()),
            deferred: DeferredCleanup::default(),
            tasks: TaskQueueState::default(),
            am_state: AmState::default(),
            gop_seq: Cell::new(0),
            fences: Cell::new(0),
        });

        let drawn = if world.rank() == 0 {
            match runtime.next_world_id(world.comm.universe_rank()) {
                Some(id) => id,
                None => world.fatal(format_args!(
                    "universe rank {} ran out of world ids",
                    world.comm.universe_rank()
                )),
            }
        } else {
            UNASSIGNED
        };
        let id = world.gop().broadcast(drawn, 0);
        world.id.set(id);
        world.gop().barrier();

        runtime.attach(&world);
        let poll_delay = runtime.calibrate_poll_delay();
        if world.rank() == 0 {
            info!(
                world = id,
                size = world.size(),
                poll_delay_us = poll_delay.as_micros() as u64,
                "world created"
            );
        }
        world
    }

    /// Universe-wide id of this world.
    pub fn id(&self) -> u64 {
        self.id.get()
    }

    /// This process's rank within the world.
    pub fn rank(&self) -> Rank {
        self.comm.rank()
    }

    /// Number of processes in the world.
    pub fn size(&self) -> usize {
        self.comm.size()
    }

    /// Runtime shared by every world of this process.
    pub fn runtime(&self) -> &Rc<Runtime> {
        &self.runtime
    }

    pub(crate) fn comm(&self) -> &Comm {
        &self.comm
    }

    /// Active-message operations.
    pub fn am(&self) -> ActiveMessages<'_> {
        ActiveMessages::new(self)
    }

    /// Local task queue.
    pub fn taskq(&self) -> TaskQueue<'_> {
        TaskQueue::new(self)
    }

    /// Collective operations.
    pub fn gop(&self) -> GlobalOps<'_> {
        GlobalOps::new(self)
    }

    /// Shorthand for [`GlobalOps::fence`].
    pub fn fence(&self) {
        self.gop().fence();
    }

    /// Drives progress in every world of this process until `done` holds.
    pub fn await_until(&self, done: impl FnMut() -> bool) {
        self.runtime.await_until(done);
    }

    /// Logs `reason` and aborts the whole process group.
    pub fn fatal(&self, reason: impl fmt::Display) -> ! {
        let reason = reason.to_string();
        error!(world = self.id(), rank = self.rank(), %reason, "fatal runtime error");
        self.comm.abort(&reason)
    }

    /// Fresh id for an object of this world. Local; never communicates.
    pub fn unique_obj_id(&self) -> UniqueId {
        let obj_id = self.obj_counter.get();
        self.obj_counter.set(obj_id + 1);
        UniqueId::new(self.id(), obj_id)
    }

    /// Allocates an id for `object` and records it in both directions.
    ///
    /// The registry does not keep `object` alive. Registering the same object
    /// twice is fatal.
    pub fn register<T: Any>(&self, object: &Rc<T>) -> UniqueId {
        let id = self.unique_obj_id();
        let inserted = self.registry.borrow_mut().insert(id, object);
        if let Err(existing) = inserted {
            self.fatal(format_args!(
                "object registered twice in world {}: already known as {existing}",
                self.id()
            ));
        }
        id
    }

    /// Removes `object` from the registry. No-op if it was never registered.
    pub fn unregister<T>(&self, object: &Rc<T>) {
        self.registry.borrow_mut().remove_object(object);
    }

    /// Removes the object registered under `id`.
    pub fn unregister_id(&self, id: UniqueId) -> WorldResult<()> {
        self.registry
            .borrow_mut()
            .remove_id(id)
            .map(|_| ())
            .ok_or(WorldError::NotFound(id))
    }

    /// Local object registered under `id`, if any.
    ///
    /// Ids of other worlds never resolve here.
    pub fn lookup_by_id<T: Any>(&self, id: UniqueId) -> Option<Rc<T>> {
        if id.world_id() != self.id() {
            warn!(
                world = self.id(),
                foreign = id.world_id(),
                "lookup with an id from another world"
            );
            return None;
        }
        self.registry.borrow().get(id)
    }

    /// Id of `object`, or [`UniqueId::INVALID`] if it is not registered.
    pub fn lookup_by_ptr<T>(&self, object: &Rc<T>) -> UniqueId {
        self.registry
            .borrow()
            .id_of(object)
            .unwrap_or(UniqueId::INVALID)
    }

    /// Keeps `handle` alive until the next fence.
    pub fn defer<T: Any>(&self, handle: Rc<T>) {
        self.deferred.defer(handle);
    }

    /// Attaches an arbitrary value to this world, replacing any previous one.
    pub fn set_user_state<T: Any>(&self, state: Rc<T>) {
        *self.user_state.borrow_mut() = Some(state);
    }

    /// The value set by [`World::set_user_state`], if it has type `T`.
    pub fn user_state<T: Any>(&self) -> Option<Rc<T>> {
        let state = self.user_state.borrow().clone()?;
        state.downcast::<T>().ok()
    }

    /// Drops the attached user state.
    pub fn clear_user_state(&self) {
        self.user_state.borrow_mut().take();
    }

    /// Serializable reference to this world.
    pub fn world_ref(&self) -> WorldRef {
        WorldRef::new(self.id())
    }

    /// Resolves a reference received from a peer. Fatal if this process is
    /// not a member of the referenced world.
    pub fn resolve_ref(&self, world: WorldRef) -> Rc<World> {
        match self.runtime.find_world(world.world_id) {
            Some(found) => found,
            None => self.fatal(format_args!(
                "world {} is not active on universe rank {}",
                world.world_id,
                self.comm.universe_rank()
            )),
        }
    }

    /// Snapshot of this world's counters.
    pub fn stats(&self) -> WorldStats {
        WorldStats {
            am_sent: self.am_state.sent(),
            am_processed: self.am_state.processed(),
            am_parked: self.am_state.parked(),
            tasks_submitted: self.tasks.submitted(),
            tasks_executed: self.tasks.executed(),
            fences: self.fences.get(),
            deferred_pending: self.deferred.len(),
            deferred_flushed: self.deferred.flushed(),
            registered: self.registry.borrow().len(),
        }
    }

    /// Delivers pending active messages for this world only.
    pub(crate) fn poll(&self) -> usize {
        if let Err(err) = self.comm.check_abort() {
            panic!("{err}");
        }
        self.am().poll(self.runtime.config().max_drain_per_poll)
    }

    pub(crate) fn next_gop_seq(&self) -> u16 {
        let seq = self.gop_seq.get().wrapping_add(1);
        self.gop_seq.set(seq);
        seq
    }

    pub(crate) fn next_obj_counter(&self) -> u64 {
        self.obj_counter.get()
    }

    pub(crate) fn handler_count(&self) -> usize {
        self.am_state.handler_count()
    }

    pub(crate) fn count_fence(&self) -> u64 {
        let fences = self.fences.get() + 1;
        self.fences.set(fences);
        fences
    }

    pub(crate) fn flush_deferred(&self) -> usize {
        self.deferred.flush()
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("id", &self.id())
            .field("rank", &self.rank())
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.runtime.detach();
        let outstanding = self.tasks.outstanding();
        if outstanding > 0 {
            warn!(world = self.id(), outstanding, "world dropped with unexecuted tasks");
        }
        let released = self.deferred.flush();
        if released > 0 {
            debug!(world = self.id(), released, "deferred cleanup flushed on drop");
        }
    }
}
