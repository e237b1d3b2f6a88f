//! Global operations over a world's process group.
//!
//! Collectives run over a binary tree rooted at the chosen rank. Reductions
//! climb the tree to rank 0 and the result is broadcast back down, so every
//! rank ends up with the same value. Every collective stamps its packets
//! with a per-world sequence number carried in the envelope flags; a packet
//! from a different collective means the ranks disagree on the call order,
//! which is fatal.
//!
//! While waiting for a peer the caller keeps polling, so active messages and
//! ready tasks in every world still make progress.

use std::ops::Add;

use smallvec::SmallVec;
use tracing::debug;
use transport::{Envelope, Rank};
use transport_codecs::{ensure_tag, Wire, SCHEMA_VERSION_V1, TAG_GOP_BCAST, TAG_GOP_REDUCE};

use crate::world::World;

/// Position of one rank in a collective tree.
#[derive(Debug, PartialEq, Eq)]
struct Tree {
    parent: Option<Rank>,
    children: SmallVec<[Rank; 2]>,
}

impl Tree {
    fn new(rank: Rank, size: usize, root: Rank) -> Self {
        let rel = (rank + size - root) % size;
        let parent = (rel != 0).then(|| ((rel - 1) / 2 + root) % size);
        let children = [2 * rel + 1, 2 * rel + 2]
            .into_iter()
            .filter(|child| *child < size)
            .map(|child| (child + root) % size)
            .collect();
        Self { parent, children }
    }
}

/// Collective-operation view of a [`World`].
///
/// Every rank of the world must call the same collectives in the same order.
pub struct GlobalOps<'w> {
    world: &'w World,
}

impl<'w> GlobalOps<'w> {
    pub(crate) fn new(world: &'w World) -> Self {
        Self { world }
    }

    /// Waits until the whole group is quiescent.
    ///
    /// On return every active message sent anywhere before the call has been
    /// processed, every task submitted before the call has executed, and this
    /// process's deferred cleanup has been flushed.
    pub fn fence(&self) {
        let world = self.world;
        let runtime = world.runtime();
        let mut previous = None;
        let mut rounds = 0u32;
        loop {
            // A lone rank never waits inside the reduction, so poll here.
            runtime.poll_all(false);
            runtime.await_until(|| world.taskq().is_idle());
            let stats = world.stats();
            let parked = stats.am_parked as u64;
            // Parked frames arrived but have not run; they balance `sent` and
            // are tracked separately.
            let local = [
                stats.am_sent,
                stats.am_processed + parked,
                stats.tasks_submitted,
                stats.tasks_executed,
                parked,
            ];
            let global = self.reduce(local, |a, b| std::array::from_fn(|i| a[i] + b[i]));
            rounds += 1;
            let balanced = global[0] == global[1] && global[2] == global[3];
            // Two identical balanced rounds: nothing ran in between.
            if balanced && previous == Some(global) {
                if global[4] > 0 {
                    world.fatal(format_args!(
                        "{} active messages wait for handlers that were never registered (lowest slot here: {:?})",
                        global[4],
                        world.am_state.lowest_parked_slot()
                    ));
                }
                break;
            }
            previous = Some(global);
        }

        if world.runtime().config().check_id_consistency {
            self.check_id_order();
        }
        let fences = world.count_fence();
        let released = world.flush_deferred();
        debug!(world = world.id(), fences, rounds, released, "fence complete");
    }

    /// Collective with no payload; returns once every rank entered it.
    pub fn barrier(&self) {
        self.reduce(0u8, |a, _| a);
    }

    /// Returns `root`'s `value` on every rank. Non-root inputs are ignored.
    pub fn broadcast<T: Wire>(&self, value: T, root: Rank) -> T {
        if root >= self.world.size() {
            self.world.fatal(format_args!(
                "broadcast root {root} outside a world of {} processes",
                self.world.size()
            ));
        }
        let seq = self.world.next_gop_seq();
        self.broadcast_with(seq, value, root)
    }

    /// Combines every rank's `value` with `op` and returns the result on all
    /// ranks.
    ///
    /// `op` must be associative and commutative; the combination order
    /// follows the tree, not rank order.
    pub fn reduce<T, F>(&self, value: T, op: F) -> T
    where
        T: Wire,
        F: Fn(T, T) -> T,
    {
        let seq = self.world.next_gop_seq();
        let tree = Tree::new(self.world.rank(), self.world.size(), 0);
        let mut acc = value;
        for child in &tree.children {
            let bytes = self.recv_raw(*child, TAG_GOP_REDUCE, seq);
            acc = op(acc, self.decode(&bytes));
        }
        if let Some(parent) = tree.parent {
            let bytes = self.encode(&acc);
            self.send_raw(parent, TAG_GOP_REDUCE, seq, bytes);
        }
        self.broadcast_with(seq, acc, 0)
    }

    pub fn sum<T: Wire + Add<Output = T>>(&self, value: T) -> T {
        self.reduce(value, |a, b| a + b)
    }

    pub fn max<T: Wire + PartialOrd>(&self, value: T) -> T {
        self.reduce(value, |a, b| if b > a { b } else { a })
    }

    pub fn min<T: Wire + PartialOrd>(&self, value: T) -> T {
        self.reduce(value, |a, b| if b < a { b } else { a })
    }

    /// Aborts unless every rank has allocated the same number of object ids
    /// and registered the same active-message handlers.
    pub fn check_id_order(&self) {
        let world = self.world;
        let local = [world.next_obj_counter(), world.handler_count() as u64];
        let high = self.reduce(local, |a, b| [a[0].max(b[0]), a[1].max(b[1])]);
        let low = self.reduce(local, |a, b| [a[0].min(b[0]), a[1].min(b[1])]);
        if high[0] != low[0] {
            world.fatal(format_args!(
                "object id allocation diverged: counters range from {} to {} (local {})",
                low[0], high[0], local[0]
            ));
        }
        if high[1] != low[1] {
            world.fatal(format_args!(
                "handler tables diverged: {} to {} handlers (local {})",
                low[1], high[1], local[1]
            ));
        }
    }

    fn broadcast_with<T: Wire>(&self, seq: u16, value: T, root: Rank) -> T {
        let tree = Tree::new(self.world.rank(), self.world.size(), root);
        let (value, bytes) = match tree.parent {
            Some(parent) => {
                let bytes = self.recv_raw(parent, TAG_GOP_BCAST, seq);
                (self.decode(&bytes), bytes)
            }
            None if tree.children.is_empty() => return value,
            None => {
                let bytes = self.encode(&value);
                (value, bytes)
            }
        };
        for child in &tree.children {
            self.send_raw(*child, TAG_GOP_BCAST, seq, bytes.clone());
        }
        value
    }

    fn encode<T: Wire>(&self, value: &T) -> Vec<u8> {
        match value.to_wire() {
            Ok(bytes) => bytes,
            Err(err) => self
                .world
                .fatal(format_args!("cannot encode collective operand: {err}")),
        }
    }

    fn decode<T: Wire>(&self, bytes: &[u8]) -> T {
        match T::from_wire(bytes) {
            Ok(value) => value,
            Err(err) => self
                .world
                .fatal(format_args!("corrupt collective operand: {err}")),
        }
    }

    fn send_raw(&self, dest: Rank, tag: u8, seq: u16, payload: Vec<u8>) {
        let envelope = Envelope::new(tag, SCHEMA_VERSION_V1).with_flags(seq);
        if let Err(err) = self.world.comm().isend(dest, envelope, payload) {
            self.world
                .fatal(format_args!("collective send to rank {dest} failed: {err}"));
        }
    }

    fn recv_raw(&self, source: Rank, tag: u8, seq: u16) -> Vec<u8> {
        let comm = self.world.comm();
        let mut received = None;
        self.world.runtime().await_until(|| {
            // The world may not be attached yet, so nothing else checks.
            if let Err(err) = comm.check_abort() {
                panic!("{err}");
            }
            if received.is_none() {
                received = comm.try_recv(Some(source), tag);
            }
            received.is_some()
        });
        let Some(packet) = received else {
            self.world
                .fatal(format_args!("collective from rank {source} never arrived"));
        };
        if let Err(err) = ensure_tag(packet.envelope, tag) {
            self.world
                .fatal(format_args!("bad collective packet from rank {source}: {err}"));
        }
        if packet.envelope.flags != seq {
            self.world.fatal(format_args!(
                "collective mismatch: rank {source} is in collective #{} while this rank is in #{seq}",
                packet.envelope.flags
            ));
        }
        packet.payload
    }
}
