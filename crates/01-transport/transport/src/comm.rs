//! In-process communicators.
//!
//! A [`Universe`] is a fixed set of processes (threads in this address space).
//! Any subset of them can be bound into a communicator; each member receives
//! one [`Comm`] endpoint. Every endpoint owns a single inbox fed by all peers,
//! so packets from one sender arrive in the order they were sent. Receives
//! match on `(source, tag)`; packets that do not match the current request are
//! parked in an unexpected queue until someone asks for them.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::{Envelope, TransportError, TransportResult};

/// Process index, either within a communicator or within the universe.
pub type Rank = usize;

#[derive(Default)]
struct AbortState {
    flag: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl AbortState {
    fn raise(&self, reason: &str) {
        let mut slot = self.reason.lock();
        if slot.is_none() {
            *slot = Some(reason.to_owned());
        }
        self.flag.store(true, Ordering::Release);
    }

    fn check(&self) -> TransportResult<()> {
        if self.flag.load(Ordering::Acquire) {
            let reason = self
                .reason
                .lock()
                .clone()
                .unwrap_or_else(|| "unknown".to_owned());
            return Err(TransportError::Aborted { reason });
        }
        Ok(())
    }
}

/// Fixed group of cooperating processes sharing one abort domain.
#[derive(Clone)]
pub struct Universe {
    size: usize,
    abort: Arc<AbortState>,
}

impl Universe {
    /// Creates a universe of `size` processes.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "universe must contain at least one process");
        Self {
            size,
            abort: Arc::new(AbortState::default()),
        }
    }

    /// Number of processes in the universe.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Builds a communicator spanning every process, in universe rank order.
    pub fn world_communicator(&self) -> Vec<Comm> {
        let members: Vec<Rank> = (0..self.size).collect();
        self.build(&members)
    }

    /// Builds a communicator over `members` (universe ranks).
    ///
    /// The returned endpoints are ordered like `members`; endpoint `i` has
    /// communicator rank `i`.
    pub fn communicator(&self, members: &[Rank]) -> TransportResult<Vec<Comm>> {
        for &rank in members {
            if rank >= self.size {
                return Err(TransportError::InvalidRank {
                    rank,
                    size: self.size,
                });
            }
        }
        let mut sorted = members.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(
            sorted.len(),
            members.len(),
            "communicator members must be distinct"
        );
        assert!(!members.is_empty(), "communicator must not be empty");
        Ok(self.build(members))
    }

    /// True once any process aborted the group.
    pub fn is_aborted(&self) -> bool {
        self.abort.check().is_err()
    }

    /// Marks the universe aborted without unwinding the caller.
    pub fn raise_abort(&self, reason: &str) {
        self.abort.raise(reason);
    }

    /// Reason recorded by the first abort, if any.
    pub fn abort_reason(&self) -> Option<String> {
        self.abort.reason.lock().clone()
    }

    fn build(&self, members: &[Rank]) -> Vec<Comm> {
        let (senders, receivers): (Vec<Sender<Packet>>, Vec<Receiver<Packet>>) =
            members.iter().map(|_| unbounded()).unzip();
        let peers: Arc<[Sender<Packet>]> = senders.into();
        let universe_ranks: Arc<[Rank]> = members.to_vec().into();

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| Comm {
                rank,
                size: members.len(),
                universe_ranks: Arc::clone(&universe_ranks),
                peers: Arc::clone(&peers),
                inbox,
                unexpected: RefCell::new(VecDeque::new()),
                abort: Arc::clone(&self.abort),
            })
            .collect()
    }
}

/// A received message.
#[derive(Debug)]
pub struct Packet {
    /// Communicator rank of the sender.
    pub source: Rank,
    /// Envelope supplied by the sender.
    pub envelope: Envelope,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    receipt: Arc<AtomicBool>,
}

/// Handle to an outstanding send; completes once the receiver matched it.
#[derive(Clone, Debug)]
pub struct SendRequest {
    receipt: Arc<AtomicBool>,
}

impl SendRequest {
    /// Non-blocking completion test.
    pub fn test(&self) -> bool {
        self.receipt.load(Ordering::Acquire)
    }
}

/// One process's endpoint in a communicator.
pub struct Comm {
    rank: Rank,
    size: usize,
    universe_ranks: Arc<[Rank]>,
    peers: Arc<[Sender<Packet>]>,
    inbox: Receiver<Packet>,
    unexpected: RefCell<VecDeque<Packet>>,
    abort: Arc<AbortState>,
}

impl Comm {
    /// Rank of this process within the communicator.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Number of processes in the communicator.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Rank of this process within the universe.
    pub fn universe_rank(&self) -> Rank {
        self.universe_ranks[self.rank]
    }

    /// Universe rank of communicator rank `rank`.
    pub fn universe_rank_of(&self, rank: Rank) -> Option<Rank> {
        self.universe_ranks.get(rank).copied()
    }

    /// Queues `payload` for `dest` without blocking.
    pub fn isend(
        &self,
        dest: Rank,
        envelope: Envelope,
        payload: Vec<u8>,
    ) -> TransportResult<SendRequest> {
        self.abort.check()?;
        let peer = self.peers.get(dest).ok_or(TransportError::InvalidRank {
            rank: dest,
            size: self.size,
        })?;
        let receipt = Arc::new(AtomicBool::new(false));
        let packet = Packet {
            source: self.rank,
            envelope,
            payload,
            receipt: Arc::clone(&receipt),
        };
        peer.send(packet)
            .map_err(|_| TransportError::Disconnected { rank: dest })?;
        Ok(SendRequest { receipt })
    }

    /// Returns the oldest packet carrying `tag` (and from `source`, if given).
    pub fn try_recv(&self, source: Option<Rank>, tag: u8) -> Option<Packet> {
        let mut queue = self.unexpected.borrow_mut();
        queue.extend(self.inbox.try_iter());
        let pos = queue.iter().position(|packet| {
            packet.envelope.tag == tag && source.map_or(true, |src| src == packet.source)
        })?;
        let packet = queue.remove(pos)?;
        packet.receipt.store(true, Ordering::Release);
        Some(packet)
    }

    /// Number of packets received but not yet matched.
    pub fn backlog(&self) -> usize {
        let mut queue = self.unexpected.borrow_mut();
        queue.extend(self.inbox.try_iter());
        queue.len()
    }

    /// Fails once any process in the universe aborted.
    pub fn check_abort(&self) -> TransportResult<()> {
        self.abort.check()
    }

    /// Aborts every process in the universe.
    ///
    /// Records `reason` (first abort wins) and unwinds the calling thread.
    /// Peers observe the abort on their next [`Comm::check_abort`].
    pub fn abort(&self, reason: &str) -> ! {
        self.abort.raise(reason);
        panic!("process group aborted: {reason}");
    }
}
