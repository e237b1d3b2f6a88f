//! Per-process progress engine.
//!
//! A [`Runtime`] is the state every world of one process shares: the list of
//! active worlds, the private range of world ids, and the polling throttle.
//! Nothing here is global; each process (or test) builds its own.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use transport::{Rank, SendRequest};

use crate::config::RuntimeConfig;
use crate::error::{WorldError, WorldResult};
use crate::world::World;

/// Progress state shared by every world of one process.
pub struct Runtime {
    config: RuntimeConfig,
    worlds: RefCell<Vec<Weak<World>>>,
    id_range: Cell<Option<(u64, u64)>>,
    poll_delay: Cell<Option<Duration>>,
    last_poll: Cell<Option<Instant>>,
}

impl Runtime {
    /// Runtime with no worlds and an uncalibrated poll throttle.
    pub fn new(config: RuntimeConfig) -> Rc<Self> {
        Rc::new(Self {
            config,
            worlds: RefCell::new(Vec::new()),
            id_range: Cell::new(None),
            poll_delay: Cell::new(None),
            last_poll: Cell::new(None),
        })
    }

    /// Settings every world of this process shares.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Snapshot of the worlds currently alive in this process.
    pub fn worlds(&self) -> Vec<Rc<World>> {
        self.worlds
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Active world with id `world_id`, if this process is a member.
    pub fn find_world(&self, world_id: u64) -> Option<Rc<World>> {
        self.worlds().into_iter().find(|world| world.id() == world_id)
    }

    /// Like [`Runtime::find_world`], but an error names the missing id.
    pub fn world_from_id(&self, world_id: u64) -> WorldResult<Rc<World>> {
        self.find_world(world_id)
            .ok_or(WorldError::UnknownWorld(world_id))
    }

    /// Current throttle applied by [`Runtime::poll_all`] while working. Zero
    /// until calibrated.
    pub fn poll_delay(&self) -> Duration {
        self.poll_delay.get().unwrap_or(Duration::ZERO)
    }

    /// Delivers pending active messages in every world.
    ///
    /// When `working` is set and the previous poll was less than
    /// [`Runtime::poll_delay`] ago this returns without polling. Returns the
    /// number of messages handled.
    pub fn poll_all(&self, working: bool) -> usize {
        if working {
            if let Some(last) = self.last_poll.get() {
                if last.elapsed() < self.poll_delay() {
                    return 0;
                }
            }
        }
        self.last_poll.set(Some(Instant::now()));
        self.worlds().iter().map(|world| world.poll()).sum()
    }

    /// Runs at most one ready task in each world. True if any ran.
    pub fn run_tasks(&self) -> bool {
        let mut ran = false;
        for world in self.worlds() {
            ran |= world.taskq().run_next_ready_task();
        }
        ran
    }

    /// Polls and runs tasks until `done` returns true.
    ///
    /// Every world gets a turn on every iteration, so waiting in one world
    /// never starves another.
    pub fn await_until(&self, mut done: impl FnMut() -> bool) {
        let mut working = false;
        while !done() {
            let handled = self.poll_all(working);
            working = self.run_tasks();
            if handled == 0 && !working {
                thread::yield_now();
            }
        }
    }

    /// Waits for a transport request to complete while driving progress.
    pub fn await_request(&self, request: &SendRequest) {
        self.await_until(|| request.test());
    }

    /// Times `poll_calibration_rounds` polls and derives the busy-time
    /// throttle from their average cost.
    ///
    /// Only the first call measures; later calls return the stored delay.
    pub fn calibrate_poll_delay(&self) -> Duration {
        if let Some(delay) = self.poll_delay.get() {
            return delay;
        }
        let rounds = self.config.poll_calibration_rounds.max(1);
        let start = Instant::now();
        for _ in 0..rounds {
            self.poll_all(false);
        }
        let per_poll = start.elapsed() / rounds;
        let factor = 1u32
            .checked_shl(self.config.poll_overhead_shift)
            .unwrap_or(u32::MAX);
        let delay = per_poll.saturating_mul(factor);
        self.poll_delay.set(Some(delay));
        delay
    }

    /// Draws the next world id from this process's private range.
    ///
    /// The range starts at `universe_rank * ids_per_process` and is fixed on
    /// first use. `None` once it is used up.
    pub(crate) fn next_world_id(&self, universe_rank: Rank) -> Option<u64> {
        let (next, end) = match self.id_range.get() {
            Some(range) => range,
            None => {
                let span = self.config.ids_per_process;
                let base = (universe_rank as u64).checked_mul(span)?;
                (base, base.checked_add(span)?)
            }
        };
        if next >= end {
            return None;
        }
        self.id_range.set(Some((next + 1, end)));
        Some(next)
    }

    pub(crate) fn attach(&self, world: &Rc<World>) {
        self.worlds.borrow_mut().push(Rc::downgrade(world));
    }

    /// Forgets worlds that have been dropped.
    pub(crate) fn detach(&self) {
        if let Ok(mut worlds) = self.worlds.try_borrow_mut() {
            worlds.retain(|world| world.strong_count() > 0);
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("worlds", &self.worlds.borrow().len())
            .field("poll_delay", &self.poll_delay())
            .finish()
    }
}
