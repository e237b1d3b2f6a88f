#![deny(missing_docs)]
//! Thread-per-rank harness for running world programs in one address space.
//!
//! Each rank gets its own OS thread, its own [`Runtime`] and one communicator
//! endpoint per configured group. A panic on any rank aborts the universe, so
//! the remaining ranks unwind at their next poll instead of waiting forever on
//! a peer that is gone.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};
use transport::{Comm, Rank, Universe};
use world::{Runtime, RuntimeConfig, World};

/// Installs a `tracing` subscriber honouring `RUST_LOG`.
///
/// Safe to call repeatedly; only the first call has an effect.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    // Ignore error if already set (e.g., by another test).
    let _ = fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .try_init();
}

/// A fixed set of ranks plus the communicator groups laid over them.
#[derive(Debug, Clone)]
pub struct NativeCluster {
    size: usize,
    config: RuntimeConfig,
    groups: Vec<Vec<Rank>>,
}

impl NativeCluster {
    /// Cluster of `size` ranks. Group 0 spans all of them in rank order.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            config: RuntimeConfig::default(),
            groups: vec![(0..size).collect()],
        }
    }

    /// Runtime configuration applied on every rank.
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a communicator over `members` (universe ranks, in communicator
    /// rank order) and returns its group index.
    pub fn add_group(&mut self, members: &[Rank]) -> usize {
        self.groups.push(members.to_vec());
        self.groups.len() - 1
    }

    /// Number of ranks.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `program` once per rank, each on its own thread, and returns the
    /// per-rank results in rank order.
    ///
    /// Fails if any rank panicked; the error carries the first abort reason.
    pub fn run<R, F>(&self, program: F) -> Result<Vec<R>>
    where
        R: Send,
        F: Fn(ProcessContext) -> R + Sync,
    {
        init_tracing();
        let universe = Universe::new(self.size);
        let endpoints = self.endpoints(&universe)?;

        let outcomes = thread::scope(|scope| -> Result<Vec<thread::Result<R>>> {
            let mut handles = Vec::with_capacity(self.size);
            for (rank, comms) in endpoints.into_iter().enumerate() {
                let rank_universe = universe.clone();
                let config = self.config.clone();
                let program = &program;
                let spawned = thread::Builder::new()
                    .name(format!("rank-{rank}"))
                    .spawn_scoped(scope, move || {
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                            program(ProcessContext {
                                rank,
                                runtime: Runtime::new(config),
                                comms,
                            })
                        }));
                        if let Err(payload) = &outcome {
                            rank_universe.raise_abort(&format!(
                                "rank {rank} panicked: {}",
                                panic_message(&**payload)
                            ));
                        }
                        outcome
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(err) => {
                        universe.raise_abort("harness could not spawn every rank");
                        return Err(err).with_context(|| format!("spawning rank {rank}"));
                    }
                }
            }
            Ok(handles
                .into_iter()
                .map(|handle| handle.join().and_then(|outcome| outcome))
                .collect())
        })?;

        let mut results = Vec::with_capacity(self.size);
        for (rank, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(value) => results.push(value),
                Err(payload) => {
                    let reason = universe
                        .abort_reason()
                        .unwrap_or_else(|| panic_message(&*payload));
                    return Err(anyhow!("process group aborted: {reason}"))
                        .with_context(|| format!("rank {rank} did not finish"));
                }
            }
        }
        debug!(ranks = self.size, groups = self.groups.len(), "cluster run complete");
        Ok(results)
    }

    fn endpoints(&self, universe: &Universe) -> Result<Vec<Vec<Option<Comm>>>> {
        let mut endpoints: Vec<Vec<Option<Comm>>> = (0..self.size)
            .map(|_| (0..self.groups.len()).map(|_| None).collect())
            .collect();
        for (group, members) in self.groups.iter().enumerate() {
            let comms = universe
                .communicator(members)
                .with_context(|| format!("building communicator group {group}"))?;
            for (member, comm) in members.iter().zip(comms) {
                endpoints[*member][group] = Some(comm);
            }
        }
        Ok(endpoints)
    }
}

/// What one rank sees while running inside a [`NativeCluster`].
pub struct ProcessContext {
    rank: Rank,
    runtime: Rc<Runtime>,
    comms: Vec<Option<Comm>>,
}

impl ProcessContext {
    /// Universe rank of this process.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// This process's runtime.
    pub fn runtime(&self) -> &Rc<Runtime> {
        &self.runtime
    }

    /// Takes this rank's endpoint for `group`; `None` if the rank is not a
    /// member or the endpoint was already taken.
    pub fn take_comm(&mut self, group: usize) -> Option<Comm> {
        self.comms.get_mut(group)?.take()
    }

    /// Builds a world over `group`. Collective over the group's members.
    pub fn join(&mut self, group: usize) -> Option<Rc<World>> {
        let comm = self.take_comm(group)?;
        Some(World::new(&self.runtime, comm))
    }

    /// Builds the world spanning every rank (group 0).
    pub fn world(&mut self) -> Rc<World> {
        self.join(0).expect("group 0 endpoint already taken")
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
