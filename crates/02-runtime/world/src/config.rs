//! Process-level runtime configuration.

/// Tunables shared by every world created on one [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of timed `poll_all` calls used to measure the polling cost.
    pub poll_calibration_rounds: u32,
    /// Busy-time multiplier applied to the measured cost, as a shift.
    /// `3` keeps polling to roughly one eighth of busy time.
    pub poll_overhead_shift: u32,
    /// Size of each process's private range of world ids.
    pub ids_per_process: u64,
    /// Cross-checks object-id counters at every fence.
    pub check_id_consistency: bool,
    /// Upper bound on active messages handled per world per poll.
    pub max_drain_per_poll: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_calibration_rounds: 32,
            poll_overhead_shift: 3,
            ids_per_process: 10_000,
            check_id_consistency: false,
            max_drain_per_poll: usize::MAX,
        }
    }
}

impl RuntimeConfig {
    pub fn with_poll_calibration_rounds(mut self, rounds: u32) -> Self {
        self.poll_calibration_rounds = rounds;
        self
    }

    pub fn with_poll_overhead_shift(mut self, shift: u32) -> Self {
        self.poll_overhead_shift = shift;
        self
    }

    pub fn with_ids_per_process(mut self, ids: u64) -> Self {
        self.ids_per_process = ids;
        self
    }

    pub fn with_id_consistency_check(mut self, enabled: bool) -> Self {
        self.check_id_consistency = enabled;
        self
    }

    pub fn with_max_drain_per_poll(mut self, max: usize) -> Self {
        self.max_drain_per_poll = max;
        self
    }
}
