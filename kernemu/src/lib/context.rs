use crate::utils::*;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Default wrap-around bound of the tick counter.
pub const DEFAULT_CLOCK_MODULUS: Tick = i64::MAX as Tick;

/// Everything a simulation run would otherwise keep in globals: the
/// process id counter, where evicted footprints go, the clock's wrap
/// bound and the random source. Built once, shared by reference.
pub struct SimContext {
    pub backing_dir:    PathBuf,
    pub clock_modulus:  Tick,
    /// Pause between ticks of the free-running clock.
    pub pace:           Option<Duration>,
    pub seed:           u64,
    next_pid:           AtomicU32,
    rng:                Mutex<StdRng>,
}

impl SimContext {
    pub fn new(backing_dir: &Path, seed: u64) -> Self {
        Self {
            backing_dir:    backing_dir.to_path_buf(),
            clock_modulus:  DEFAULT_CLOCK_MODULUS,
            pace:           None,
            seed,
            next_pid:       AtomicU32::new(0),
            rng:            Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn with_clock_modulus(mut self, modulus: Tick) -> Self {
        self.clock_modulus = modulus;
        self
    }

    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    /// Hands out the next process id. Ids are never reused.
    pub fn next_pid(&self) -> Pid {
        self.next_pid.fetch_add(1, Ordering::AcqRel)
    }

    /// Uniform draw from `[lo, hi]`.
    pub fn draw(&self, lo: u64, hi: u64) -> u64 {
        if lo >= hi {
            return lo;
        }
        lock(&self.rng).gen_range(lo..=hi)
    }

    /// A power of two drawn uniformly by exponent from `[lo, hi]`.
    /// Both bounds must be powers of two.
    pub fn draw_pow2(&self, lo: u64, hi: u64) -> u64 {
        let (lo_exp, hi_exp) = (lo.trailing_zeros() as u64, hi.trailing_zeros() as u64);
        1 << self.draw(lo_exp, hi_exp)
    }
}
