//! Invariant checks and utilization reports for `kernemu` runs.
pub use kernemu::*;
use serde::Serialize;

/// Something that must never be observed in a running system.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    #[error("Regions leave a gap or overlap at {at}")]
    Gap { at: Bytes },
    #[error("Regions cover {covered} bytes, memory has {total}")]
    Coverage { covered: Bytes, total: Bytes },
    #[error("Free chunks at {left} and {right} were not merged")]
    Uncoalesced { left: Bytes, right: Bytes },
    #[error("Used ({used}) plus free ({free}) is not total ({total})")]
    Accounting { used: Bytes, free: Bytes, total: Bytes },
    #[error("Region at {at} is in use but has no owner")]
    Unowned { at: Bytes },
    #[error("Region at {at} is free but has an owner")]
    OwnedFree { at: Bytes },
    #[error("Process {name} is at instruction {current} of {total}")]
    Overrun { name: String, current: u64, total: u64 },
    #[error("Process {name} has completion state {completed} at {current}/{total}")]
    Completion { name: String, completed: bool, current: u64, total: u64 },
    #[error("Process {name} holds core {core} after finishing")]
    Lingering { name: String, core: usize },
}

/// Checks that the regions tile memory exactly, that ownership matches
/// occupancy, that the books balance and, for flat memory, that no two
/// free chunks touch.
pub fn check_memory(stats: &MemoryStats) -> Result<(), Violation> {
    let mut cursor = 0;
    for r in &stats.regions {
        if r.start != cursor {
            return Err(Violation::Gap { at: cursor });
        }
        match (r.in_use, r.owner) {
            (true, None)        => { return Err(Violation::Unowned { at: r.start }); },
            (false, Some(_))    => { return Err(Violation::OwnedFree { at: r.start }); },
            _                   => {}
        }
        cursor = r.end();
    }
    if cursor != stats.total {
        return Err(Violation::Coverage { covered: cursor, total: stats.total });
    }
    if stats.used + stats.free != stats.total {
        return Err(Violation::Accounting {
            used:   stats.used,
            free:   stats.free,
            total:  stats.total,
        });
    }
    let used: Bytes = stats.regions.iter().filter(|r| r.in_use).map(|r| r.size).sum();
    if used != stats.used {
        return Err(Violation::Accounting {
            used,
            free:   stats.free,
            total:  stats.total,
        });
    }
    if !stats.policy.is_paged() {
        for (a, b) in stats.regions.iter().tuple_windows() {
            if !a.in_use && !b.in_use {
                return Err(Violation::Uncoalesced { left: a.start, right: b.start });
            }
        }
    }

    Ok(())
}

/// Checks run state of a single process.
pub fn check_process(s: &ProcessSnapshot) -> Result<(), Violation> {
    if s.current > s.total {
        return Err(Violation::Overrun {
            name:       s.name.clone(),
            current:    s.current,
            total:      s.total,
        });
    }
    if s.completed != (s.current == s.total) {
        return Err(Violation::Completion {
            name:       s.name.clone(),
            completed:  s.completed,
            current:    s.current,
            total:      s.total,
        });
    }
    if let (Some(_), Some(core)) = (s.finished_at, s.core) {
        return Err(Violation::Lingering { name: s.name.clone(), core });
    }

    Ok(())
}

/// What a run looked like, in the spirit of `report-util`.
#[derive(Clone, Debug, Serialize)]
pub struct UtilReport {
    pub ticks:                  Tick,
    pub policy:                 Policy,
    pub processes:              usize,
    pub finished:               usize,
    /// Share of core ticks spent busy.
    pub cpu_utilization:        f64,
    pub peak_used:              Bytes,
    pub total_memory:           Bytes,
    pub peak_external_frag:     Bytes,
    pub peak_internal_frag:     Bytes,
    pub pages_in:               u64,
    pub pages_out:              u64,
    /// Mean admission-to-reclaim latency of finished processes.
    pub mean_turnaround:        f64,
    pub samples:                u64,
}

/// Watches a system tick after tick, checking invariants and keeping
/// track of peaks.
#[derive(Default)]
pub struct Monitor {
    peak_used:      Bytes,
    peak_ext:       Bytes,
    peak_int:       Bytes,
    samples:        u64,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, sys: &System) -> Result<(), Violation> {
        let stats = sys.memory_stats();
        check_memory(&stats)?;
        for p in sys.registry().all() {
            check_process(&p.snapshot())?;
        }
        self.peak_used = self.peak_used.max(stats.used);
        self.peak_ext = self.peak_ext.max(stats.external_fragmentation);
        self.peak_int = self.peak_int.max(stats.internal_fragmentation);
        self.samples += 1;

        Ok(())
    }

    pub fn report(&self, sys: &System) -> UtilReport {
        let listing = sys.processes();
        let vm = sys.vmstat();
        let stats = sys.memory_stats();
        let turnarounds = listing.finished
            .iter()
            .filter_map(|s| s.finished_at.map(|f| f.saturating_sub(s.created_at)))
            .collect::<Vec<_>>();
        let mean_turnaround = if turnarounds.is_empty() { 0.0 } else {
            turnarounds.iter().sum::<Tick>() as f64 / turnarounds.len() as f64
        };
        let cpu_utilization = if vm.total_ticks == 0 { 0.0 } else {
            vm.active_ticks as f64 / vm.total_ticks as f64 * 100.0
        };

        UtilReport {
            ticks:              sys.current_tick(),
            policy:             stats.policy,
            processes:          listing.running.len() + listing.waiting.len() + listing.finished.len(),
            finished:           listing.finished.len(),
            cpu_utilization,
            peak_used:          self.peak_used,
            total_memory:       stats.total,
            peak_external_frag: self.peak_ext,
            peak_internal_frag: self.peak_int,
            pages_in:           vm.pages_in,
            pages_out:          vm.pages_out,
            mean_turnaround,
            samples:            self.samples,
        }
    }
}
