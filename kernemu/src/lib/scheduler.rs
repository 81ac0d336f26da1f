use crate::utils::*;
use crate::clock::{GlobalClock, Stage, Ticket};
use crate::cpu::Core;
use crate::memory::MemoryManager;
use crate::process::Process;
use crate::queue::ReadyQueue;
use serde::Serialize;

/// Dispatch discipline.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Algorithm {
    /// Run to completion. A head-of-queue process that cannot get
    /// memory blocks everyone behind it.
    Fcfs,
    /// Preempt after `quantum` ticks on a core. A head-of-queue process
    /// that cannot get memory is rotated to the back.
    RoundRobin { quantum: u64 },
}

impl Algorithm {
    pub fn quantum(&self) -> u64 {
        match self {
            Algorithm::Fcfs                     => { 0 },
            Algorithm::RoundRobin { quantum }   => { *quantum }
        }
    }
}

/// What a single pass did. Mostly for logs and tests.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    pub completed:  usize,
    pub preempted:  usize,
    pub dispatched: usize,
    pub evicted:    usize,
    pub blocked:    bool,
}

/// Matches ready processes with idle cores and with memory.
pub struct Scheduler {
    algo:       Algorithm,
    cores:      Vec<Arc<Core>>,
    queue:      Arc<ReadyQueue>,
    memory:     Arc<MemoryManager>,
    // Reserve and allocate happen as one step per process.
    reserving:  Mutex<()>,
    ticket:     Mutex<Option<Ticket>>,
    thread:     Mutex<Option<JoinHandle<()>>>,
    dispatches: AtomicU64,
}

impl Scheduler {
    pub fn new(
        algo:   Algorithm,
        cores:  Vec<Arc<Core>>,
        queue:  Arc<ReadyQueue>,
        memory: Arc<MemoryManager>,
    ) -> Self {
        Self {
            algo,
            cores,
            queue,
            memory,
            reserving:  Mutex::new(()),
            ticket:     Mutex::new(None),
            thread:     Mutex::new(None),
            dispatches: AtomicU64::new(0),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algo
    }

    pub fn queue(&self) -> &Arc<ReadyQueue> {
        &self.queue
    }

    pub fn dispatches(&self) -> u64 {
        self.dispatches.load(Ordering::Relaxed)
    }

    /// Joins the clock's Schedule stage on a thread of its own.
    pub fn start(self: &Arc<Self>, clock: &Arc<GlobalClock>) {
        let mut slot = lock(&self.thread);
        if slot.is_some() {
            return;
        }
        let ticket = clock.enroll(Stage::Schedule);
        *lock(&self.ticket) = Some(ticket);
        let (sched, clock) = (self.clone(), clock.clone());
        *slot = Some(thread::spawn(move || {
            while let Some(tick) = clock.await_turn(&ticket) {
                sched.pass(tick);
                clock.arrive(&ticket);
            }
            trace!("Scheduler thread out");
        }));
        info!("Scheduler running ({:?})", self.algo);
    }

    pub fn stop(&self, clock: &GlobalClock) {
        if let Some(t) = lock(&self.ticket).take() {
            clock.withdraw(&t);
        }
        let handle = lock(&self.thread).take();
        if let Some(h) = handle {
            if h.join().is_err() {
                warn!("Scheduler thread panicked");
            }
        }
    }

    /// One Schedule turn: first collect what the cores are done with,
    /// then hand out work.
    pub fn pass(&self, tick: Tick) -> PassReport {
        let mut report = self.reclaim(tick);
        let dispatched = self.dispatch();
        report.dispatched = dispatched.dispatched;
        report.evicted = dispatched.evicted;
        report.blocked = dispatched.blocked;
        if report != PassReport::default() {
            trace!("Tick {tick}: {report:?}");
        }

        report
    }

    /// Detaches completed processes (freeing their memory) and preempted
    /// ones (requeueing them, memory kept).
    pub fn reclaim(&self, tick: Tick) -> PassReport {
        let mut report = PassReport::default();
        for core in &self.cores {
            if !core.process_completed() {
                continue;
            }
            if let Some(p) = core.finish() {
                let freed = self.memory.release(&p);
                p.stamp_finished(tick);
                report.completed += 1;
                info!("{} finished on core {} at tick {tick}, {freed} bytes back", p.name, core.id);
            }
        }
        for core in &self.cores {
            if !core.should_preempt() {
                continue;
            }
            if let Some(p) = core.preempt() {
                debug!("{} preempted from core {} at {}/{}", p.name, core.id, p.current_instruction(), p.total_instructions);
                self.queue.push(p);
                report.preempted += 1;
            }
        }

        report
    }

    /// Fills idle cores from the head of the ready queue.
    pub fn dispatch(&self) -> PassReport {
        let mut report = PassReport::default();
        'cores: for core in self.cores.iter().filter(|c| c.is_idle()) {
            let mut tries = self.queue.len();
            loop {
                let head = match self.queue.peek() {
                    Some(h) => { h },
                    None    => { break 'cores; }
                };
                match self.make_resident(&head) {
                    Ok(evicted) => {
                        report.evicted += evicted;
                        if core.assign(head.clone()).is_ok() {
                            self.queue.pop_if(&head);
                            self.dispatches.fetch_add(1, Ordering::Relaxed);
                            report.dispatched += 1;
                            debug!("{} -> core {}", head.name, core.id);
                        }
                        continue 'cores;
                    },
                    Err(e)      => {
                        trace!("{} cannot be placed: {e}", head.name);
                        report.blocked = true;
                        match self.algo {
                            Algorithm::Fcfs                 => { break 'cores; },
                            Algorithm::RoundRobin { .. }    => {
                                tries = tries.saturating_sub(1);
                                if tries == 0 {
                                    break 'cores;
                                }
                                self.queue.rotate();
                            }
                        }
                    }
                }
            }
        }

        report
    }

    /// Gets `p` into memory if it is not already. Returns how many other
    /// processes were evicted for it.
    fn make_resident(&self, p: &Arc<Process>) -> Result<usize, AllocError> {
        if p.holds_memory() {
            return Ok(0);
        }
        let _reserving = lock(&self.reserving);
        let size = match self.memory.backing().footprint(&p.name) {
            Some(s) if s > 0    => { s },
            _                   => { p.memory_requirement }
        };
        let evicted = self.memory.reserve(size, p);
        self.memory.allocate(size, p)?;
        self.memory.page_in(p);

        Ok(evicted)
    }
}
