use crate::utils::*;
use crate::backing::BackingStore;
use crate::clock::GlobalClock;
use crate::config::Config;
use crate::context::SimContext;
use crate::cpu::{Core, CoreState};
use crate::memory::{build_allocator, MemoryManager, MemoryStats};
use crate::process::{Process, ProcessSnapshot, ProcessSpec, Registry};
use crate::queue::ReadyQueue;
use crate::scheduler::Scheduler;
use crate::tester::Tester;
use once_cell::sync::OnceCell;
use serde::Serialize;

/// `screen -ls` style view of every admitted process.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ProcessListing {
    /// On a core right now.
    pub running:    Vec<ProcessSnapshot>,
    /// Admitted, not finished, not on a core.
    pub waiting:    Vec<ProcessSnapshot>,
    pub finished:   Vec<ProcessSnapshot>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct CpuUtilization {
    pub cores_used:     usize,
    pub cores_total:    usize,
    pub percent:        f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VmStat {
    pub total_memory:   Bytes,
    pub used_memory:    Bytes,
    pub free_memory:    Bytes,
    /// Summed over all cores.
    pub idle_ticks:     u64,
    pub active_ticks:   u64,
    pub total_ticks:    u64,
    pub pages_in:       u64,
    pub pages_out:      u64,
}

/// The emulated machine: clock, cores, scheduler, memory and the
/// admission generator, wired together from one [`Config`].
///
/// Everything here may be called from any thread while the simulation
/// runs. Nothing moves until [`System::boot`] and then either
/// [`System::step`] or [`System::run_clock`].
pub struct System {
    config:     Config,
    ctx:        Arc<SimContext>,
    clock:      Arc<GlobalClock>,
    registry:   Arc<Registry>,
    queue:      Arc<ReadyQueue>,
    memory:     Arc<MemoryManager>,
    cores:      Vec<Arc<Core>>,
    scheduler:  Arc<Scheduler>,
    tester:     Arc<Tester>,
    // Tick at which the machine was booted.
    booted:     OnceCell<Tick>,
    down:       AtomicBool,
}

impl System {
    /// Builds every component. Stale backing store entries from an
    /// earlier run are wiped. No thread is started yet.
    pub fn initialize(config: Config, ctx: SimContext) -> Result<Self, SystemError> {
        if ctx.clock_modulus < 2 {
            return Err(SystemError::ClockModulus(ctx.clock_modulus));
        }
        let ctx = Arc::new(ctx);
        let store = BackingStore::open(&ctx.backing_dir)?;
        store.clear()?;
        let alloc = build_allocator(config.policy(), config.max_overall_mem, config.mem_per_frame);
        let memory = Arc::new(MemoryManager::new(alloc, store));
        let queue = Arc::new(ReadyQueue::new());
        let registry = Arc::new(Registry::new());
        let algo = config.algorithm();
        let cores = (0..config.num_cpu)
            .map(|id| Arc::new(Core::new(id, algo, config.delays_per_exec)))
            .collect::<Vec<_>>();
        let scheduler = Arc::new(Scheduler::new(algo, cores.clone(), queue.clone(), memory.clone()));
        let tester = Arc::new(Tester::new(
            config.admission(),
            ctx.clone(),
            registry.clone(),
            queue.clone(),
        ));
        info!(
            "Initialized: {} cores, {algo:?}, {:?}, {} bytes",
            config.num_cpu,
            config.policy(),
            config.max_overall_mem
        );

        Ok(Self {
            clock: Arc::new(GlobalClock::new(ctx.clock_modulus)),
            config,
            ctx,
            registry,
            queue,
            memory,
            cores,
            scheduler,
            tester,
            booted: OnceCell::new(),
            down:   AtomicBool::new(false),
        })
    }

    /// Powers on every core and the scheduler. Later calls do nothing.
    pub fn boot(&self) {
        self.booted.get_or_init(|| {
            for core in &self.cores {
                core.start(&self.clock);
            }
            self.scheduler.start(&self.clock);
            let tick = self.clock.tick();
            info!("Booted at tick {tick}");
            tick
        });
    }

    pub fn is_booted(&self) -> bool {
        self.booted.get().is_some()
    }

    /// Runs exactly one tick on the calling thread. Returns the new tick,
    /// or `None` once shut down.
    pub fn step(&self) -> Option<Tick> {
        self.clock.advance()
    }

    /// Lets the clock run freely on its own thread, paced by the context.
    pub fn run_clock(&self) {
        self.clock.start(self.ctx.pace);
    }

    pub fn current_tick(&self) -> Tick {
        self.clock.tick()
    }

    //-----ADMISSION (START)---------------------
    /// Admits a process called `name` with a random instruction count and
    /// memory requirement drawn from the configured bounds.
    pub fn submit_process(&self, name: &str) -> Result<Arc<Process>, SystemError> {
        // A refused name must leave the random stream alone.
        if self.registry.contains(name) {
            return Err(SystemError::DuplicateProcess(String::from(name)));
        }
        let (instructions, memory) = self.config.admission().draw(&self.ctx);

        self.submit(ProcessSpec::new(name, instructions, memory))
    }

    /// Admits a process exactly as described and queues it.
    pub fn submit(&self, spec: ProcessSpec) -> Result<Arc<Process>, SystemError> {
        self.validate(&spec)?;
        let p = self.registry.admit(&self.ctx, spec, self.clock.tick())?;
        debug!("Submitted {} ({} instructions, {} bytes)", p.name, p.total_instructions, p.memory_requirement);
        self.queue.push(p.clone());

        Ok(p)
    }

    fn validate(&self, spec: &ProcessSpec) -> Result<(), SystemError> {
        let reject = |reason: String| SystemError::InvalidProcess {
            name: spec.name.clone(),
            reason,
        };
        if spec.name.is_empty() {
            return Err(reject(String::from("empty name")));
        }
        // Names double as backing store file names.
        if !spec.name.chars().all(|c| c.is_ascii_alphanumeric() || "_-.".contains(c)) || spec.name.starts_with('.') {
            return Err(reject(String::from("names may only hold letters, digits, '_', '-' and '.'")));
        }
        if spec.instructions == 0 {
            return Err(reject(String::from("no instructions")));
        }
        if spec.memory == 0 {
            return Err(reject(String::from("no memory requirement")));
        }
        if spec.memory > self.config.max_overall_mem {
            return Err(reject(format!(
                "needs {} bytes, the machine has {}",
                spec.memory, self.config.max_overall_mem
            )));
        }

        Ok(())
    }

    /// Puts an already admitted process back in the ready queue.
    /// Finished, running and already queued processes are refused.
    pub fn enqueue_existing(&self, name: &str) -> Result<Arc<Process>, SystemError> {
        let p = self.registry
            .get(name)
            .ok_or_else(|| SystemError::ProcessNotFound(String::from(name)))?;
        let reason = if p.is_completed() {
            Some("already finished")
        } else if p.core().is_some() {
            Some("currently running")
        } else if self.queue.contains(&p) {
            Some("already queued")
        } else { None };
        if let Some(r) = reason {
            return Err(SystemError::InvalidProcess {
                name:   String::from(name),
                reason: String::from(r),
            });
        }
        self.queue.push(p.clone());

        Ok(p)
    }

    pub fn start_admission_generator(&self) {
        self.tester.start(&self.clock);
    }

    pub fn stop_admission_generator(&self) {
        self.tester.stop(&self.clock);
    }
    //-----ADMISSION (END)---------------------

    //-----REPORTS (START)---------------------
    pub fn memory_stats(&self) -> MemoryStats {
        self.memory.stats()
    }

    pub fn process_snapshot(&self, name: &str) -> Result<ProcessSnapshot, SystemError> {
        self.registry
            .get(name)
            .map(|p| p.snapshot())
            .ok_or_else(|| SystemError::ProcessNotFound(String::from(name)))
    }

    pub fn processes(&self) -> ProcessListing {
        let mut res = ProcessListing::default();
        for p in self.registry.all() {
            let snap = p.snapshot();
            if snap.completed {
                res.finished.push(snap);
            } else if snap.core.is_some() {
                res.running.push(snap);
            } else {
                res.waiting.push(snap);
            }
        }

        res
    }

    pub fn cpu_utilization(&self) -> CpuUtilization {
        let cores_used = self.cores
            .iter()
            .filter(|c| c.state() == CoreState::Busy)
            .count();
        let cores_total = self.cores.len();

        CpuUtilization {
            cores_used,
            cores_total,
            percent: 100.0 * cores_used as f64 / cores_total as f64,
        }
    }

    pub fn vmstat(&self) -> VmStat {
        let stats = self.memory.stats();
        let idle_ticks = self.cores.iter().map(|c| c.idle_ticks()).sum::<u64>();
        let active_ticks = self.cores.iter().map(|c| c.busy_ticks()).sum::<u64>();

        VmStat {
            total_memory:   stats.total,
            used_memory:    stats.used,
            free_memory:    stats.free,
            idle_ticks,
            active_ticks,
            total_ticks:    idle_ticks + active_ticks,
            pages_in:       stats.pages_in,
            pages_out:      stats.pages_out,
        }
    }
    //-----REPORTS (END)---------------------

    /// Stops every thread. Processes keep whatever state they reached.
    /// Later calls do nothing.
    pub fn shutdown(&self) {
        if self.down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.clock.shutdown();
        self.tester.stop(&self.clock);
        self.scheduler.stop(&self.clock);
        for core in &self.cores {
            core.turn_off(&self.clock);
        }
        info!("Shut down at tick {}", self.clock.tick());
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn context(&self) -> &Arc<SimContext> {
        &self.ctx
    }

    pub fn clock(&self) -> &Arc<GlobalClock> {
        &self.clock
    }

    pub fn cores(&self) -> &[Arc<Core>] {
        &self.cores
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn queue(&self) -> &Arc<ReadyQueue> {
        &self.queue
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn tester(&self) -> &Arc<Tester> {
        &self.tester
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

impl Drop for System {
    fn drop(&mut self) {
        self.shutdown();
    }
}
