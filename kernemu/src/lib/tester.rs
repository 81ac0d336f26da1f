use crate::utils::*;
use crate::clock::{GlobalClock, Stage, Ticket};
use crate::context::SimContext;
use crate::process::{Process, ProcessSpec, Registry};
use crate::queue::ReadyQueue;

/// Bounds for synthetic processes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AdmissionParams {
    /// Ticks between two admissions.
    pub freq:       u64,
    pub min_ins:    u64,
    pub max_ins:    u64,
    /// Powers of two.
    pub min_mem:    Bytes,
    pub max_mem:    Bytes,
}

impl AdmissionParams {
    /// Draws an instruction count and a memory requirement.
    pub fn draw(&self, ctx: &SimContext) -> (u64, Bytes) {
        (
            ctx.draw(self.min_ins, self.max_ins),
            ctx.draw_pow2(self.min_mem, self.max_mem),
        )
    }
}

/// Feeds the system with synthetic processes, one every `freq` ticks.
pub struct Tester {
    params:     AdmissionParams,
    ctx:        Arc<SimContext>,
    registry:   Arc<Registry>,
    queue:      Arc<ReadyQueue>,
    since_last: AtomicU64,
    next_name:  AtomicU64,
    admitted:   AtomicU64,
    running:    AtomicBool,
    ticket:     Mutex<Option<Ticket>>,
    thread:     Mutex<Option<JoinHandle<()>>>,
}

pub const NAME_PREFIX: &str = "process";

impl Tester {
    pub fn new(
        params:     AdmissionParams,
        ctx:        Arc<SimContext>,
        registry:   Arc<Registry>,
        queue:      Arc<ReadyQueue>,
    ) -> Self {
        Self {
            params,
            ctx,
            registry,
            queue,
            since_last: AtomicU64::new(0),
            next_name:  AtomicU64::new(0),
            admitted:   AtomicU64::new(0),
            running:    AtomicBool::new(false),
            ticket:     Mutex::new(None),
            thread:     Mutex::new(None),
        }
    }

    pub fn params(&self) -> &AdmissionParams {
        &self.params
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// How many processes this generator admitted so far.
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Joins the Admit stage. Calling it while running does nothing.
    pub fn start(self: &Arc<Self>, clock: &Arc<GlobalClock>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        self.since_last.store(0, Ordering::Relaxed);
        let ticket = clock.enroll(Stage::Admit);
        *lock(&self.ticket) = Some(ticket);
        let (tester, clock) = (self.clone(), clock.clone());
        *lock(&self.thread) = Some(thread::spawn(move || {
            while let Some(tick) = clock.await_turn(&ticket) {
                tester.on_tick(tick);
                clock.arrive(&ticket);
            }
            trace!("Generator thread out");
        }));
        info!("Admission generator on, one process every {} ticks", self.params.freq);
    }

    /// Leaves the Admit stage and joins the thread. Calling it while
    /// stopped does nothing.
    pub fn stop(&self, clock: &GlobalClock) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(t) = lock(&self.ticket).take() {
            clock.withdraw(&t);
        }
        let handle = lock(&self.thread).take();
        if let Some(h) = handle {
            if h.join().is_err() {
                warn!("Generator thread panicked");
            }
        }
        info!("Admission generator off after {} admissions", self.admitted());
    }

    /// One Admit turn. Admits a process every `freq`-th call.
    pub fn on_tick(&self, tick: Tick) -> Option<Arc<Process>> {
        let since = self.since_last.fetch_add(1, Ordering::AcqRel) + 1;
        if since < self.params.freq {
            return None;
        }
        self.since_last.store(0, Ordering::Release);

        Some(self.admit_one(tick))
    }

    /// Admits one synthetic process right away and queues it.
    pub fn admit_one(&self, tick: Tick) -> Arc<Process> {
        let (instructions, memory) = self.params.draw(&self.ctx);
        let p = self.registry.admit_fresh(
            &self.ctx,
            || format!("{NAME_PREFIX}{}", self.next_name.fetch_add(1, Ordering::Relaxed)),
            |name| ProcessSpec { name, instructions, memory },
            tick,
        );
        self.admitted.fetch_add(1, Ordering::Relaxed);
        debug!("Admitted {} ({instructions} instructions, {memory} bytes) at tick {tick}", p.name);
        self.queue.push(p.clone());

        p
    }
}
