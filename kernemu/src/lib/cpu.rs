use crate::utils::*;
use crate::clock::{GlobalClock, Stage, Ticket};
use crate::process::Process;
use crate::scheduler::Algorithm;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CoreState {
    Off,
    Idle,
    Busy,
}

#[derive(Default)]
struct Slot {
    process:        Option<Arc<Process>>,
    quantum_left:   u64,
    delay_left:     u64,
    should_preempt: bool,
    completed:      bool,
}

/// One execution unit.
///
/// A core never decides where its process goes next. When the process
/// finishes, or when its quantum runs out under Round-Robin, the core
/// raises a flag and stops executing; the scheduler then detaches the
/// process with [`Core::finish`] or [`Core::preempt`].
pub struct Core {
    pub id:     usize,
    algo:       Algorithm,
    delays:     u64,
    slot:       Mutex<Slot>,
    on:         AtomicBool,
    busy_ticks: AtomicU64,
    idle_ticks: AtomicU64,
    ticket:     Mutex<Option<Ticket>>,
    thread:     Mutex<Option<JoinHandle<()>>>,
}

impl Core {
    pub fn new(id: usize, algo: Algorithm, delays: u64) -> Self {
        Self {
            id,
            algo,
            delays,
            slot:       Mutex::new(Slot::default()),
            on:         AtomicBool::new(false),
            busy_ticks: AtomicU64::new(0),
            idle_ticks: AtomicU64::new(0),
            ticket:     Mutex::new(None),
            thread:     Mutex::new(None),
        }
    }

    /// Powers the core on: it joins the clock's Execute stage and gets
    /// its own thread. Does nothing if already on.
    pub fn start(self: &Arc<Self>, clock: &Arc<GlobalClock>) {
        if self.on.swap(true, Ordering::AcqRel) {
            return;
        }
        let ticket = clock.enroll(Stage::Execute);
        *lock(&self.ticket) = Some(ticket);
        let (core, clock) = (self.clone(), clock.clone());
        *lock(&self.thread) = Some(thread::spawn(move || {
            while let Some(_) = clock.await_turn(&ticket) {
                core.tick();
                clock.arrive(&ticket);
            }
            trace!("Core {} thread out", core.id);
        }));
        debug!("Core {} on", self.id);
    }

    /// Powers the core off and joins its thread. A process still on the
    /// core stays attached.
    pub fn turn_off(&self, clock: &GlobalClock) {
        self.on.store(false, Ordering::Release);
        if let Some(t) = lock(&self.ticket).take() {
            clock.withdraw(&t);
        }
        let handle = lock(&self.thread).take();
        if let Some(h) = handle {
            if h.join().is_err() {
                warn!("Core {} thread panicked", self.id);
            }
        }
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::Acquire)
    }

    /// One Execute turn.
    pub fn tick(&self) {
        let mut s = lock(&self.slot);
        let p = match &s.process {
            Some(p) => { p.clone() },
            None    => {
                self.idle_ticks.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        self.busy_ticks.fetch_add(1, Ordering::Relaxed);
        // Waiting for the scheduler to come and get it.
        if s.completed || s.should_preempt {
            return;
        }
        if s.delay_left > 0 {
            s.delay_left -= 1;
        } else {
            p.execute_line();
            s.delay_left = self.delays;
            if p.is_completed() {
                s.completed = true;
                debug!("Core {}: {} completed", self.id, p.name);
            }
        }
        if let Algorithm::RoundRobin { .. } = self.algo {
            s.quantum_left = s.quantum_left.saturating_sub(1);
            if s.quantum_left == 0 && !s.completed {
                s.should_preempt = true;
            }
        }
    }

    /// Puts `p` on the core. Hands `p` back if the core is not idle.
    pub fn assign(&self, p: Arc<Process>) -> Result<(), Arc<Process>> {
        if !self.is_on() {
            return Err(p);
        }
        let mut s = lock(&self.slot);
        if s.process.is_some() {
            return Err(p);
        }
        p.set_core(Some(self.id));
        *s = Slot {
            process:        Some(p),
            quantum_left:   self.algo.quantum(),
            delay_left:     0,
            should_preempt: false,
            completed:      false,
        };

        Ok(())
    }

    fn detach(s: &mut Slot) -> Option<Arc<Process>> {
        let p = s.process.take()?;
        p.set_core(None);
        *s = Slot::default();

        Some(p)
    }

    /// Detaches a completed process.
    pub fn finish(&self) -> Option<Arc<Process>> {
        let mut s = lock(&self.slot);
        if !s.completed {
            return None;
        }
        Self::detach(&mut s)
    }

    /// Detaches a process whose quantum ran out.
    pub fn preempt(&self) -> Option<Arc<Process>> {
        let mut s = lock(&self.slot);
        if !s.should_preempt {
            return None;
        }
        Self::detach(&mut s)
    }

    pub fn is_active(&self) -> bool {
        lock(&self.slot).process.is_some()
    }

    pub fn is_idle(&self) -> bool {
        self.is_on() && !self.is_active()
    }

    pub fn should_preempt(&self) -> bool {
        lock(&self.slot).should_preempt
    }

    pub fn process_completed(&self) -> bool {
        lock(&self.slot).completed
    }

    pub fn current(&self) -> Option<Arc<Process>> {
        lock(&self.slot).process.clone()
    }

    pub fn state(&self) -> CoreState {
        if !self.is_on() {
            CoreState::Off
        } else if self.is_active() {
            CoreState::Busy
        } else {
            CoreState::Idle
        }
    }

    pub fn busy_ticks(&self) -> u64 {
        self.busy_ticks.load(Ordering::Relaxed)
    }

    pub fn idle_ticks(&self) -> u64 {
        self.idle_ticks.load(Ordering::Relaxed)
    }
}
