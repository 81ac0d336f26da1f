use crate::utils::*;

/// How long any waiter sleeps before looking at the shutdown flag
/// again, even if nobody notified it.
const POLL: Duration = Duration::from_millis(20);

/// The parts of a tick, in the order they run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    /// The scheduler reclaims and dispatches.
    Schedule,
    /// Every powered-on core does one tick of work.
    Execute,
    /// The admission generator may admit a process.
    Admit,
}

const STAGES: [Stage; 3] = [Stage::Schedule, Stage::Execute, Stage::Admit];

/// Proof of membership in a stage. Handed out by [`GlobalClock::enroll`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Ticket {
    id:     usize,
    stage:  Stage,
}

impl Ticket {
    pub fn stage(&self) -> Stage {
        self.stage
    }
}

struct ClockState {
    tick:       Tick,
    open:       Option<Stage>,
    members:    OrderedMap<usize, Stage>,
    // Members of the open stage that already acted.
    arrived:    BTreeSet<usize>,
    next_id:    usize,
}

impl ClockState {
    fn pending(&self, stage: Stage) -> bool {
        self.members
            .iter()
            .any(|(id, s)| *s == stage && !self.arrived.contains(id))
    }
}

/// The lockstep barrier that drives simulated time.
///
/// A tick opens the [`Stage`]s one after the other. A stage stays open
/// until every member enrolled in it has arrived; only then does the next
/// one open, and only after the last one does the tick counter move. A
/// member that never arrives therefore stops time for everybody. That is
/// the intended backpressure.
///
/// Every wait re-checks the shutdown flag at least every few milliseconds,
/// so a shutdown releases all waiters without finishing the tick.
pub struct GlobalClock {
    state:      Mutex<ClockState>,
    cv:         Condvar,
    shutdown:   AtomicBool,
    modulus:    Tick,
    // Serializes callers of `advance`.
    driver:     Mutex<()>,
    runner:     Mutex<Option<JoinHandle<()>>>,
}

impl GlobalClock {
    /// Panics if `modulus` is below 2.
    pub fn new(modulus: Tick) -> Self {
        assert!(modulus >= 2, "Clock modulus too small.");
        Self {
            state:      Mutex::new(ClockState {
                tick:       0,
                open:       None,
                members:    IndexMap::default(),
                arrived:    BTreeSet::new(),
                next_id:    0,
            }),
            cv:         Condvar::new(),
            shutdown:   AtomicBool::new(false),
            modulus,
            driver:     Mutex::new(()),
            runner:     Mutex::new(None),
        }
    }

    fn wait<'a>(&self, g: MutexGuard<'a, ClockState>) -> MutexGuard<'a, ClockState> {
        match self.cv.wait_timeout(g, POLL) {
            Ok((g, _))  => { g },
            Err(p)      => { p.into_inner().0 }
        }
    }

    pub fn tick(&self) -> Tick {
        lock(&self.state).tick
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn members(&self, stage: Stage) -> usize {
        lock(&self.state).members.values().filter(|s| **s == stage).count()
    }

    /// Joins `stage`. The newcomer takes part from the next opening of
    /// that stage, or from the current one if it is still open.
    pub fn enroll(&self, stage: Stage) -> Ticket {
        let mut st = lock(&self.state);
        let id = st.next_id;
        st.next_id += 1;
        st.members.insert(id, stage);

        Ticket { id, stage }
    }

    /// Leaves the barrier. If the clock was waiting on this member only,
    /// it moves on.
    pub fn withdraw(&self, t: &Ticket) {
        let mut st = lock(&self.state);
        st.members.shift_remove(&t.id);
        st.arrived.remove(&t.id);
        self.cv.notify_all();
    }

    /// Blocks until `t`'s stage is open and `t` has not acted in it yet.
    /// Returns the current tick, or `None` once the clock shut down or
    /// the ticket was withdrawn.
    pub fn await_turn(&self, t: &Ticket) -> Option<Tick> {
        let mut st = lock(&self.state);
        loop {
            if self.is_shut_down() || !st.members.contains_key(&t.id) {
                return None;
            }
            if st.open == Some(t.stage) && !st.arrived.contains(&t.id) {
                return Some(st.tick);
            }
            st = self.wait(st);
        }
    }

    /// Reports that `t` is done for the open stage.
    pub fn arrive(&self, t: &Ticket) {
        let mut st = lock(&self.state);
        if st.open == Some(t.stage) {
            st.arrived.insert(t.id);
        }
        self.cv.notify_all();
    }

    /// Runs one full tick on the calling thread: opens every stage in
    /// order, waits for its members, then moves the counter. Returns the
    /// new tick, or `None` if shutdown interrupted the tick.
    pub fn advance(&self) -> Option<Tick> {
        let _driving = lock(&self.driver);
        if self.is_shut_down() {
            return None;
        }
        let mut st = lock(&self.state);
        for stage in STAGES {
            st.open = Some(stage);
            st.arrived.clear();
            self.cv.notify_all();
            while st.pending(stage) {
                if self.is_shut_down() {
                    st.open = None;
                    return None;
                }
                st = self.wait(st);
            }
        }
        st.open = None;
        st.arrived.clear();
        st.tick = (st.tick + 1) % self.modulus;
        trace!("Tick -> {}", st.tick);
        self.cv.notify_all();

        Some(st.tick)
    }

    /// Lets the clock run on its own thread until shutdown. `pace`, if
    /// given, is slept between ticks. Calling it twice does nothing.
    pub fn start(self: &Arc<Self>, pace: Option<Duration>) {
        let mut runner = lock(&self.runner);
        if runner.is_some() {
            return;
        }
        let clock = self.clone();
        *runner = Some(thread::spawn(move || {
            while let Some(_) = clock.advance() {
                if let Some(p) = pace {
                    thread::sleep(p);
                }
            }
        }));
        info!("Clock running");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.runner).is_some()
    }

    /// Raises the shutdown flag, wakes every waiter and joins the clock
    /// thread if there is one.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        {
            let _st = lock(&self.state);
            self.cv.notify_all();
        }
        let handle = lock(&self.runner).take();
        if let Some(h) = handle {
            if h.join().is_err() {
                warn!("Clock thread panicked");
            }
        }
    }
}
