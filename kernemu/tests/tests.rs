use kernemu::*;
use rand::{rngs::StdRng, Rng, SeedableRng};

fn get_crate_root() -> Result<PathBuf, std::env::VarError> {
    Ok(PathBuf::from(std::env::var("CARGO_MANIFEST_DIR")?))
}

fn load_config(p: &str) -> Config {
    let mut path = get_crate_root().unwrap();
    path.push(p);

    Config::load(&path).unwrap()
}

// Each test gets its own backing store directory.
fn scratch(tag: &str) -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("kernemu-{tag}-{}", std::process::id()));
    p
}

fn spec(name: &str, instructions: u64, memory: Bytes) -> ProcessSpec {
    ProcessSpec::new(name, instructions, memory)
}

fn make_process(id: Pid, name: &str, instructions: u64, memory: Bytes) -> Arc<Process> {
    Arc::new(Process::new(id, spec(name, instructions, memory), 0))
}

fn assert_tiles(regions: &[Region], total: Bytes) {
    let mut cursor = 0;
    for r in regions {
        assert_eq!(r.start, cursor, "Gap or overlap at {cursor}");
        assert!(r.size > 0);
        assert_eq!(r.in_use, r.owner.is_some());
        cursor = r.end();
    }
    assert_eq!(cursor, total);
}

fn assert_coalesced(regions: &[Region]) {
    for (a, b) in regions.iter().tuple_windows() {
        assert!(a.in_use || b.in_use, "Free neighbours at {} and {}", a.start, b.start);
    }
}

fn start_of(regions: &[Region], owner: Pid) -> Option<Bytes> {
    regions.iter().find(|r| r.owner == Some(owner)).map(|r| r.start)
}

/// Cores, memory and a scheduler, without a scheduler thread: tests call
/// `pass` themselves and drive the cores with `advance`.
struct Rig {
    clock:  Arc<GlobalClock>,
    cores:  Vec<Arc<Core>>,
    memory: Arc<MemoryManager>,
    queue:  Arc<ReadyQueue>,
    sched:  Scheduler,
}

impl Rig {
    fn new(tag: &str, algo: Algorithm, num_cores: usize, delays: u64, alloc: Box<dyn Allocator>) -> Self {
        let clock = Arc::new(GlobalClock::new(DEFAULT_CLOCK_MODULUS));
        let store = BackingStore::open(&scratch(tag)).unwrap();
        store.clear().unwrap();
        let memory = Arc::new(MemoryManager::new(alloc, store));
        let queue = Arc::new(ReadyQueue::new());
        let cores: Vec<Arc<Core>> = (0..num_cores)
            .map(|i| Arc::new(Core::new(i, algo, delays)))
            .collect();
        for c in &cores {
            c.start(&clock);
        }
        let sched = Scheduler::new(algo, cores.clone(), queue.clone(), memory.clone());

        Rig { clock, cores, memory, queue, sched }
    }

    fn admit(&self, id: Pid, name: &str, instructions: u64, memory: Bytes) -> Arc<Process> {
        let p = make_process(id, name, instructions, memory);
        self.queue.push(p.clone());
        p
    }

    fn advance(&self) {
        assert!(self.clock.advance().is_some());
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        self.clock.shutdown();
        for c in &self.cores {
            c.turn_off(&self.clock);
        }
    }
}

//---START PROCESS & QUEUE
#[test]
fn process_completes_exactly_once() {
    let p = make_process(0, "p", 3, 16);
    assert!(!p.execute_line());
    assert!(!p.execute_line());
    assert!(p.execute_line());
    assert!(p.is_completed());
    assert!(!p.execute_line());
    assert_eq!(p.current_instruction(), 3);
}

#[test]
fn queue_rotates_and_pops_head_only() {
    let q = ReadyQueue::new();
    let (a, b) = (make_process(0, "a", 1, 1), make_process(1, "b", 1, 1));
    q.push(a.clone());
    q.push(b.clone());
    assert!(!q.pop_if(&b));
    q.rotate();
    assert_eq!(q.names(), vec!["b", "a"]);
    assert!(q.pop_if(&b));
    assert_eq!(q.len(), 1);
    assert!(q.contains(&a));
}

#[test]
fn queue_pop_timeout() {
    let q = Arc::new(ReadyQueue::new());
    assert!(q.pop_timeout(Duration::from_millis(10)).is_none());
    let pusher = {
        let q = q.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            q.push(make_process(0, "late", 1, 1));
        })
    };
    let got = q.pop_timeout(Duration::from_secs(5));
    pusher.join().unwrap();
    assert_eq!(got.map(|p| p.name.clone()), Some(String::from("late")));
}
//---END PROCESS & QUEUE

//---START ALLOCATORS
#[test]
fn flat_reverse_free_merges_back() {
    let mut m = FlatMemory::new(16, Fit::First);
    let (a, _) = m.allocate(4, 1).unwrap();
    let (b, _) = m.allocate(4, 2).unwrap();
    assert_eq!(m.available(), 8);
    m.free(b[0]);
    m.free(a[0]);
    assert_eq!(m.regions(), vec![Region::new(0, 16)]);
    assert_eq!(m.free_list_len(), 1);
    assert_eq!(m.available(), 16);
}

#[test]
fn flat_fits_differ() {
    // Holes of 8 at 0 and of 2 at 12 once a and c are gone.
    let carve = |fit| {
        let mut m = FlatMemory::new(32, fit);
        let (a, _) = m.allocate(8, 1).unwrap();
        m.allocate(4, 2).unwrap();
        let (c, _) = m.allocate(2, 3).unwrap();
        m.allocate(4, 4).unwrap();
        m.free(a[0]);
        m.free(c[0]);
        m.allocate(2, 5).unwrap();
        start_of(&m.regions(), 5)
    };
    assert_eq!(carve(Fit::First), Some(0));
    assert_eq!(carve(Fit::Best), Some(12));
}

#[test]
fn flat_exhaustion_reports_largest() {
    let mut m = FlatMemory::new(16, Fit::First);
    m.allocate(4, 1).unwrap();
    let (b, _) = m.allocate(4, 2).unwrap();
    m.allocate(8, 3).unwrap();
    m.free(b[0]);
    assert_eq!(m.allocate(8, 4), Err(AllocError::Exhausted { size: 8, largest: 4 }));
    assert_eq!(m.allocate(0, 4), Err(AllocError::Zero));
    assert_eq!(m.external_fragmentation(), 0);
}

#[test]
fn flat_random_churn_keeps_tiling() {
    for fit in [Fit::First, Fit::Best] {
        let total = 1024;
        let mut m = FlatMemory::new(total, fit);
        let mut rng = StdRng::seed_from_u64(7);
        let mut live: Vec<(RegionHandle, Bytes)> = vec![];
        for step in 0..2000u32 {
            if live.is_empty() || rng.gen_bool(0.55) {
                let size = rng.gen_range(1..=64);
                if let Ok((h, got)) = m.allocate(size, step) {
                    assert_eq!(got, size);
                    live.push((h[0], size));
                }
            } else {
                let (h, _) = live.swap_remove(rng.gen_range(0..live.len()));
                m.free(h);
                assert_coalesced(&m.regions());
            }
            let regions = m.regions();
            assert_tiles(&regions, total);
            let used: Bytes = live.iter().map(|(_, s)| s).sum();
            assert_eq!(used + m.available(), total);
            assert_eq!(regions.iter().filter(|r| !r.in_use).count(), m.free_list_len());
        }
    }
}

#[test]
fn paged_rounds_up_to_frames() {
    let mut m = PagedMemory::new(64, 4);
    let (frames, got) = m.allocate(10, 1).unwrap();
    assert_eq!(frames.len(), 3);
    assert_eq!(got, 12);
    assert_eq!(m.available(), 52);
    assert_eq!(m.units_for(10), 3);
    for f in frames {
        m.free(f);
    }
    assert_eq!(m.available(), 64);
    assert_tiles(&m.regions(), 64);
}

#[test]
fn paged_is_all_or_nothing() {
    let mut m = PagedMemory::new(16, 4);
    m.allocate(12, 1).unwrap();
    assert!(matches!(m.allocate(8, 2), Err(AllocError::Exhausted { .. })));
    assert_eq!(m.available(), 4);
    assert_eq!(m.free_list_len(), 1);
}
//---END ALLOCATORS

//---START MEMORY MANAGER
#[test]
fn backing_store_round_trip() {
    let dir = scratch("backing");
    let store = BackingStore::open(&dir).unwrap();
    store.clear().unwrap();
    store.store("p1", 64, 4).unwrap();
    assert!(matches!(store.store("p1", 32, 2), Err(StoreError::AlreadyStored(_))));
    assert_eq!(store.footprint("p1"), Some(64));
    assert_eq!(store.entries(), vec!["p1"]);
    assert_eq!(store.retrieve("p1", 4), 64);
    assert_eq!(store.retrieve("p1", 4), 0);
    assert!(!store.contains("p1"));
    assert_eq!(store.pages_out(), 4);
    assert_eq!(store.pages_in(), 4);
}

#[test]
fn reserve_evicts_oldest_waiting_and_no_more() {
    let store = BackingStore::open(&scratch("reserve")).unwrap();
    store.clear().unwrap();
    let mm = MemoryManager::new(build_allocator(Policy::FlatFirstFit, 16, 16), store);
    let ps: Vec<_> = (0..4).map(|i| make_process(i, &format!("p{i}"), 10, 4)).collect();
    for p in &ps {
        mm.allocate(4, p).unwrap();
    }
    // On a core, hence off limits.
    ps[0].set_core(Some(0));
    let ctx = make_process(4, "p4", 10, 8);
    assert_eq!(mm.reserve(8, &ctx), 2);
    assert!(mm.can_fit(8));
    assert_eq!(mm.backing().entries(), vec!["p1", "p2"]);
    assert_eq!(mm.backing().pages_out(), 2);
    assert!(mm.is_resident(0) && mm.is_resident(3));
    assert!(!ps[1].holds_memory());
    mm.allocate(8, &ctx).unwrap();
    let stats = mm.stats();
    assert_eq!(stats.used + stats.free, stats.total);
    assert_eq!(stats.resident, 3);
    assert_eq!(stats.occupied.iter().map(|o| o.name.as_str()).collect::<Vec<_>>(), vec!["p0", "p4", "p3"]);
}

#[test]
fn reserve_gives_up_without_candidates() {
    let store = BackingStore::open(&scratch("reserve-none")).unwrap();
    store.clear().unwrap();
    let mm = MemoryManager::new(build_allocator(Policy::FlatBestFit, 16, 16), store);
    let running = make_process(0, "run", 10, 16);
    mm.allocate(16, &running).unwrap();
    running.set_core(Some(0));
    let ctx = make_process(1, "new", 10, 4);
    assert_eq!(mm.reserve(4, &ctx), 0);
    assert!(!mm.can_fit(4));
    assert!(mm.backing().entries().is_empty());
}

#[test]
fn paged_eviction_counts_frames() {
    let store = BackingStore::open(&scratch("paged-evict")).unwrap();
    store.clear().unwrap();
    let mm = MemoryManager::new(build_allocator(Policy::PagedFirstFit, 16, 4), store);
    let (a, b) = (make_process(0, "a", 5, 10), make_process(1, "b", 5, 4));
    assert_eq!(mm.allocate(10, &a).unwrap(), 12);
    mm.allocate(4, &b).unwrap();
    assert_eq!(mm.stats().internal_fragmentation, 2);
    let c = make_process(2, "c", 5, 8);
    assert_eq!(mm.reserve(8, &c), 1);
    assert_eq!(mm.backing().pages_out(), 3);
    assert_eq!(mm.backing().footprint("a"), Some(10));
    mm.allocate(8, &c).unwrap();
    assert_eq!(mm.page_in(&c), 0);
    mm.release(&b);
    mm.release(&c);
    assert_eq!(mm.allocate(10, &a).unwrap(), 12);
    assert_eq!(mm.page_in(&a), 10);
    assert_eq!(mm.backing().pages_in(), 3);
}
#[test]
fn store_keeps_out_of_foreign_files() {
    let dir = scratch("foreign");
    std::fs::create_dir_all(&dir).unwrap();
    let notes = dir.join("notes.txt");
    std::fs::write(&notes, "keep me").unwrap();
    BackingStore::open(&dir).unwrap().store("stale", 8, 1).unwrap();
    let sys = System::initialize(Config::parse(BASE).unwrap(), SimContext::new(&dir, 0)).unwrap();
    assert_eq!(std::fs::read_to_string(&notes).unwrap(), "keep me");
    assert!(sys.memory().backing().entries().is_empty());
    assert!(sys.memory().backing().dir().starts_with(&dir));
    assert_ne!(sys.memory().backing().dir(), dir.as_path());
}

#[test]
fn unreadable_entry_is_dropped() {
    let store = BackingStore::open(&scratch("garbled")).unwrap();
    store.clear().unwrap();
    std::fs::write(store.dir().join("p1.txt"), "lots").unwrap();
    assert!(store.contains("p1"));
    assert_eq!(store.footprint("p1"), None);
    assert_eq!(store.retrieve("p1", 1), 0);
    assert!(!store.contains("p1"));
    assert_eq!(store.pages_in(), 0);
    store.store("p1", 16, 1).unwrap();
    assert_eq!(store.retrieve("p1", 1), 16);
}

#[test]
fn reserve_spares_everyone_when_hopeless() {
    let store = BackingStore::open(&scratch("hopeless-paged")).unwrap();
    store.clear().unwrap();
    let mm = MemoryManager::new(build_allocator(Policy::PagedFirstFit, 16, 4), store);
    let (running, waiting) = (make_process(0, "running", 10, 12), make_process(1, "waiting", 10, 4));
    mm.allocate(12, &running).unwrap();
    mm.allocate(4, &waiting).unwrap();
    running.set_core(Some(0));
    let big = make_process(2, "big", 10, 8);
    assert_eq!(mm.reserve(8, &big), 0);
    assert!(waiting.holds_memory());
    assert!(mm.is_resident(1));
    assert_eq!(mm.backing().pages_out(), 0);

    // Enough bytes would come free, but never in one piece.
    let store = BackingStore::open(&scratch("hopeless-flat")).unwrap();
    store.clear().unwrap();
    let mm = MemoryManager::new(build_allocator(Policy::FlatFirstFit, 16, 16), store);
    let (waiting, running) = (make_process(0, "waiting", 10, 4), make_process(1, "running", 10, 8));
    mm.allocate(4, &waiting).unwrap();
    mm.allocate(8, &running).unwrap();
    running.set_core(Some(0));
    assert_eq!(mm.available(), 8);
    assert_eq!(mm.reserve(8, &big), 0);
    assert!(waiting.holds_memory());
    assert!(mm.backing().entries().is_empty());
}
//---END MEMORY MANAGER

//---START CLOCK
#[test]
fn clock_runs_stages_in_order() {
    let clock = Arc::new(GlobalClock::new(DEFAULT_CLOCK_MODULUS));
    let log = Arc::new(Mutex::new(Vec::<(Tick, Stage)>::new()));
    let workers: Vec<_> = [Stage::Admit, Stage::Execute, Stage::Schedule]
        .into_iter()
        .map(|stage| {
            let ticket = clock.enroll(stage);
            let (clock, log) = (clock.clone(), log.clone());
            thread::spawn(move || {
                while let Some(t) = clock.await_turn(&ticket) {
                    lock(&log).push((t, ticket.stage()));
                    clock.arrive(&ticket);
                }
            })
        })
        .collect();
    assert_eq!(clock.advance(), Some(1));
    assert_eq!(clock.advance(), Some(2));
    clock.shutdown();
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(*lock(&log), vec![
        (0, Stage::Schedule),
        (0, Stage::Execute),
        (0, Stage::Admit),
        (1, Stage::Schedule),
        (1, Stage::Execute),
        (1, Stage::Admit),
    ]);
}

#[test]
fn clock_withdraw_unblocks() {
    let clock = Arc::new(GlobalClock::new(DEFAULT_CLOCK_MODULUS));
    let ticket = clock.enroll(Stage::Execute);
    let quitter = {
        let clock = clock.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            clock.withdraw(&ticket);
        })
    };
    assert_eq!(clock.advance(), Some(1));
    quitter.join().unwrap();
    assert_eq!(clock.members(Stage::Execute), 0);
}

#[test]
fn clock_shutdown_interrupts_tick() {
    let clock = Arc::new(GlobalClock::new(DEFAULT_CLOCK_MODULUS));
    let _stuck = clock.enroll(Stage::Schedule);
    let stopper = {
        let clock = clock.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            clock.shutdown();
        })
    };
    assert_eq!(clock.advance(), None);
    stopper.join().unwrap();
    assert_eq!(clock.tick(), 0);
}

#[test]
fn clock_wraps() {
    let clock = GlobalClock::new(3);
    let ticks: Vec<_> = (0..4).map(|_| clock.advance()).collect();
    assert_eq!(ticks, vec![Some(1), Some(2), Some(0), Some(1)]);
}
//---END CLOCK

//---START SCHEDULING
#[test]
fn rr_preempts_after_quantum() {
    let rig = Rig::new("rr-quantum", Algorithm::RoundRobin { quantum: 3 }, 1, 0, build_allocator(Policy::FlatFirstFit, 16, 16));
    let p = rig.admit(0, "p", 10, 4);
    assert_eq!(rig.sched.pass(0).dispatched, 1);
    for _ in 0..3 {
        rig.advance();
    }
    assert!(rig.cores[0].should_preempt());
    let report = rig.sched.reclaim(3);
    assert_eq!(report.preempted, 1);
    assert_eq!(p.current_instruction(), 3);
    assert!(!p.is_completed());
    assert!(rig.queue.contains(&p));
    assert_eq!(p.core(), None);
    // Preemption keeps memory.
    assert!(p.holds_memory());

    let mut at_dispatch = p.current_instruction();
    let mut tick = 4;
    while p.finished_at().is_none() {
        assert!(tick < 100, "Never finished");
        if rig.sched.pass(tick).dispatched > 0 {
            at_dispatch = p.current_instruction();
        }
        if p.finished_at().is_some() {
            break;
        }
        rig.advance();
        assert!(p.current_instruction() - at_dispatch <= 3);
        tick += 1;
    }
    assert_eq!(p.current_instruction(), 10);
    assert_eq!(rig.memory.available(), 16);
    assert_eq!(rig.sched.dispatches(), 4);
}

#[test]
fn fcfs_head_blocks_everyone() {
    let rig = Rig::new("fcfs-block", Algorithm::Fcfs, 3, 0, build_allocator(Policy::FlatFirstFit, 16, 16));
    let a = rig.admit(0, "a", 100, 8);
    rig.sched.pass(0);
    assert_eq!(a.core(), Some(0));
    rig.admit(1, "b", 5, 16);
    let c = rig.admit(2, "c", 5, 4);
    let report = rig.sched.pass(1);
    assert!(report.blocked);
    assert_eq!(report.dispatched, 0);
    assert_eq!(rig.queue.names(), vec!["b", "c"]);
    assert_eq!(c.core(), None);
    assert!(rig.cores[1].is_idle() && rig.cores[2].is_idle());
}

#[test]
fn rr_rotates_past_blocked_head() {
    let rig = Rig::new("rr-rotate", Algorithm::RoundRobin { quantum: 5 }, 3, 0, build_allocator(Policy::FlatFirstFit, 16, 16));
    rig.admit(0, "a", 100, 8);
    rig.sched.pass(0);
    rig.admit(1, "b", 5, 16);
    let c = rig.admit(2, "c", 5, 4);
    let report = rig.sched.pass(1);
    assert!(report.blocked);
    assert_eq!(report.dispatched, 1);
    assert_eq!(c.core(), Some(1));
    assert_eq!(rig.queue.names(), vec!["b"]);
}

#[test]
fn waiting_process_gets_evicted_and_paged_back() {
    let rig = Rig::new("swap", Algorithm::RoundRobin { quantum: 2 }, 1, 0, build_allocator(Policy::FlatFirstFit, 16, 16));
    let p1 = rig.admit(0, "p1", 10, 16);
    let p2 = rig.admit(1, "p2", 10, 16);
    rig.sched.pass(0);
    rig.advance();
    rig.advance();
    let report = rig.sched.pass(2);
    assert_eq!((report.preempted, report.dispatched, report.evicted), (1, 1, 1));
    assert_eq!(p2.core(), Some(0));
    assert!(!p1.holds_memory());
    assert_eq!(rig.memory.backing().entries(), vec!["p1"]);
    rig.advance();
    rig.advance();
    let report = rig.sched.pass(4);
    assert_eq!(report.evicted, 1);
    assert_eq!(p1.core(), Some(0));
    assert_eq!(rig.memory.backing().entries(), vec!["p2"]);
    assert_eq!(rig.memory.backing().pages_in(), 1);
    assert_eq!(rig.memory.backing().pages_out(), 2);
}

#[test]
fn delays_stretch_execution() {
    let rig = Rig::new("delays", Algorithm::Fcfs, 1, 2, build_allocator(Policy::PagedFirstFit, 16, 4));
    let p = rig.admit(0, "slow", 2, 4);
    rig.sched.pass(0);
    for _ in 0..3 {
        rig.advance();
    }
    assert_eq!(p.current_instruction(), 1);
    rig.advance();
    assert!(p.is_completed());
    assert_eq!(rig.cores[0].busy_ticks(), 4);
    rig.sched.pass(4);
    assert_eq!(p.finished_at(), Some(4));
    assert!(rig.cores[0].is_idle());
}
//---END SCHEDULING

//---START CONFIG
const BASE: &str = "num-cpu 4
scheduler \"rr\"
quantum-cycles 5
batch-process-freq 1
min-ins 1000
max-ins 2000
delays-per-exec 0
";

fn config_err(txt: &str) -> ConfigError {
    Config::parse(txt).unwrap_err()
}

#[test]
fn config_defaults() {
    let cfg = Config::parse(BASE).unwrap();
    assert_eq!(cfg.num_cpu, 4);
    assert_eq!(cfg.algorithm(), Algorithm::RoundRobin { quantum: 5 });
    assert_eq!(cfg.max_overall_mem, 16384);
    assert_eq!(cfg.mem_per_frame, 16);
    assert_eq!((cfg.min_mem_per_proc, cfg.max_mem_per_proc), (4096, 4096));
    assert_eq!(cfg.policy(), Policy::PagedFirstFit);
}

#[test]
fn config_flat_when_frame_is_whole_memory() {
    let cfg = Config::parse(&format!("{BASE}max-overall-mem 1024\nmem-per-frame 1024\nmem-per-proc 256\nfit best-fit\n")).unwrap();
    assert_eq!(cfg.policy(), Policy::FlatBestFit);
    assert_eq!((cfg.min_mem_per_proc, cfg.max_mem_per_proc), (256, 256));
    let cfg = load_config("tests/data/fcfs-paged.txt");
    assert_eq!(cfg.algorithm(), Algorithm::Fcfs);
    assert_eq!(cfg.policy(), Policy::PagedFirstFit);
}

#[test]
fn config_errors_carry_lines() {
    let e = config_err("# header\nnum-cpu 4\n\nscheduler sjf\n");
    assert_eq!(e.line, 4);
    assert!(matches!(e.kind, ConfigErrorKind::OutOfRange { key: "scheduler", .. }));

    let e = config_err("num-cpu 4\nquantum-cycles 5\n");
    assert_eq!(e, ConfigError { line: 2, kind: ConfigErrorKind::OutOfOrder(String::from("quantum-cycles")) });

    let e = config_err("num-cpu 4\nscheduler fcfs\ncolour blue\n");
    assert_eq!(e, ConfigError { line: 3, kind: ConfigErrorKind::UnknownKey(String::from("colour")) });

    let e = config_err("num-cpu 4\nscheduler fcfs\nquantum-cycles 1\n");
    assert_eq!(e, ConfigError { line: 4, kind: ConfigErrorKind::Missing("batch-process-freq") });

    assert_eq!(config_err("num-cpu 129\n").line, 1);
    assert_eq!(config_err("num-cpu\n").kind, ConfigErrorKind::Malformed(String::from("num-cpu")));
    assert!(matches!(config_err("num-cpu four\n").kind, ConfigErrorKind::NotANumber { key: "num-cpu", .. }));
}

#[test]
fn config_cross_checks() {
    let e = config_err(&BASE.replace("max-ins 2000", "max-ins 10"));
    assert_eq!(e.line, 6);
    assert!(matches!(e.kind, ConfigErrorKind::Inconsistent(_)));

    let e = config_err(&format!("{BASE}max-overall-mem 1000\n"));
    assert_eq!(e.line, 8);
    assert!(matches!(e.kind, ConfigErrorKind::OutOfRange { key: "max-overall-mem", .. }));

    let e = config_err(&format!("{BASE}max-overall-mem 1024\nmem-per-frame 16\nmax-mem-per-proc 2048\n"));
    assert_eq!(e.line, 10);
    assert!(matches!(e.kind, ConfigErrorKind::Inconsistent(_)));

    let e = config_err(&format!("{BASE}fit first-fit\nfit best-fit\n"));
    assert_eq!(e, ConfigError { line: 9, kind: ConfigErrorKind::OutOfOrder(String::from("fit")) });
}
//---END CONFIG

//---START SYSTEM
fn boot(cfg: Config, tag: &str, seed: u64) -> System {
    let sys = System::initialize(cfg, SimContext::new(&scratch(tag), seed)).unwrap();
    sys.boot();
    sys
}

fn run_until_done(sys: &System, limit: u64) -> u64 {
    let mut steps = 0;
    while !sys.registry().all().iter().all(|p| p.finished_at().is_some()) {
        assert!(steps < limit, "Not done after {limit} ticks");
        let stats = sys.memory_stats();
        assert_tiles(&stats.regions, stats.total);
        assert_eq!(stats.used + stats.free, stats.total);
        assert!(sys.step().is_some());
        steps += 1;
    }

    steps
}

#[test]
fn submit_rejects_duplicates_and_junk() {
    let sys = boot(Config::parse(BASE).unwrap(), "submit", 1);
    sys.submit(spec("P1", 10, 64)).unwrap();
    assert!(matches!(sys.submit(spec("P1", 10, 64)), Err(SystemError::DuplicateProcess(_))));
    assert_eq!(sys.registry().len(), 1);
    assert_eq!(sys.queue().len(), 1);
    assert!(matches!(sys.submit(spec("P2", 0, 64)), Err(SystemError::InvalidProcess { .. })));
    assert!(matches!(sys.submit(spec("P3", 10, 1 << 20)), Err(SystemError::InvalidProcess { .. })));
    assert!(matches!(sys.submit(spec("../P4", 10, 64)), Err(SystemError::InvalidProcess { .. })));
    assert!(matches!(sys.process_snapshot("nope"), Err(SystemError::ProcessNotFound(_))));
    assert!(matches!(sys.enqueue_existing("P1"), Err(SystemError::InvalidProcess { .. })));
    assert!(matches!(sys.enqueue_existing("nope"), Err(SystemError::ProcessNotFound(_))));
    let p = sys.submit_process("P5").unwrap();
    assert!((1000..=2000).contains(&p.total_instructions));
    assert_eq!(p.memory_requirement, 4096);
    sys.shutdown();
}

#[test]
fn rr_flat_run_drains() {
    let cfg = load_config("tests/data/rr-flat.txt");
    let sys = boot(cfg, "rr-flat", 3);
    for i in 0..8 {
        sys.submit_process(&format!("job{i}")).unwrap();
    }
    let steps = run_until_done(&sys, 20_000);
    let listing = sys.processes();
    assert_eq!(listing.finished.len(), 8);
    assert!(listing.running.is_empty() && listing.waiting.is_empty());
    let vm = sys.vmstat();
    assert_eq!(vm.used_memory, 0);
    assert_eq!(vm.total_ticks, 2 * steps);
    assert_eq!(vm.pages_in, vm.pages_out);
    assert!(sys.memory().backing().entries().is_empty());
    let snap = sys.process_snapshot("job0").unwrap();
    assert!(snap.completed && snap.current == snap.total);
    assert_eq!(sys.cpu_utilization().cores_used, 0);
    sys.shutdown();
    assert!(sys.step().is_none());
}

#[test]
fn fcfs_paged_run_drains() {
    let cfg = load_config("tests/data/fcfs-paged.txt");
    let sys = boot(cfg, "fcfs-paged", 5);
    for i in 0..10 {
        sys.submit_process(&format!("job{i}")).unwrap();
    }
    sys.step();
    assert_eq!(sys.cpu_utilization().cores_used, 4);
    assert_eq!(sys.memory_stats().used, 1024);
    run_until_done(&sys, 5_000);
    assert_eq!(sys.vmstat().pages_out, 0);
    assert_eq!(sys.processes().finished.len(), 10);
    sys.shutdown();
}

#[test]
fn generator_keeps_cadence() {
    let cfg = Config::parse(&BASE.replace("batch-process-freq 1", "batch-process-freq 3")).unwrap();
    let sys = boot(cfg, "generator", 11);
    sys.submit(spec("process1", 10, 64)).unwrap();
    sys.start_admission_generator();
    sys.start_admission_generator();
    for _ in 0..9 {
        sys.step();
    }
    assert_eq!(sys.tester().admitted(), 3);
    for name in ["process0", "process2", "process3"] {
        assert!(sys.registry().contains(name), "{name} missing");
    }
    sys.stop_admission_generator();
    sys.stop_admission_generator();
    for _ in 0..6 {
        sys.step();
    }
    assert_eq!(sys.tester().admitted(), 3);
    assert_eq!(sys.registry().len(), 4);
    sys.shutdown();
}
#[test]
fn duplicate_submission_leaves_draws_alone() {
    let draw_b = |tag: &str, retry: bool| {
        let sys = boot(Config::parse(BASE).unwrap(), tag, 21);
        sys.submit_process("a").unwrap();
        if retry {
            assert!(matches!(sys.submit_process("a"), Err(SystemError::DuplicateProcess(_))));
        }
        let b = sys.submit_process("b").unwrap();
        sys.shutdown();
        b.total_instructions
    };
    assert_eq!(draw_b("dup-once", false), draw_b("dup-twice", true));
}

#[test]
fn tiny_clock_modulus_is_refused() {
    let ctx = SimContext::new(&scratch("modulus"), 0).with_clock_modulus(1);
    let res = System::initialize(Config::parse(BASE).unwrap(), ctx);
    assert!(matches!(res, Err(SystemError::ClockModulus(1))));
}

#[test]
fn free_running_clock_takes_submissions() {
    let cfg = load_config("tests/data/rr-flat.txt");
    let ctx = SimContext::new(&scratch("free-run"), 13).with_pace(Duration::from_micros(100));
    let sys = System::initialize(cfg, ctx).unwrap();
    sys.boot();
    sys.start_admission_generator();
    sys.run_clock();
    assert!(sys.clock().is_running());
    let names: Vec<String> = (0..20).map(|i| format!("user{i}")).collect();
    for name in &names {
        sys.submit_process(name).unwrap();
        thread::sleep(Duration::from_millis(1));
    }
    let deadline = std::time::Instant::now() + Duration::from_secs(60);
    while sys.current_tick() < 200 {
        assert!(std::time::Instant::now() < deadline, "Clock stuck at {}", sys.current_tick());
        thread::sleep(Duration::from_millis(5));
    }
    sys.shutdown();
    assert!(!sys.clock().is_running());
    assert!(sys.step().is_none());
    let tick = sys.current_tick();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(sys.current_tick(), tick);

    for name in &names {
        assert!(sys.registry().contains(name), "{name} missing");
    }
    assert!(sys.tester().admitted() > 0);
    assert_eq!(sys.registry().len() as u64, names.len() as u64 + sys.tester().admitted());
    let stats = sys.memory_stats();
    assert_tiles(&stats.regions, stats.total);
    assert_coalesced(&stats.regions);
    assert_eq!(stats.used + stats.free, stats.total);
    for p in sys.registry().all() {
        let s = p.snapshot();
        assert!(s.current <= s.total);
        assert_eq!(s.completed, s.current == s.total);
    }
}
//---END SYSTEM
