use sanity::*;

fn scratch(tag: &str) -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("sanity-{tag}-{}", std::process::id()));
    p
}

const CONFIG: &str = "num-cpu 2
scheduler rr
quantum-cycles 3
batch-process-freq 2
min-ins 4
max-ins 30
delays-per-exec 0
max-overall-mem 512
mem-per-frame 512
min-mem-per-proc 32
max-mem-per-proc 256
";

fn stats_with(regions: Vec<Region>) -> MemoryStats {
    let total: Bytes = regions.iter().map(|r| r.size).sum();
    let used: Bytes = regions.iter().filter(|r| r.in_use).map(|r| r.size).sum();

    MemoryStats {
        policy:                 Policy::FlatFirstFit,
        total,
        used,
        free:                   total - used,
        frame_size:             None,
        resident:               0,
        external_fragmentation: 0,
        internal_fragmentation: 0,
        occupied:               vec![],
        regions,
        free_list_len:          0,
        pages_in:               0,
        pages_out:              0,
    }
}

fn used(start: Bytes, size: Bytes, owner: Pid) -> Region {
    Region { start, size, in_use: true, owner: Some(owner) }
}

#[test]
fn catches_broken_tilings() {
    let good = stats_with(vec![used(0, 4, 1), Region::new(4, 12)]);
    assert_eq!(check_memory(&good), Ok(()));

    let gap = stats_with(vec![used(0, 4, 1), Region::new(6, 10)]);
    assert_eq!(check_memory(&gap), Err(Violation::Gap { at: 4 }));

    let split = stats_with(vec![Region::new(0, 4), Region::new(4, 12)]);
    assert_eq!(check_memory(&split), Err(Violation::Uncoalesced { left: 0, right: 4 }));

    let mut paged = split.clone();
    paged.policy = Policy::PagedFirstFit;
    assert_eq!(check_memory(&paged), Ok(()));

    let mut orphan = good.clone();
    orphan.regions[0].owner = None;
    assert_eq!(check_memory(&orphan), Err(Violation::Unowned { at: 0 }));

    let mut books = good;
    books.free += 1;
    assert!(matches!(check_memory(&books), Err(Violation::Accounting { .. })));
}

#[test]
fn catches_bad_process_state() {
    let p = Process::new(0, ProcessSpec::new("p", 2, 4), 0);
    assert_eq!(check_process(&p.snapshot()), Ok(()));
    let mut snap = p.snapshot();
    snap.current = 3;
    assert!(matches!(check_process(&snap), Err(Violation::Overrun { .. })));
    let mut snap = p.snapshot();
    snap.current = 2;
    assert!(matches!(check_process(&snap), Err(Violation::Completion { .. })));
    let mut snap = p.snapshot();
    snap.finished_at = Some(5);
    snap.core = Some(1);
    assert!(matches!(check_process(&snap), Err(Violation::Lingering { core: 1, .. })));
}

#[test]
fn generated_run_stays_sane() {
    let cfg = Config::parse(CONFIG).unwrap();
    let sys = System::initialize(cfg, SimContext::new(&scratch("run"), 17)).unwrap();
    sys.boot();
    sys.start_admission_generator();
    let mut monitor = Monitor::new();
    for _ in 0..400 {
        monitor.observe(&sys).unwrap();
        assert!(sys.step().is_some());
    }
    sys.stop_admission_generator();
    monitor.observe(&sys).unwrap();
    let report = monitor.report(&sys);
    assert_eq!(report.ticks, 400);
    assert_eq!(report.processes, 200);
    assert_eq!(report.samples, 401);
    assert!(report.peak_used <= report.total_memory);
    assert!(report.cpu_utilization > 0.0);
    sys.shutdown();
}
