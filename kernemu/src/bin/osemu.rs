use kernemu::*;
use clap::Parser;
use serde::Serialize;

/// Runs the scheduler and memory emulator for a fixed number of ticks
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, value_parser = clap::value_parser!(PathBuf))]
    config:         PathBuf,

    /// How many ticks to simulate
    #[arg(short, long, default_value_t = 1000)]
    ticks:          Tick,

    /// Turn the admission generator on
    #[arg(short, long)]
    generate:       bool,

    /// Submit a process by name before the first tick (repeatable)
    #[arg(short, long)]
    process:        Vec<String>,

    /// Directory holding evicted footprints
    #[arg(short, long, default_value = "backing-store")]
    #[arg(value_parser = clap::value_parser!(PathBuf))]
    backing_store:  PathBuf,

    /// Seed for every random draw
    #[arg(short, long, default_value_t = 0)]
    seed:           u64,

    /// Print the final report as JSON
    #[arg(short, long)]
    json:           bool,
}

#[derive(Serialize)]
struct Report {
    tick:       Tick,
    processes:  ProcessListing,
    cpu:        CpuUtilization,
    vmstat:     VmStat,
    memory:     MemoryStats,
}

fn print_snapshot(s: &ProcessSnapshot) {
    let whereabouts = match (s.finished_at, s.core) {
        (Some(t), _)        => { format!("finished at {t}") },
        (None, Some(c))     => { format!("core {c}") },
        (None, None)        => { String::from("waiting") }
    };
    println!("  {:<12} {:>8} / {:<8} {}", s.name, s.current, s.total, whereabouts);
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Args::parse();
    let cfg = Config::load(&cli.config)?;
    let ctx = SimContext::new(&cli.backing_store, cli.seed);
    let sys = System::initialize(cfg, ctx)?;
    sys.boot();
    for name in &cli.process {
        sys.submit_process(name)?;
    }
    if cli.generate {
        sys.start_admission_generator();
    }
    for _ in 0..cli.ticks {
        if sys.step().is_none() {
            break;
        }
    }
    sys.stop_admission_generator();

    let report = Report {
        tick:       sys.current_tick(),
        processes:  sys.processes(),
        cpu:        sys.cpu_utilization(),
        vmstat:     sys.vmstat(),
        memory:     sys.memory_stats(),
    };
    sys.shutdown();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("Tick {}", report.tick);
    println!(
        "CPU utilization: {:.2}% ({} of {} cores used)",
        report.cpu.percent, report.cpu.cores_used, report.cpu.cores_total
    );
    println!("Running processes:");
    report.processes.running.iter().for_each(print_snapshot);
    println!("Waiting processes:");
    report.processes.waiting.iter().for_each(print_snapshot);
    println!("Finished processes:");
    report.processes.finished.iter().for_each(print_snapshot);
    let vm = &report.vmstat;
    println!("{:>12} B total memory", vm.total_memory);
    println!("{:>12} B used memory", vm.used_memory);
    println!("{:>12} B free memory", vm.free_memory);
    println!("{:>12} idle cpu ticks", vm.idle_ticks);
    println!("{:>12} active cpu ticks", vm.active_ticks);
    println!("{:>12} total cpu ticks", vm.total_ticks);
    println!("{:>12} pages paged in", vm.pages_in);
    println!("{:>12} pages paged out", vm.pages_out);

    Ok(())
}
