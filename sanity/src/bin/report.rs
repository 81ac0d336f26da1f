use sanity::*;
use clap::Parser;

/// An utility for checking emulator runs
/// against their invariants, tick by tick.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Arg {
    /// Path to the configuration file
    #[arg(short, long, value_parser = clap::value_parser!(PathBuf))]
    config:         PathBuf,

    /// How many ticks to simulate
    #[arg(short, long, default_value_t = 1000)]
    ticks:          Tick,

    /// Processes submitted by hand before the first tick
    #[arg(short, long, default_value_t = 0)]
    processes:      usize,

    /// Seed for every random draw (random if absent)
    #[arg(short, long)]
    seed:           Option<u64>,

    /// Directory holding evicted footprints
    #[arg(short, long, default_value = "backing-store")]
    #[arg(value_parser = clap::value_parser!(PathBuf))]
    backing_store:  PathBuf,

    /// Print the report as JSON
    #[arg(short, long)]
    json:           bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Arg::parse();
    let cfg = Config::load(&cli.config)?;
    let seed = cli.seed.unwrap_or_else(rand::random);
    let sys = System::initialize(cfg, SimContext::new(&cli.backing_store, seed))?;
    sys.boot();
    for i in 0..cli.processes {
        sys.submit_process(&format!("manual{i}"))?;
    }
    sys.start_admission_generator();
    let mut monitor = Monitor::new();
    for _ in 0..cli.ticks {
        monitor.observe(&sys)?;
        if sys.step().is_none() {
            break;
        }
    }
    sys.stop_admission_generator();
    monitor.observe(&sys)?;
    let report = monitor.report(&sys);
    sys.shutdown();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("Seed:\t\t\t{seed}");
    println!("Ticks:\t\t\t{}", report.ticks);
    println!("Policy:\t\t\t{:?}", report.policy);
    println!("Processes:\t\t{} ({} finished)", report.processes, report.finished);
    println!("CPU utilization:\t{:.2}%", report.cpu_utilization);
    println!(
        "Peak memory:\t\t{} of {} bytes ({:.2}%)",
        report.peak_used,
        report.total_memory,
        report.peak_used as f64 / report.total_memory as f64 * 100.0
    );
    println!("Peak fragmentation:\t{} external, {} internal", report.peak_external_frag, report.peak_internal_frag);
    println!("Paging:\t\t\t{} in, {} out", report.pages_in, report.pages_out);
    println!("Mean turnaround:\t{:.2} ticks", report.mean_turnaround);

    Ok(())
}
