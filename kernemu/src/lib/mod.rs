//! Welcome to `kernemu`!
//!
//! A single-machine emulator of an operating system's process scheduler
//! and memory manager. Simulated time is a lockstep [`GlobalClock`]: each
//! tick the [`Scheduler`] reclaims and dispatches, every [`Core`] executes
//! one tick of work, and the admission generator may admit a process.
//!
//! The usual entry point is the [`System`] facade:
//!
//! ```no_run
//! use kernemu::*;
//!
//! let cfg = Config::load(Path::new("config.txt")).unwrap();
//! let ctx = SimContext::new(Path::new("backing-store"), 42);
//! let sys = System::initialize(cfg, ctx).unwrap();
//! sys.boot();
//! sys.submit_process("p1").unwrap();
//! for _ in 0..100 {
//!     sys.step();
//! }
//! println!("{:?}", sys.vmstat());
//! sys.shutdown();
//! ```

/// Imports, type aliases and the error taxonomy shared by
/// every other module.
pub mod utils;
pub mod context;
pub mod process;
pub mod queue;
pub mod memory;
pub mod backing;
pub mod clock;
pub mod cpu;
pub mod scheduler;
pub mod tester;
pub mod config;
pub mod system;

pub use crate::utils::*;
pub use crate::backing::BackingStore;
pub use crate::clock::{GlobalClock, Stage, Ticket};
pub use crate::config::{Config, SchedulerKind};
pub use crate::context::{SimContext, DEFAULT_CLOCK_MODULUS};
pub use crate::cpu::{Core, CoreState};
pub use crate::memory::{
    build_allocator,
    Allocator,
    Fit,
    FlatMemory,
    MemoryManager,
    MemoryStats,
    OccupiedRange,
    PagedMemory,
    Policy,
    Region,
    RegionHandle,
};
pub use crate::process::{Process, ProcessSnapshot, ProcessSpec, Registry};
pub use crate::queue::ReadyQueue;
pub use crate::scheduler::{Algorithm, PassReport, Scheduler};
pub use crate::system::{CpuUtilization, ProcessListing, System, VmStat};
pub use crate::tester::{AdmissionParams, Tester};
