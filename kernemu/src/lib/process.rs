use crate::utils::*;
use crate::memory::RegionHandle;
use crate::context::SimContext;
use serde::Serialize;

/// Marks "no core" in [`Process::core`]. Kept as a signed sentinel so it
/// fits a single atomic.
const NO_CORE: i64 = -1;
/// Marks "not finished yet" in the finish stamp.
const NOT_FINISHED: u64 = u64::MAX;

/// What the user asks for when admitting a process by hand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessSpec {
    pub name:           String,
    pub instructions:   u64,
    pub memory:         Bytes,
}

impl ProcessSpec {
    pub fn new(name: &str, instructions: u64, memory: Bytes) -> Self {
        Self {
            name: String::from(name),
            instructions,
            memory,
        }
    }
}

/// The memory a process currently holds.
#[derive(Debug, Default)]
struct Residency {
    regions:    Vec<RegionHandle>,
    bytes:      Bytes,
}

/// One simulated job.
///
/// Identity fields are immutable after admission. Run state is shared
/// between the registry, the ready queue, at most one [`Core`](crate::cpu::Core)
/// and the memory manager, so it lives in atomics; only the list of held
/// regions needs a lock.
///
/// > `current_instruction` only ever moves forward by one, and
/// > `completed` flips to `true` exactly once, on the instruction that
/// > makes `current_instruction == total_instructions`.
#[derive(Debug)]
pub struct Process {
    pub id:                 Pid,
    pub name:               String,
    pub total_instructions: u64,
    pub memory_requirement: Bytes,
    pub created_at:         Tick,
    current:                AtomicU64,
    completed:              AtomicBool,
    core:                   AtomicI64,
    finished_at:            AtomicU64,
    residency:              Mutex<Residency>,
}

impl Process {
    pub fn new(id: Pid, spec: ProcessSpec, created_at: Tick) -> Self {
        Self {
            id,
            name:               spec.name,
            total_instructions: spec.instructions,
            memory_requirement: spec.memory,
            created_at,
            current:            AtomicU64::new(0),
            completed:          AtomicBool::new(false),
            core:               AtomicI64::new(NO_CORE),
            finished_at:        AtomicU64::new(NOT_FINISHED),
            residency:          Mutex::new(Residency::default()),
        }
    }

    #[inline]
    pub fn current_instruction(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Runs one instruction. Returns `true` only for the call that
    /// finishes the stream; calls past the end change nothing.
    pub fn execute_line(&self) -> bool {
        let total = self.total_instructions;
        let stepped = self.current.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
            if c < total { Some(c + 1) } else { None }
        });
        match stepped {
            Ok(prev)    => {
                if prev + 1 >= total {
                    self.completed
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                } else { false }
            },
            Err(_)      => { false }
        }
    }

    pub fn core(&self) -> Option<usize> {
        let c = self.core.load(Ordering::Acquire);
        if c == NO_CORE { None } else { Some(c as usize) }
    }

    pub fn set_core(&self, core: Option<usize>) {
        let v = match core {
            Some(c) => { c as i64 },
            None    => { NO_CORE }
        };
        self.core.store(v, Ordering::Release);
    }

    pub fn finished_at(&self) -> Option<Tick> {
        let t = self.finished_at.load(Ordering::Acquire);
        if t == NOT_FINISHED { None } else { Some(t) }
    }

    pub fn stamp_finished(&self, tick: Tick) {
        self.finished_at.store(tick, Ordering::Release);
    }

    //-----RESIDENCY (START)---------------------
    // Only the memory manager writes these, and it does so while
    // holding its own lock.
    pub fn holds_memory(&self) -> bool {
        !lock(&self.residency).regions.is_empty()
    }

    pub fn resident_bytes(&self) -> Bytes {
        lock(&self.residency).bytes
    }

    pub fn regions(&self) -> Vec<RegionHandle> {
        lock(&self.residency).regions.clone()
    }

    pub(crate) fn attach_regions(&self, regions: Vec<RegionHandle>, bytes: Bytes) {
        let mut r = lock(&self.residency);
        r.regions.extend(regions);
        r.bytes += bytes;
    }

    pub(crate) fn detach_regions(&self) -> Vec<RegionHandle> {
        let mut r = lock(&self.residency);
        r.bytes = 0;
        std::mem::take(&mut r.regions)
    }
    //-----RESIDENCY (END)---------------------

    pub fn snapshot(&self) -> ProcessSnapshot {
        ProcessSnapshot {
            id:             self.id,
            name:           self.name.clone(),
            current:        self.current_instruction(),
            total:          self.total_instructions,
            completed:      self.is_completed(),
            core:           self.core(),
            resident_bytes: self.resident_bytes(),
            created_at:     self.created_at,
            finished_at:    self.finished_at(),
        }
    }
}

/// A point-in-time copy of a process's run state, safe to hand
/// out while the simulation keeps running.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProcessSnapshot {
    pub id:             Pid,
    pub name:           String,
    pub current:        u64,
    pub total:          u64,
    pub completed:      bool,
    pub core:           Option<usize>,
    pub resident_bytes: Bytes,
    pub created_at:     Tick,
    pub finished_at:    Option<Tick>,
}

/// Every process ever admitted, in admission order. Names are unique.
///
/// Manual submission and the admission generator both go through here,
/// so the name check and the insertion happen under one lock.
#[derive(Default)]
pub struct Registry {
    table: Mutex<OrderedMap<String, Arc<Process>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits `spec` under its own name.
    pub fn admit(&self, ctx: &SimContext, spec: ProcessSpec, tick: Tick) -> Result<Arc<Process>, SystemError> {
        let mut table = lock(&self.table);
        if table.contains_key(&spec.name) {
            return Err(SystemError::DuplicateProcess(spec.name));
        }
        let p = Arc::new(Process::new(ctx.next_pid(), spec, tick));
        table.insert(p.name.clone(), p.clone());

        Ok(p)
    }

    /// Admits a process under the first free name `make_name` yields.
    /// `make_name` is called with 0, 1, 2, ... until a name is not taken;
    /// `make_spec` then fills in the rest.
    pub fn admit_fresh<N, S>(&self, ctx: &SimContext, mut make_name: N, make_spec: S, tick: Tick) -> Arc<Process>
    where
        N: FnMut() -> String,
        S: FnOnce(String) -> ProcessSpec,
    {
        let mut table = lock(&self.table);
        let mut name = make_name();
        while table.contains_key(&name) {
            name = make_name();
        }
        let p = Arc::new(Process::new(ctx.next_pid(), make_spec(name), tick));
        table.insert(p.name.clone(), p.clone());

        p
    }

    pub fn get(&self, name: &str) -> Option<Arc<Process>> {
        lock(&self.table).get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.table).contains_key(name)
    }

    /// All processes, in admission order.
    pub fn all(&self) -> Vec<Arc<Process>> {
        lock(&self.table).values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.table).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.table).is_empty()
    }
}
