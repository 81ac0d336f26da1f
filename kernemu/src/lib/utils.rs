pub use std::{
    sync::{Arc, Mutex, MutexGuard, Condvar},
    sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering},
    collections::{BTreeSet, VecDeque},
    path::{Path, PathBuf},
    thread::{self, JoinHandle},
    time::Duration,
    hash::BuildHasherDefault,
};
pub use thiserror::Error;
pub use itertools::Itertools;
pub use indexmap::IndexMap;
pub use ahash::AHasher;
pub use log::{debug, info, trace, warn};

/// The unit for measuring memory. Sizes, addresses and
/// frame-granular quantities all share it.
pub type Bytes = u64;

/// The unit for measuring simulated time. One tick is one full
/// Schedule/Execute/Admit round of the [`GlobalClock`](crate::clock::GlobalClock).
pub type Tick = u64;

/// Process identifiers are handed out by the simulation
/// context and never reused.
pub type Pid = u32;

/// Insertion-ordered map with a fast hasher. Used wherever iteration
/// order carries meaning (creation order of processes, residency).
pub type OrderedMap<K, V> = IndexMap<K, V, BuildHasherDefault<AHasher>>;

/// Largest value most numeric configuration keys may take.
pub const CONFIG_LIMIT: u64 = 1 << 32;

/// Locks a mutex, recovering the data if a panicking thread poisoned it.
/// Simulation state stays usable for inspection after a worker died.
#[inline]
pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g)   => { g },
        Err(p)  => { p.into_inner() }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// Appears while reading a configuration. Carries the 1-based
/// line at which reading stopped.
#[error("Invalid config file at line {line}: {kind}")]
pub struct ConfigError {
    pub line: usize,
    pub kind: ConfigErrorKind,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigErrorKind {
    #[error("expected `key value`, got {0:?}")]
    Malformed(String),
    #[error("unknown key {0:?}")]
    UnknownKey(String),
    #[error("key {0:?} appears out of order")]
    OutOfOrder(String),
    #[error("missing key {0:?}")]
    Missing(&'static str),
    #[error("could not convert {value:?} for {key}")]
    NotANumber { key: &'static str, value: String },
    #[error("{value} is not valid for {key}, must be in {range}")]
    OutOfRange { key: &'static str, value: String, range: &'static str },
    #[error("{0}")]
    Inconsistent(String),
    #[error("could not read config: {0}")]
    Io(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// A memory request that could not be honoured. Always
/// recoverable: the requester stays queued and retries.
pub enum AllocError {
    #[error("no room for {size} bytes (largest placeable: {largest})")]
    Exhausted { size: Bytes, largest: Bytes },
    #[error("zero-sized request")]
    Zero,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("process {0} is already in the backing store")]
    AlreadyStored(String),
    #[error("backing store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
/// Errors reported to callers of [`System`](crate::system::System).
pub enum SystemError {
    #[error("Process {0} already exists.")]
    DuplicateProcess(String),
    #[error("Process {0} not found.")]
    ProcessNotFound(String),
    #[error("Process {name} rejected: {reason}")]
    InvalidProcess { name: String, reason: String },
    #[error("Clock modulus {0} is too small, it must be at least 2.")]
    ClockModulus(Tick),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
