//! Physical memory of the emulated machine.
//!
//! Two layers: an [`Allocator`] that only knows about address ranges
//! (flat chunks or paged frames), and the [`MemoryManager`] that ties
//! ranges to processes, keeps track of who is resident, and evicts to
//! the [`BackingStore`] when a request does not fit.

mod flat;
mod paged;
pub mod freelist;

use crate::utils::*;
use crate::process::Process;
use crate::backing::BackingStore;
use serde::Serialize;

pub use flat::FlatMemory;
pub use paged::PagedMemory;
pub use freelist::{Fit, Policy};

/// Opaque reference to a region. For flat memory it is an arena slot,
/// for paged memory a frame number. Only meaningful to the allocator
/// that produced it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct RegionHandle(pub usize);

/// A contiguous range `[start, start + size)` and its occupancy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Region {
    pub start:  Bytes,
    pub size:   Bytes,
    pub in_use: bool,
    pub owner:  Option<Pid>,
}

impl Region {
    pub fn new(start: Bytes, size: Bytes) -> Self {
        Self {
            start,
            size,
            in_use: false,
            owner:  None,
        }
    }

    /// One past the last byte.
    #[inline]
    pub fn end(&self) -> Bytes {
        self.start + self.size
    }
}

/// The contract every memory flavour satisfies. The set of implementors
/// is closed: [`FlatMemory`] (first- or best-fit) and [`PagedMemory`].
pub trait Allocator: Send {
    fn policy(&self) -> Policy;
    fn total(&self) -> Bytes;
    /// Bytes not held by anybody.
    fn available(&self) -> Bytes;
    /// The biggest single request that would succeed right now.
    fn largest_free(&self) -> Bytes;
    fn can_fit(&self, size: Bytes) -> bool;
    /// Returns the handles plus the number of bytes actually reserved,
    /// which exceeds `size` when the granularity is coarser.
    fn allocate(&mut self, size: Bytes, owner: Pid) -> Result<(Vec<RegionHandle>, Bytes), AllocError>;
    fn free(&mut self, h: RegionHandle);
    /// Every region, used or not, in address order.
    fn regions(&self) -> Vec<Region>;
    /// How many backing store units moving `bytes` amounts to.
    fn units_for(&self, bytes: Bytes) -> u64;
    fn frame_size(&self) -> Option<Bytes>;
    fn external_fragmentation(&self) -> Bytes;
    fn free_list_len(&self) -> usize;
}

/// Builds the allocator for `policy`. `frame_size` is ignored by the
/// flat flavours.
pub fn build_allocator(policy: Policy, total: Bytes, frame_size: Bytes) -> Box<dyn Allocator> {
    match policy {
        Policy::FlatFirstFit    => { Box::new(FlatMemory::new(total, Fit::First)) },
        Policy::FlatBestFit     => { Box::new(FlatMemory::new(total, Fit::Best)) },
        Policy::PagedFirstFit   => { Box::new(PagedMemory::new(total, frame_size)) }
    }
}

/// An occupied span, merged across neighbouring regions of the same
/// owner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OccupiedRange {
    pub start:  Bytes,
    pub end:    Bytes,
    pub owner:  Pid,
    pub name:   String,
}

#[derive(Clone, Debug, Serialize)]
pub struct MemoryStats {
    pub policy:                 Policy,
    pub total:                  Bytes,
    pub used:                   Bytes,
    pub free:                   Bytes,
    pub frame_size:             Option<Bytes>,
    /// Processes currently holding memory.
    pub resident:               usize,
    pub external_fragmentation: Bytes,
    /// Reserved minus requested, summed over resident processes.
    pub internal_fragmentation: Bytes,
    /// Occupied ranges in ascending address order.
    pub occupied:               Vec<OccupiedRange>,
    /// The raw tiling, in address order.
    pub regions:                Vec<Region>,
    pub free_list_len:          usize,
    pub pages_in:               u64,
    pub pages_out:              u64,
}

struct Books {
    alloc:      Box<dyn Allocator>,
    // Resident processes and the size each one asked for.
    resident:   OrderedMap<Pid, (Arc<Process>, Bytes)>,
}

/// Owns the memory of the machine.
///
/// Every operation runs under one lock, so the residency registry and
/// the allocator's view never disagree. The scheduler serializes its
/// reserve-then-allocate sequences on top of this with a lock of its
/// own.
pub struct MemoryManager {
    books:  Mutex<Books>,
    store:  BackingStore,
}

impl MemoryManager {
    pub fn new(alloc: Box<dyn Allocator>, store: BackingStore) -> Self {
        info!(
            "Memory up: {:?}, {} bytes, frame {:?}",
            alloc.policy(),
            alloc.total(),
            alloc.frame_size()
        );

        Self {
            books:  Mutex::new(Books {
                alloc,
                resident:   IndexMap::default(),
            }),
            store,
        }
    }

    pub fn backing(&self) -> &BackingStore {
        &self.store
    }

    pub fn total(&self) -> Bytes {
        lock(&self.books).alloc.total()
    }

    pub fn available(&self) -> Bytes {
        lock(&self.books).alloc.available()
    }

    pub fn can_fit(&self, size: Bytes) -> bool {
        lock(&self.books).alloc.can_fit(size)
    }

    pub fn is_resident(&self, pid: Pid) -> bool {
        lock(&self.books).resident.contains_key(&pid)
    }

    /// Gives `p` room for `size` bytes. On success the handles are
    /// recorded on `p` and `p` becomes resident; returns the bytes
    /// actually reserved.
    pub fn allocate(&self, size: Bytes, p: &Arc<Process>) -> Result<Bytes, AllocError> {
        let mut books = lock(&self.books);
        let (handles, got) = books.alloc.allocate(size, p.id)?;
        p.attach_regions(handles, got);
        let requested = match books.resident.get(&p.id) {
            Some((_, r))    => { r + size },
            None            => { size }
        };
        books.resident.insert(p.id, (p.clone(), requested));
        trace!("Allocated {got} bytes to {}", p.name);

        Ok(got)
    }

    /// Frees a single region. Does not touch residency books; callers
    /// that own a process should go through [`MemoryManager::release`].
    pub fn free(&self, h: RegionHandle) {
        lock(&self.books).alloc.free(h);
    }

    /// Returns everything `p` holds. Returns the number of bytes freed.
    pub fn release(&self, p: &Arc<Process>) -> Bytes {
        let mut books = lock(&self.books);
        Self::release_locked(&mut books, p)
    }

    fn release_locked(books: &mut Books, p: &Arc<Process>) -> Bytes {
        let bytes = p.resident_bytes();
        for h in p.detach_regions() {
            books.alloc.free(h);
        }
        books.resident.shift_remove(&p.id);

        bytes
    }

    /// Makes room for `size` bytes on behalf of `ctx`.
    ///
    /// Evicts resident processes, oldest first, until the request fits.
    /// A process is evictable only while it waits: not `ctx`, not on a
    /// core, not completed. If evicting every candidate still would not
    /// make the request fit, nobody is evicted. An eviction writes the
    /// victim's footprint to the backing store, frees its regions and
    /// drops it from the residency books; the victim stays queued and asks
    /// again when its turn comes.
    ///
    /// Returns the number of processes evicted.
    pub fn reserve(&self, size: Bytes, ctx: &Arc<Process>) -> usize {
        let mut books = lock(&self.books);
        if books.alloc.can_fit(size) {
            return 0;
        }
        let candidates = books.resident
            .values()
            .filter(|(c, _)| c.id != ctx.id && c.core().is_none() && !c.is_completed())
            .sorted_by_key(|(c, _)| c.id)
            .map(|(c, r)| (c.clone(), *r))
            .collect::<Vec<_>>();
        let gone = candidates.iter().map(|(c, _)| c.id).collect::<Vec<_>>();
        if !Self::fits_without(books.alloc.as_ref(), &gone, size) {
            trace!("No eviction can make room for {} ({size} bytes)", ctx.name);
            return 0;
        }
        let mut evicted = 0;
        for (victim, requested) in candidates {
            if books.alloc.can_fit(size) {
                break;
            }
            let units = books.alloc.units_for(victim.resident_bytes());
            match self.store.store(&victim.name, requested, units) {
                Ok(_)   => {
                    Self::release_locked(&mut books, &victim);
                    evicted += 1;
                    debug!("Evicted {} to make room for {}", victim.name, ctx.name);
                },
                Err(e)  => { warn!("Eviction of {} skipped: {e}", victim.name); }
            }
        }

        evicted
    }

    /// Would `size` fit if every process in `gone` let go of its memory?
    fn fits_without(alloc: &dyn Allocator, gone: &[Pid], size: Bytes) -> bool {
        let freed = |r: &Region| !r.in_use || r.owner.is_some_and(|o| gone.contains(&o));
        let regions = alloc.regions();
        match alloc.frame_size() {
            Some(frame) => {
                let free: Bytes = regions.iter().filter(|r| freed(r)).map(|r| r.size).sum();
                free >= alloc.units_for(size) * frame
            },
            // Flat memory needs one hole, and freed neighbours merge.
            None        => {
                let (mut run, mut best) = (0, 0);
                for r in &regions {
                    if freed(r) {
                        run += r.size;
                        best = best.max(run);
                    } else {
                        run = 0;
                    }
                }
                best >= size
            }
        }
    }

    /// Consumes `p`'s backing store entry, if any, counting the page-in.
    pub fn page_in(&self, p: &Process) -> Bytes {
        let books = lock(&self.books);
        let units = books.alloc.units_for(p.resident_bytes());
        self.store.retrieve(&p.name, units)
    }

    pub fn stats(&self) -> MemoryStats {
        let books = lock(&self.books);
        let regions = books.alloc.regions();
        let mut occupied: Vec<OccupiedRange> = vec![];
        for r in regions.iter().filter(|r| r.in_use) {
            let owner = match r.owner {
                Some(o) => { o },
                None    => { continue; }
            };
            match occupied.last_mut() {
                Some(last) if last.owner == owner && last.end == r.start    => {
                    last.end = r.end();
                },
                _                                                           => {
                    let name = match books.resident.get(&owner) {
                        Some((p, _))    => { p.name.clone() },
                        None            => { format!("pid{owner}") }
                    };
                    occupied.push(OccupiedRange {
                        start:  r.start,
                        end:    r.end(),
                        owner,
                        name,
                    });
                }
            }
        }
        let internal: Bytes = books.resident
            .values()
            .map(|(p, req)| p.resident_bytes().saturating_sub(*req))
            .sum();
        let total = books.alloc.total();
        let free = books.alloc.available();

        MemoryStats {
            policy:                 books.alloc.policy(),
            total,
            used:                   total - free,
            free,
            frame_size:             books.alloc.frame_size(),
            resident:               books.resident.len(),
            external_fragmentation: books.alloc.external_fragmentation(),
            internal_fragmentation: internal,
            occupied,
            regions,
            free_list_len:          books.alloc.free_list_len(),
            pages_in:               self.store.pages_in(),
            pages_out:              self.store.pages_out(),
        }
    }

    /// Resident processes in ascending id order.
    pub fn resident(&self) -> Vec<Arc<Process>> {
        lock(&self.books).resident
            .values()
            .map(|(p, _)| p.clone())
            .sorted_by_key(|p| p.id)
            .collect()
    }
}
