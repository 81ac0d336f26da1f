use crate::utils::*;
use serde::Serialize;

/// The closed set of allocation policies. Chosen once, when the
/// system is initialized, and never changed afterwards.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Policy {
    FlatFirstFit,
    FlatBestFit,
    PagedFirstFit,
}

impl Policy {
    pub fn is_paged(&self) -> bool {
        if let Policy::PagedFirstFit = self { true } else { false }
    }
}

/// How a flat free list picks among the chunks large enough
/// for a request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Fit {
    /// Lowest address wins.
    First,
    /// Smallest size wins, ties broken by lowest address.
    Best,
}

/// Reclaimable chunks of a flat memory, keyed twice so that both
/// fits are logarithmic. Entries carry the arena slot of the chunk.
///
/// Keys embed the chunk's current start and size, so a chunk whose
/// geometry changes must be removed *before* the change and pushed
/// back after it.
pub struct FlatFreeList {
    fit:        Fit,
    // (start, size, slot)
    by_addr:    BTreeSet<(Bytes, Bytes, usize)>,
    // (size, start, slot)
    by_size:    BTreeSet<(Bytes, Bytes, usize)>,
}

impl FlatFreeList {
    pub fn new(fit: Fit) -> Self {
        Self {
            fit,
            by_addr:    BTreeSet::new(),
            by_size:    BTreeSet::new(),
        }
    }

    pub fn fit(&self) -> Fit {
        self.fit
    }

    pub fn push(&mut self, slot: usize, start: Bytes, size: Bytes) {
        assert!(self.by_addr.insert((start, size, slot)), "Chunk pushed twice!");
        self.by_size.insert((size, start, slot));
    }

    pub fn remove(&mut self, slot: usize, start: Bytes, size: Bytes) {
        assert!(self.by_addr.remove(&(start, size, slot)), "Chunk not in free list!");
        self.by_size.remove(&(size, start, slot));
    }

    /// Finds a chunk that can hold `size` bytes, without removing it.
    pub fn pick(&self, size: Bytes) -> Option<usize> {
        match self.fit {
            Fit::First  => {
                self.by_addr
                    .iter()
                    .find(|(_, s, _)| *s >= size)
                    .map(|(_, _, slot)| *slot)
            },
            Fit::Best   => {
                self.by_size
                    .range((size, 0, 0)..)
                    .next()
                    .map(|(_, _, slot)| *slot)
            }
        }
    }

    pub fn largest(&self) -> Bytes {
        match self.by_size.last() {
            Some((s, _, _)) => { *s },
            None            => { 0 }
        }
    }

    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }

    pub fn contains(&self, slot: usize) -> bool {
        self.by_addr.iter().any(|(_, _, s)| *s == slot)
    }
}

/// Free frames of a paged memory. All frames have the same size, so
/// any frame serves any request; we still hand out the lowest numbered
/// ones first to keep runs reproducible.
pub struct PagedFreeList {
    frames: BTreeSet<usize>,
}

impl PagedFreeList {
    pub fn new() -> Self {
        Self { frames: BTreeSet::new() }
    }

    pub fn push(&mut self, frame: usize) {
        assert!(self.frames.insert(frame), "Frame {frame} freed twice!");
    }

    pub fn pop(&mut self) -> Option<usize> {
        self.frames.pop_first()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn contains(&self, frame: usize) -> bool {
        self.frames.contains(&frame)
    }
}
