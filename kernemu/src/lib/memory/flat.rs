use crate::utils::*;
use super::{Allocator, Region, RegionHandle};
use super::freelist::{Fit, FlatFreeList, Policy};

/// A chunk record. Records live in an arena; `prev`/`next` are arena
/// slots and keep the chunks in address order.
#[derive(Clone, Debug)]
struct Chunk {
    region: Region,
    prev:   Option<usize>,
    next:   Option<usize>,
    // `false` once the record was merged away; its slot may be recycled.
    live:   bool,
}

/// Contiguous memory. Requests get exactly one chunk, carved out of the
/// low end of a free chunk picked by the free list. Freed chunks are
/// merged with any free neighbour on the spot, so two adjacent free
/// chunks never coexist.
pub struct FlatMemory {
    total:  Bytes,
    chunks: Vec<Chunk>,
    vacant: Vec<usize>,
    head:   usize,
    free:   FlatFreeList,
    used:   Bytes,
}

impl FlatMemory {
    pub fn new(total: Bytes, fit: Fit) -> Self {
        assert!(total > 0, "Memory of zero size.");
        let mut free = FlatFreeList::new(fit);
        free.push(0, 0, total);

        Self {
            total,
            chunks: vec![Chunk {
                region: Region::new(0, total),
                prev:   None,
                next:   None,
                live:   true,
            }],
            vacant: vec![],
            head:   0,
            free,
            used:   0,
        }
    }

    fn new_slot(&mut self, c: Chunk) -> usize {
        match self.vacant.pop() {
            Some(slot)  => {
                self.chunks[slot] = c;
                slot
            },
            None        => {
                self.chunks.push(c);
                self.chunks.len() - 1
            }
        }
    }

    fn vacate(&mut self, slot: usize) {
        let c = &mut self.chunks[slot];
        c.live = false;
        c.prev = None;
        c.next = None;
        self.vacant.push(slot);
    }

    /// Absorbs the free neighbour `other` into `slot`. `other` must be
    /// the immediate predecessor or successor of `slot`.
    fn absorb(&mut self, slot: usize, other: usize) {
        let o = self.chunks[other].clone();
        self.free.remove(other, o.region.start, o.region.size);
        if self.chunks[slot].prev == Some(other) {
            let c = &mut self.chunks[slot];
            c.region.start = o.region.start;
            c.region.size += o.region.size;
            c.prev = o.prev;
            match o.prev {
                Some(pp)    => { self.chunks[pp].next = Some(slot); },
                None        => { self.head = slot; }
            }
        } else {
            let c = &mut self.chunks[slot];
            c.region.size += o.region.size;
            c.next = o.next;
            if let Some(nn) = o.next {
                self.chunks[nn].prev = Some(slot);
            }
        }
        self.vacate(other);
    }

    fn is_free_chunk(&self, slot: Option<usize>) -> Option<usize> {
        match slot {
            Some(s) if !self.chunks[s].region.in_use    => { Some(s) },
            _                                           => { None }
        }
    }
}

impl Allocator for FlatMemory {
    fn policy(&self) -> Policy {
        match self.free.fit() {
            Fit::First  => { Policy::FlatFirstFit },
            Fit::Best   => { Policy::FlatBestFit }
        }
    }

    fn total(&self) -> Bytes {
        self.total
    }

    fn available(&self) -> Bytes {
        self.total - self.used
    }

    fn largest_free(&self) -> Bytes {
        self.free.largest()
    }

    fn can_fit(&self, size: Bytes) -> bool {
        self.free.pick(size).is_some()
    }

    fn allocate(&mut self, size: Bytes, owner: Pid) -> Result<(Vec<RegionHandle>, Bytes), AllocError> {
        if size == 0 {
            return Err(AllocError::Zero);
        }
        let slot = match self.free.pick(size) {
            Some(s) => { s },
            None    => {
                return Err(AllocError::Exhausted { size, largest: self.free.largest() });
            }
        };
        let (start, chunk_size, prev) = {
            let c = &self.chunks[slot];
            (c.region.start, c.region.size, c.prev)
        };
        self.free.remove(slot, start, chunk_size);
        self.used += size;

        if chunk_size == size {
            let r = &mut self.chunks[slot].region;
            r.in_use = true;
            r.owner = Some(owner);
            return Ok((vec![RegionHandle(slot)], size));
        }

        // Split: the request takes the low addresses, the remainder
        // keeps its slot and goes back to the free list.
        let mut taken = Region::new(start, size);
        taken.in_use = true;
        taken.owner = Some(owner);
        let new = self.new_slot(Chunk {
            region: taken,
            prev,
            next:   Some(slot),
            live:   true,
        });
        match prev {
            Some(p) => { self.chunks[p].next = Some(new); },
            None    => { self.head = new; }
        }
        {
            let rest = &mut self.chunks[slot];
            rest.region.start += size;
            rest.region.size -= size;
            rest.prev = Some(new);
        }
        self.free.push(slot, start + size, chunk_size - size);

        Ok((vec![RegionHandle(new)], size))
    }

    fn free(&mut self, h: RegionHandle) {
        let slot = h.0;
        match self.chunks.get(slot) {
            Some(c) if c.live && c.region.in_use    => {},
            _                                       => {
                warn!("Ignoring free of unknown or unused chunk {slot}");
                return;
            }
        }
        {
            let r = &mut self.chunks[slot].region;
            self.used -= r.size;
            r.in_use = false;
            r.owner = None;
        }
        if let Some(p) = self.is_free_chunk(self.chunks[slot].prev) {
            self.absorb(slot, p);
        }
        if let Some(n) = self.is_free_chunk(self.chunks[slot].next) {
            self.absorb(slot, n);
        }
        let r = &self.chunks[slot].region;
        let (start, size) = (r.start, r.size);
        self.free.push(slot, start, size);
    }

    fn regions(&self) -> Vec<Region> {
        let mut res = vec![];
        let mut runner = Some(self.head);
        while let Some(slot) = runner {
            let c = &self.chunks[slot];
            res.push(c.region.clone());
            runner = c.next;
        }

        res
    }

    fn units_for(&self, _bytes: Bytes) -> u64 {
        1
    }

    fn frame_size(&self) -> Option<Bytes> {
        None
    }

    fn external_fragmentation(&self) -> Bytes {
        // Free bytes sitting outside the largest hole cannot serve a
        // request of that size no matter how they are combined.
        self.available() - self.free.largest()
    }

    fn free_list_len(&self) -> usize {
        self.free.len()
    }
}
