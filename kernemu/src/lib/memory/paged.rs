use crate::utils::*;
use super::{Allocator, Region, RegionHandle};
use super::freelist::{PagedFreeList, Policy};

#[derive(Clone, Copy, Debug, Default)]
struct Frame {
    in_use: bool,
    owner:  Option<Pid>,
}

/// Memory cut into equally sized frames. A request of `n` bytes gets
/// `ceil(n / frame_size)` frames, anywhere. Frames never need merging.
pub struct PagedMemory {
    frame_size: Bytes,
    frames:     Vec<Frame>,
    free:       PagedFreeList,
}

impl PagedMemory {
    pub fn new(total: Bytes, frame_size: Bytes) -> Self {
        assert!(frame_size > 0 && total >= frame_size, "Bad paging geometry.");
        let count = (total / frame_size) as usize;
        let mut free = PagedFreeList::new();
        for f in 0..count {
            free.push(f);
        }

        Self {
            frame_size,
            frames: vec![Frame::default(); count],
            free,
        }
    }

    #[inline]
    fn frames_for(&self, size: Bytes) -> usize {
        size.div_ceil(self.frame_size) as usize
    }
}

impl Allocator for PagedMemory {
    fn policy(&self) -> Policy {
        Policy::PagedFirstFit
    }

    fn total(&self) -> Bytes {
        self.frames.len() as Bytes * self.frame_size
    }

    fn available(&self) -> Bytes {
        self.free.len() as Bytes * self.frame_size
    }

    fn largest_free(&self) -> Bytes {
        self.available()
    }

    fn can_fit(&self, size: Bytes) -> bool {
        self.frames_for(size) <= self.free.len()
    }

    fn allocate(&mut self, size: Bytes, owner: Pid) -> Result<(Vec<RegionHandle>, Bytes), AllocError> {
        if size == 0 {
            return Err(AllocError::Zero);
        }
        let need = self.frames_for(size);
        // All or nothing: frames are only taken once we know
        // the whole request is coverable.
        if need > self.free.len() {
            return Err(AllocError::Exhausted { size, largest: self.available() });
        }
        let mut res = Vec::with_capacity(need);
        while res.len() < need {
            match self.free.pop() {
                Some(f) => {
                    self.frames[f] = Frame { in_use: true, owner: Some(owner) };
                    res.push(RegionHandle(f));
                },
                None    => { unreachable!("Free frame count lied."); }
            }
        }

        Ok((res, need as Bytes * self.frame_size))
    }

    fn free(&mut self, h: RegionHandle) {
        let f = h.0;
        match self.frames.get(f) {
            Some(fr) if fr.in_use   => {},
            _                       => {
                warn!("Ignoring free of unknown or unused frame {f}");
                return;
            }
        }
        self.frames[f] = Frame::default();
        self.free.push(f);
    }

    fn regions(&self) -> Vec<Region> {
        self.frames
            .iter()
            .enumerate()
            .map(|(i, fr)| Region {
                start:  i as Bytes * self.frame_size,
                size:   self.frame_size,
                in_use: fr.in_use,
                owner:  fr.owner,
            })
            .collect()
    }

    fn units_for(&self, bytes: Bytes) -> u64 {
        self.frames_for(bytes) as u64
    }

    fn frame_size(&self) -> Option<Bytes> {
        Some(self.frame_size)
    }

    fn external_fragmentation(&self) -> Bytes {
        // Any free frame serves any request.
        0
    }

    fn free_list_len(&self) -> usize {
        self.free.len()
    }
}
