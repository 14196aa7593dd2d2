use super::{Frame, MemError, PhysMem};

/// Free-list allocator for physical frames above the kernel image.
///
/// A free frame stores the physical address of the next free frame in its
/// first word; 0 ends the list (frame 0 is never free).
pub struct FrameAllocator {
    head: Option<Frame>,
    free: usize,
}

impl FrameAllocator {
    /// Create an empty FrameAllocator.
    pub const fn new() -> Self {
        FrameAllocator { head: None, free: 0 }
    }

    /// Thread every frame in `[start, end)` onto the free list, lowest first.
    pub fn init(&mut self, phys: &mut PhysMem, start: usize, end: usize) {
        let first = Frame::containing_address(start);
        let last = Frame::containing_address(end);
        for number in (first.number()..last.number()).rev() {
            self.release_frame(phys, Frame::from_number(number));
        }
    }

    /// Hand out one frame; its contents are whatever was there before.
    pub fn allocate_frame(&mut self, phys: &mut PhysMem) -> Result<Frame, MemError> {
        let frame = self.head.ok_or(MemError::OutOfMemory)?;
        let next = phys.read_u32(frame.start_address());
        self.head = match next {
            0 => None,
            addr => Some(Frame::containing_address(addr as usize)),
        };
        self.free -= 1;
        Ok(frame)
    }

    /// Give a frame back. Releasing a frame twice corrupts the list.
    pub fn release_frame(&mut self, phys: &mut PhysMem, frame: Frame) {
        let next = self.head.map_or(0, |f| f.start_address() as u32);
        phys.write_u32(frame.start_address(), next);
        self.head = Some(frame);
        self.free += 1;
    }

    pub fn free_frames(&self) -> usize {
        self.free
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::PGSIZE;
    use alloc::collections::BTreeSet;

    fn allocator(frames: usize) -> (FrameAllocator, PhysMem) {
        let mut phys = PhysMem::new((frames + 4) * PGSIZE);
        let mut alloc = FrameAllocator::new();
        alloc.init(&mut phys, 4 * PGSIZE, (frames + 4) * PGSIZE);
        (alloc, phys)
    }

    #[test]
    fn exhausts_after_exactly_the_initial_count() {
        let (mut alloc, mut phys) = allocator(8);
        assert_eq!(alloc.free_frames(), 8);
        let mut seen = BTreeSet::new();
        for _ in 0..8 {
            let frame = alloc.allocate_frame(&mut phys).unwrap();
            assert!(seen.insert(frame), "frame {:?} handed out twice", frame);
        }
        assert_eq!(alloc.allocate_frame(&mut phys), Err(MemError::OutOfMemory));
        assert_eq!(alloc.allocate_frame(&mut phys), Err(MemError::OutOfMemory));
    }

    #[test]
    fn lowest_frame_comes_first() {
        let (mut alloc, mut phys) = allocator(3);
        let frame = alloc.allocate_frame(&mut phys).unwrap();
        assert_eq!(frame.start_address(), 4 * PGSIZE);
    }

    #[test]
    fn released_frame_is_reused_next() {
        let (mut alloc, mut phys) = allocator(4);
        let a = alloc.allocate_frame(&mut phys).unwrap();
        let _b = alloc.allocate_frame(&mut phys).unwrap();
        alloc.release_frame(&mut phys, a);
        assert_eq!(alloc.free_frames(), 3);
        assert_eq!(alloc.allocate_frame(&mut phys).unwrap(), a);
    }
}
