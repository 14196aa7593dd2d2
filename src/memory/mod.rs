pub mod paging;
pub mod frame_allocator;

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

pub use frame_allocator::FrameAllocator;
pub use paging::{AddressSpace, EntrySlot, PageFlags, PageTableEntry, Vm};

/// Bytes per page and per frame.
pub const PGSIZE: usize = 4096;
/// Entries in a page directory.
pub const NR_PDE: usize = 1024;
/// Entries in a page table.
pub const NR_PTE: usize = 1024;
/// Bytes of virtual memory covered by one page table.
pub const PT_SIZE: usize = PGSIZE * NR_PTE;

pub const fn page_down(addr: usize) -> usize {
    addr & !(PGSIZE - 1)
}

pub const fn page_up(addr: usize) -> usize {
    (addr + PGSIZE - 1) & !(PGSIZE - 1)
}

/// A physical frame, named by its frame number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Frame(u32);

impl Frame {
    pub const fn from_number(number: u32) -> Self {
        Frame(number)
    }

    pub const fn containing_address(addr: usize) -> Self {
        Frame((addr / PGSIZE) as u32)
    }

    pub const fn number(self) -> u32 {
        self.0
    }

    pub const fn start_address(self) -> usize {
        self.0 as usize * PGSIZE
    }
}

/// Recoverable memory errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    OutOfMemory,
}

impl fmt::Display for MemError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MemError::OutOfMemory => write!(f, "Out of physical frames"),
        }
    }
}

/// Physical memory of the simulated machine.
///
/// Everything below `PHY_MEM` is identity mapped, so the kernel reaches any
/// frame (page tables included) through a physical address.
pub struct PhysMem {
    bytes: Vec<u8>,
}

impl PhysMem {
    pub fn new(size: usize) -> Self {
        PhysMem { bytes: vec![0u8; size] }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn read_u32(&self, addr: usize) -> u32 {
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.bytes[addr..addr + 4]);
        u32::from_le_bytes(word)
    }

    pub fn write_u32(&mut self, addr: usize, value: u32) {
        self.bytes[addr..addr + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn slice(&self, addr: usize, len: usize) -> &[u8] {
        &self.bytes[addr..addr + len]
    }

    pub fn slice_mut(&mut self, addr: usize, len: usize) -> &mut [u8] {
        &mut self.bytes[addr..addr + len]
    }

    pub fn zero_frame(&mut self, frame: Frame) {
        self.slice_mut(frame.start_address(), PGSIZE).fill(0);
    }

    pub fn copy_frame(&mut self, src: Frame, dst: Frame) {
        let from = src.start_address();
        self.bytes.copy_within(from..from + PGSIZE, dst.start_address());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_rounding() {
        assert_eq!(page_down(0x1234), 0x1000);
        assert_eq!(page_up(0x1234), 0x2000);
        assert_eq!(page_up(0x2000), 0x2000);
    }

    #[test]
    fn words_are_little_endian() {
        let mut phys = PhysMem::new(2 * PGSIZE);
        phys.write_u32(8, 0x1122_3344);
        assert_eq!(phys.slice(8, 4), &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(phys.read_u32(8), 0x1122_3344);
    }

    #[test]
    fn frame_copy_moves_a_whole_page() {
        let mut phys = PhysMem::new(3 * PGSIZE);
        phys.slice_mut(PGSIZE, PGSIZE).fill(0xAB);
        phys.copy_frame(Frame::from_number(1), Frame::from_number(2));
        assert!(phys.slice(2 * PGSIZE, PGSIZE).iter().all(|&b| b == 0xAB));
        phys.zero_frame(Frame::from_number(2));
        assert!(phys.slice(2 * PGSIZE, PGSIZE).iter().all(|&b| b == 0));
    }
}
