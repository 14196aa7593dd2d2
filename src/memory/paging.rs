use alloc::vec::Vec;
use bit_field::BitField;
use bitflags::bitflags;

use super::{page_down, page_up, Frame, FrameAllocator, MemError, PhysMem, NR_PDE, NR_PTE, PGSIZE, PT_SIZE};
use crate::config::KernelConfig;

bitflags! {
    /// Permission bits of a directory or table entry.
    ///
    /// When passed to [`Vm::resolve_entry`], `PRESENT` also means "create the
    /// page table if it is missing".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER     = 1 << 2;
    }
}

/// One 32-bit directory or table entry: frame base in bits 12..32, flags below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry(u32);

impl PageTableEntry {
    pub const fn empty() -> Self {
        PageTableEntry(0)
    }

    pub fn new(frame: Frame, flags: PageFlags) -> Self {
        PageTableEntry(frame.start_address() as u32 | flags.bits())
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0.get_bits(0..12))
    }

    pub fn frame(self) -> Frame {
        Frame::from_number(self.0.get_bits(12..32))
    }

    pub fn is_present(self) -> bool {
        self.flags().contains(PageFlags::PRESENT)
    }

    /// Same frame, permissions widened by `flags`.
    pub fn widen(self, flags: PageFlags) -> Self {
        PageTableEntry(self.0 | flags.bits())
    }
}

fn dir_index(va: usize) -> usize {
    (va as u32).get_bits(22..32) as usize
}

fn table_index(va: usize) -> usize {
    (va as u32).get_bits(12..22) as usize
}

fn page_offset(va: usize) -> usize {
    (va as u32).get_bits(0..12) as usize
}

/// Physical address of a page-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySlot(usize);

/// The identity map of `[0, PHY_MEM)`: one directory used by the kernel
/// itself plus the page tables every address space points at.
///
/// Address spaces reference these tables; they never own them.
struct KernelRegion {
    dir: Frame,
    tables: Vec<Frame>,
}

impl KernelRegion {
    fn pde_count(&self) -> usize {
        self.tables.len()
    }
}

/// A per-process page directory and the user page tables hanging off it.
///
/// Not `Clone`: exactly one owner, consumed by [`Vm::destroy_address_space`].
#[derive(Debug, PartialEq, Eq)]
pub struct AddressSpace {
    dir: Frame,
}

impl AddressSpace {
    /// The value loaded into CR3 when this address space is active.
    pub fn root(&self) -> Frame {
        self.dir
    }
}

/// Physical memory, the frame allocator and the paging unit of the machine.
pub struct Vm {
    pub phys: PhysMem,
    pub frames: FrameAllocator,
    kernel: KernelRegion,
    cr3: Frame,
    layout: KernelConfig,
}

impl Vm {
    /// Build the kernel identity map and the free list.
    ///
    /// Frame 0 stays unmapped, frame 1 holds the kernel directory and the
    /// shared tables follow it. The page under `KER_MEM` is the idle stack.
    pub fn init(layout: KernelConfig) -> Self {
        if let Err(msg) = layout.validate() {
            crate::log_error!("paging: bad layout: {}", msg);
            panic!("{}", msg);
        }

        let mut phys = PhysMem::new(layout.phy_mem);
        let pde_count = layout.phy_mem / PT_SIZE;
        let dir = Frame::from_number(1);
        let tables: Vec<Frame> = (0..pde_count).map(|i| Frame::from_number(2 + i as u32)).collect();

        let kernel_flags = PageFlags::PRESENT | PageFlags::WRITABLE;
        for (i, table) in tables.iter().enumerate() {
            phys.write_u32(dir.start_address() + i * 4, PageTableEntry::new(*table, kernel_flags).bits());
            for j in 0..NR_PTE {
                let frame = Frame::from_number((i * NR_PTE + j) as u32);
                phys.write_u32(table.start_address() + j * 4, PageTableEntry::new(frame, kernel_flags).bits());
            }
        }
        // Null pointer guard.
        phys.write_u32(tables[0].start_address(), 0);

        let mut frames = FrameAllocator::new();
        frames.init(&mut phys, layout.ker_mem, layout.phy_mem);

        crate::log_info!(
            "paging: identity mapped {:#x} bytes with {} shared tables, {} free frames",
            layout.phy_mem,
            pde_count,
            frames.free_frames()
        );

        Vm {
            phys,
            frames,
            kernel: KernelRegion { dir, tables },
            cr3: dir,
            layout,
        }
    }

    pub fn layout(&self) -> &KernelConfig {
        &self.layout
    }

    /// Directory used when no process address space is loaded.
    pub fn kernel_root(&self) -> Frame {
        self.kernel.dir
    }

    /// Statically reserved kernel stack of the idle process.
    pub fn idle_stack(&self) -> Frame {
        Frame::containing_address(self.layout.ker_mem - PGSIZE)
    }

    pub fn allocate_frame(&mut self) -> Result<Frame, MemError> {
        self.frames.allocate_frame(&mut self.phys)
    }

    pub fn release_frame(&mut self, frame: Frame) {
        self.frames.release_frame(&mut self.phys, frame)
    }

    fn allocate_zeroed(&mut self) -> Result<Frame, MemError> {
        let frame = self.allocate_frame()?;
        self.phys.zero_frame(frame);
        Ok(frame)
    }

    pub fn entry(&self, slot: EntrySlot) -> PageTableEntry {
        PageTableEntry(self.phys.read_u32(slot.0))
    }

    pub fn set_entry(&mut self, slot: EntrySlot, entry: PageTableEntry) {
        self.phys.write_u32(slot.0, entry.bits())
    }

    fn dir_entry(&self, root: Frame, va: usize) -> EntrySlot {
        EntrySlot(root.start_address() + dir_index(va) * 4)
    }

    // ── Address spaces ──

    /// Fresh directory with only the shared kernel tables installed.
    pub fn create_address_space(&mut self) -> Result<AddressSpace, MemError> {
        let dir = self.allocate_zeroed()?;
        for i in 0..self.kernel.pde_count() {
            let pde = self.phys.read_u32(self.kernel.dir.start_address() + i * 4);
            self.phys.write_u32(dir.start_address() + i * 4, pde);
        }
        Ok(AddressSpace { dir })
    }

    /// Release every page and table this directory owns, then the directory.
    pub fn destroy_address_space(&mut self, space: AddressSpace) {
        debug_assert_ne!(self.cr3, space.dir, "destroying the active address space");
        for i in self.kernel.pde_count()..NR_PDE {
            let pde = PageTableEntry(self.phys.read_u32(space.dir.start_address() + i * 4));
            if !pde.is_present() {
                continue;
            }
            let table = pde.frame();
            for j in 0..NR_PTE {
                let pte = PageTableEntry(self.phys.read_u32(table.start_address() + j * 4));
                if pte.is_present() {
                    self.release_frame(pte.frame());
                }
            }
            self.release_frame(table);
        }
        self.release_frame(space.dir);
    }

    pub fn current_address_space(&self) -> Frame {
        self.cr3
    }

    /// Load CR3.
    pub fn switch_to(&mut self, root: Frame) {
        self.cr3 = root;
    }

    // ── Walks ──

    /// Slot of the entry mapping `va`, or `None` when its page table is absent.
    pub fn entry_slot(&self, root: Frame, va: usize) -> Option<EntrySlot> {
        let pde = self.entry(self.dir_entry(root, va));
        if !pde.is_present() {
            return None;
        }
        Some(EntrySlot(pde.frame().start_address() + table_index(va) * 4))
    }

    /// Slot of the entry mapping `va`.
    ///
    /// A missing page table is created only when `perm` has `PRESENT`; an
    /// existing directory entry has its permissions widened by `perm`.
    pub fn resolve_entry(
        &mut self,
        space: &AddressSpace,
        va: usize,
        perm: PageFlags,
    ) -> Result<Option<EntrySlot>, MemError> {
        if perm.contains(PageFlags::PRESENT) {
            return self.resolve_or_create(space.dir, va, perm).map(Some);
        }
        let pde_slot = self.dir_entry(space.dir, va);
        let pde = self.entry(pde_slot);
        if pde.is_present() {
            self.set_entry(pde_slot, pde.widen(perm));
        }
        Ok(self.entry_slot(space.dir, va))
    }

    fn resolve_or_create(&mut self, root: Frame, va: usize, perm: PageFlags) -> Result<EntrySlot, MemError> {
        let pde_slot = self.dir_entry(root, va);
        let pde = self.entry(pde_slot);
        let table = if pde.is_present() {
            self.set_entry(pde_slot, pde.widen(perm));
            pde.frame()
        } else {
            let table = self.allocate_zeroed()?;
            self.set_entry(pde_slot, PageTableEntry::new(table, perm | PageFlags::PRESENT));
            table
        };
        Ok(EntrySlot(table.start_address() + table_index(va) * 4))
    }

    /// Physical address of `va`; anything unmapped or under-privileged is a
    /// fatal page fault.
    pub fn translate(&self, root: Frame, va: usize, perm: PageFlags) -> usize {
        let entry = self.entry_slot(root, va).map(|slot| self.entry(slot));
        match entry {
            Some(pte) if pte.is_present() && pte.flags().contains(perm) => {
                pte.frame().start_address() | page_offset(va)
            }
            Some(pte) if pte.is_present() => crate::interrupts::page_fault(va, fault_code(true, perm)),
            _ => crate::interrupts::page_fault(va, fault_code(false, perm)),
        }
    }

    /// Back `va`'s page with a frame, allocating a zeroed one if needed.
    fn map_page(&mut self, root: Frame, va: usize, perm: PageFlags) -> Result<Frame, MemError> {
        let slot = self.resolve_or_create(root, va, perm)?;
        let entry = self.entry(slot);
        if entry.is_present() {
            self.set_entry(slot, entry.widen(perm));
            return Ok(entry.frame());
        }
        let frame = self.allocate_zeroed()?;
        self.set_entry(slot, PageTableEntry::new(frame, perm));
        Ok(frame)
    }

    /// Map `[page_down(va), page_up(va + len))`. Pages already mapped only
    /// gain permissions.
    pub fn map_range(&mut self, space: &AddressSpace, va: usize, len: usize, perm: PageFlags) -> Result<(), MemError> {
        let start = page_down(va);
        let end = page_up(va + len);
        assert!(start >= self.layout.phy_mem, "map_range into the identity region at {:#x}", start);
        let perm = perm | PageFlags::PRESENT;
        for page in (start..end).step_by(PGSIZE) {
            self.map_page(space.dir, page, perm)?;
        }
        Ok(())
    }

    /// Release and clear every mapped page of `[page_down(va), page_up(va + len))`.
    pub fn unmap_range(&mut self, space: &AddressSpace, va: usize, len: usize) {
        let start = page_down(va);
        let end = page_up(va + len);
        assert!(start >= self.layout.phy_mem, "unmap_range in the identity region at {:#x}", start);
        let mut page = start;
        while page < end {
            let Some(slot) = self.entry_slot(space.dir, page) else {
                // No table here: skip to the next directory entry.
                page = (page / PT_SIZE + 1) * PT_SIZE;
                continue;
            };
            let entry = self.entry(slot);
            if entry.is_present() {
                self.release_frame(entry.frame());
                self.set_entry(slot, PageTableEntry::empty());
            }
            page += PGSIZE;
        }
    }

    /// Copy every user page of the active address space into `dest`.
    pub fn fork_copy(&mut self, dest: &AddressSpace) -> Result<(), MemError> {
        let src = self.cr3;
        let first = self.layout.phy_mem / PT_SIZE;
        let last = self.layout.usr_mem / PT_SIZE;
        for d in first..last {
            let pde = self.entry(EntrySlot(src.start_address() + d * 4));
            if !pde.is_present() {
                continue;
            }
            for t in 0..NR_PTE {
                let pte = self.entry(EntrySlot(pde.frame().start_address() + t * 4));
                if !pte.is_present() {
                    continue;
                }
                let va = d * PT_SIZE + t * PGSIZE;
                let copy = self.map_page(dest.dir, va, pte.flags())?;
                self.phys.copy_frame(pte.frame(), copy);
            }
        }
        Ok(())
    }

    /// Number of user pages mapped below `USR_MEM`.
    pub fn resident_pages(&self, root: Frame) -> usize {
        let mut count = 0;
        for d in self.kernel.pde_count()..self.layout.usr_mem / PT_SIZE {
            let pde = self.entry(EntrySlot(root.start_address() + d * 4));
            if !pde.is_present() {
                continue;
            }
            count += (0..NR_PTE)
                .filter(|t| self.entry(EntrySlot(pde.frame().start_address() + t * 4)).is_present())
                .count();
        }
        count
    }

    // ── Byte access through an address space ──

    pub fn read_virt(&self, root: Frame, va: usize, buf: &mut [u8], perm: PageFlags) {
        let mut done = 0;
        while done < buf.len() {
            let addr = va + done;
            let chunk = (PGSIZE - page_offset(addr)).min(buf.len() - done);
            let pa = self.translate(root, addr, perm);
            buf[done..done + chunk].copy_from_slice(self.phys.slice(pa, chunk));
            done += chunk;
        }
    }

    pub fn write_virt(&mut self, root: Frame, va: usize, data: &[u8], perm: PageFlags) {
        let mut done = 0;
        while done < data.len() {
            let addr = va + done;
            let chunk = (PGSIZE - page_offset(addr)).min(data.len() - done);
            let pa = self.translate(root, addr, perm);
            self.phys.slice_mut(pa, chunk).copy_from_slice(&data[done..done + chunk]);
            done += chunk;
        }
    }

    pub fn read_u32_virt(&self, root: Frame, va: usize) -> u32 {
        let mut word = [0u8; 4];
        self.read_virt(root, va, &mut word, PageFlags::empty());
        u32::from_le_bytes(word)
    }

    /// NUL-terminated string at `va`, or `None` if longer than `max` bytes.
    pub fn read_cstr(&self, root: Frame, va: usize, max: usize) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        for i in 0..max {
            let pa = self.translate(root, va + i, PageFlags::empty());
            match self.phys.slice(pa, 1)[0] {
                0 => return Some(out),
                b => out.push(b),
            }
        }
        None
    }
}

/// x86 page-fault error code: bit 0 protection violation, bit 1 write, bit 2 user.
fn fault_code(present: bool, perm: PageFlags) -> u32 {
    let mut code: u32 = 0;
    code.set_bit(0, present);
    code.set_bit(1, perm.contains(PageFlags::WRITABLE));
    code.set_bit(2, perm.contains(PageFlags::USER));
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeSet;

    const RW_USER: PageFlags = PageFlags::WRITABLE.union(PageFlags::USER);

    fn vm() -> Vm {
        Vm::init(KernelConfig::default())
    }

    fn user_base(vm: &Vm) -> usize {
        vm.layout().phy_mem
    }

    #[test]
    fn identity_region_translates_to_itself() {
        let vm = vm();
        let root = vm.kernel_root();
        assert_eq!(vm.translate(root, 0x0012_3456, PageFlags::WRITABLE), 0x0012_3456);
        let space_root = vm.kernel_root();
        assert_eq!(vm.translate(space_root, vm.layout().phy_mem - 1, PageFlags::empty()), vm.layout().phy_mem - 1);
    }

    #[test]
    #[should_panic(expected = "page fault")]
    fn null_page_is_unmapped() {
        let vm = vm();
        vm.translate(vm.kernel_root(), 0x10, PageFlags::empty());
    }

    #[test]
    #[should_panic(expected = "page fault")]
    fn identity_region_is_not_user_accessible() {
        let mut vm = vm();
        let space = vm.create_address_space().unwrap();
        vm.translate(space.root(), 0x5000, PageFlags::USER);
    }

    #[test]
    fn mapped_pages_are_distinct() {
        let mut vm = vm();
        let space = vm.create_address_space().unwrap();
        let base = user_base(&vm) + 0x800;
        vm.map_range(&space, base, 5 * PGSIZE, RW_USER).unwrap();
        let mut seen = BTreeSet::new();
        for page in (page_down(base)..page_up(base + 5 * PGSIZE)).step_by(PGSIZE) {
            let pa = vm.translate(space.root(), page, RW_USER);
            assert!(pa < vm.layout().phy_mem && pa >= vm.layout().ker_mem);
            assert!(seen.insert(pa), "physical page {:#x} mapped twice", pa);
        }
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn remapping_only_widens_permissions() {
        let mut vm = vm();
        let space = vm.create_address_space().unwrap();
        let va = user_base(&vm);
        vm.map_range(&space, va, PGSIZE, PageFlags::USER).unwrap();
        let before = vm.translate(space.root(), va, PageFlags::USER);
        let free = vm.frames.free_frames();
        vm.map_range(&space, va, PGSIZE, RW_USER).unwrap();
        assert_eq!(vm.frames.free_frames(), free);
        assert_eq!(vm.translate(space.root(), va, RW_USER), before);
    }

    #[test]
    fn resolve_without_create_reports_missing_tables() {
        let mut vm = vm();
        let space = vm.create_address_space().unwrap();
        let va = user_base(&vm) + 3 * PT_SIZE;
        assert_eq!(vm.resolve_entry(&space, va, PageFlags::empty()), Ok(None));
        let free = vm.frames.free_frames();
        let slot = vm.resolve_entry(&space, va, PageFlags::PRESENT | PageFlags::USER).unwrap().unwrap();
        assert_eq!(vm.frames.free_frames(), free - 1);
        assert!(!vm.entry(slot).is_present());
        let pde = vm.entry(vm.dir_entry(space.root(), va));
        assert!(pde.flags().contains(PageFlags::USER));
        vm.resolve_entry(&space, va, PageFlags::WRITABLE).unwrap();
        let pde = vm.entry(vm.dir_entry(space.root(), va));
        assert!(pde.flags().contains(PageFlags::WRITABLE | PageFlags::USER));
    }

    #[test]
    fn unmap_releases_frames() {
        let mut vm = vm();
        let space = vm.create_address_space().unwrap();
        let va = user_base(&vm);
        vm.map_range(&space, va, 4 * PGSIZE, RW_USER).unwrap();
        let free = vm.frames.free_frames();
        vm.unmap_range(&space, va + PGSIZE, 2 * PGSIZE);
        assert_eq!(vm.frames.free_frames(), free + 2);
        assert_eq!(vm.resident_pages(space.root()), 2);
        assert!(!vm.entry(vm.entry_slot(space.root(), va + PGSIZE).unwrap()).is_present());
        // Ranges without page tables are skipped.
        vm.unmap_range(&space, va + 8 * PT_SIZE, 2 * PT_SIZE);
        assert_eq!(vm.frames.free_frames(), free + 2);
    }

    #[test]
    fn destroy_returns_every_owned_frame() {
        let mut vm = vm();
        let free = vm.frames.free_frames();
        let space = vm.create_address_space().unwrap();
        let va = user_base(&vm);
        vm.map_range(&space, va, 3 * PGSIZE, RW_USER).unwrap();
        vm.map_range(&space, va + 10 * PT_SIZE, PGSIZE, RW_USER).unwrap();
        vm.destroy_address_space(space);
        assert_eq!(vm.frames.free_frames(), free);
        // The shared tables are untouched.
        assert_eq!(vm.translate(vm.kernel_root(), 0x4000, PageFlags::WRITABLE), 0x4000);
    }

    #[test]
    fn fork_copy_duplicates_contents_into_fresh_frames() {
        let mut vm = vm();
        let parent = vm.create_address_space().unwrap();
        let child = vm.create_address_space().unwrap();
        let va = user_base(&vm) + 0x10;
        vm.map_range(&parent, va, 2 * PGSIZE, RW_USER).unwrap();
        vm.switch_to(parent.root());
        vm.write_virt(parent.root(), va, b"hello", RW_USER);

        vm.fork_copy(&child).unwrap();
        let mut buf = [0u8; 5];
        vm.read_virt(child.root(), va, &mut buf, RW_USER);
        assert_eq!(&buf, b"hello");
        assert_ne!(vm.translate(parent.root(), va, RW_USER), vm.translate(child.root(), va, RW_USER));

        vm.write_virt(child.root(), va, b"J", RW_USER);
        vm.read_virt(parent.root(), va, &mut buf, RW_USER);
        assert_eq!(&buf, b"hello");
        assert_eq!(vm.resident_pages(child.root()), 2);
    }

    #[test]
    fn map_range_reports_exhaustion() {
        let mut vm = Vm::init(KernelConfig::with_free_frames(3));
        let space = vm.create_address_space().unwrap();
        let va = vm.layout().phy_mem;
        // One table plus one page fit, the second page does not.
        assert_eq!(vm.map_range(&space, va, 2 * PGSIZE, RW_USER), Err(MemError::OutOfMemory));
        assert_eq!(vm.frames.free_frames(), 0);
    }

    #[test]
    fn cstr_reads_stop_at_nul() {
        let mut vm = vm();
        let space = vm.create_address_space().unwrap();
        let va = user_base(&vm) + PGSIZE - 3;
        vm.map_range(&space, va, 16, RW_USER).unwrap();
        vm.write_virt(space.root(), va, b"/bin/sh\0", PageFlags::empty());
        assert_eq!(vm.read_cstr(space.root(), va, 32).unwrap(), b"/bin/sh".to_vec());
        assert_eq!(vm.read_cstr(space.root(), va, 4), None);
    }
}
