/// Privilege level encoded in the low two bits of a selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeLevel {
    Ring0 = 0,
    Ring3 = 3,
}

/// Segment selector: GDT index plus requested privilege level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSelector(pub u16);

impl SegmentSelector {
    pub const fn new(index: u16, rpl: PrivilegeLevel) -> Self {
        SegmentSelector(index << 3 | rpl as u16)
    }

    pub const fn bits(self) -> u32 {
        self.0 as u32
    }
}

/// Flat 4 GiB segments: null, kernel code/data, user code/data.
pub const KERNEL_CODE: SegmentSelector = SegmentSelector::new(1, PrivilegeLevel::Ring0);
pub const KERNEL_DATA: SegmentSelector = SegmentSelector::new(2, PrivilegeLevel::Ring0);
pub const USER_CODE: SegmentSelector = SegmentSelector::new(3, PrivilegeLevel::Ring3);
pub const USER_DATA: SegmentSelector = SegmentSelector::new(4, PrivilegeLevel::Ring3);

/// The parts of the 32-bit TSS the CPU consults on a ring 3 -> ring 0 trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStateSegment {
    pub ss0: u32,
    pub esp0: u32,
}

impl TaskStateSegment {
    pub const fn new() -> Self {
        TaskStateSegment {
            ss0: KERNEL_DATA.bits(),
            esp0: 0,
        }
    }

    /// Point the trap-entry stack at the next process's kernel stack.
    pub fn set_esp0(&mut self, kernel_stack_top: u32) {
        self.esp0 = kernel_stack_top;
    }
}

impl Default for TaskStateSegment {
    fn default() -> Self {
        Self::new()
    }
}
