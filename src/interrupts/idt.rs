use crate::log_error;

pub const PIC_1_OFFSET: u8 = 32;

/// Vectors the kernel installs handlers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InterruptIndex {
    PageFault = 14,
    Timer = PIC_1_OFFSET,
    Syscall = 0x80,
    /// Raised by the kernel itself to re-enter the scheduler.
    Schedule = 0x81,
}

impl InterruptIndex {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_u32(self) -> u32 {
        u32::from(self.as_u8())
    }

    /// Look up the handler for a trapped vector.
    pub fn from_vector(vector: u32) -> Option<Self> {
        match vector {
            14 => Some(InterruptIndex::PageFault),
            32 => Some(InterruptIndex::Timer),
            0x80 => Some(InterruptIndex::Syscall),
            0x81 => Some(InterruptIndex::Schedule),
            _ => None,
        }
    }
}

/// There is no demand paging: every fault kills the kernel.
pub fn page_fault(addr: usize, errcode: u32) -> ! {
    log_error!("EXCEPTION: PAGE FAULT");
    log_error!("Accessed Address: {:#x}", addr);
    log_error!("Error Code: {:#b}", errcode);
    panic!("page fault @ {:#x}, errcode = {}", addr, errcode);
}

/// A fault trapped without its linear address: only the faulting eip is known.
pub fn page_fault_at(eip: u32, errcode: u32) -> ! {
    log_error!("EXCEPTION: PAGE FAULT");
    log_error!("Faulting eip: {:#x}", eip);
    log_error!("Error Code: {:#b}", errcode);
    panic!("page fault at eip {:#x}, errcode = {}", eip, errcode);
}

pub fn unexpected_trap(vector: u32, eip: u32) -> ! {
    log_error!("EXCEPTION: unexpected trap {} at eip {:#x}", vector, eip);
    panic!("unexpected trap {} at eip {:#x}", vector, eip);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vectors_round_trip() {
        for index in [
            InterruptIndex::PageFault,
            InterruptIndex::Timer,
            InterruptIndex::Syscall,
            InterruptIndex::Schedule,
        ] {
            assert_eq!(InterruptIndex::from_vector(index.as_u32()), Some(index));
        }
        assert_eq!(InterruptIndex::from_vector(33), None);
    }

    #[test]
    #[should_panic(expected = "page fault @ 0xdead000")]
    fn page_faults_are_fatal() {
        page_fault(0xdead000, 0b110);
    }

    #[test]
    #[should_panic(expected = "page fault at eip 0x1000, errcode = 5")]
    fn trapped_faults_report_the_eip() {
        page_fault_at(0x1000, 0b101);
    }
}
