use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use super::semaphore::Semaphore;
use crate::fs::FileRef;
use crate::memory::{AddressSpace, Frame};

/// Open files per process.
pub const NR_OFILE: usize = 16;
/// User semaphores per process.
pub const NR_USEM: usize = 32;

/// Unique process identifier. Pid 0 is the idle process; pids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

/// Process state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Unused,
    Uninit,
    Ready,
    Running,
    Blocked,
    Zombie,
}

/// Work a parked syscall still has to finish when its process runs again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// `wait`: collect a zombie child, storing its exit code at `status_ptr`.
    Reap { status_ptr: u32 },
    /// `sleep`: not worth running before the tick counter reaches `until`.
    Sleep { until: u64 },
}

/// A semaphore handle shared between the processes that inherited it.
pub type SemRef = Arc<Mutex<Semaphore>>;

/// A process control block. Lives in a fixed slot of the process table.
pub struct Process {
    pub pid: ProcessId,
    pub state: ProcessState,
    /// `None` runs on the kernel directory (the idle process).
    pub pgdir: Option<AddressSpace>,
    /// One page; the saved trap frame sits at its top.
    pub kstack: Option<Frame>,
    pub brk: usize,
    /// Slot of the parent, if it is still alive.
    pub parent: Option<usize>,
    pub child_num: usize,
    pub exit_code: i32,
    pub usems: Vec<Option<SemRef>>,
    pub files: Vec<Option<FileRef>>,
    /// Signalled once for every child that turns into a zombie.
    pub zombie_sem: Semaphore,
    pub resume: Option<Resume>,
}

impl Process {
    pub fn unused() -> Self {
        Process {
            pid: ProcessId(0),
            state: ProcessState::Unused,
            pgdir: None,
            kstack: None,
            brk: 0,
            parent: None,
            child_num: 0,
            exit_code: 0,
            usems: (0..NR_USEM).map(|_| None).collect(),
            files: (0..NR_OFILE).map(|_| None).collect(),
            zombie_sem: Semaphore::new(0),
            resume: None,
        }
    }

    /// Whether the scheduler may pick this process at tick `now`.
    pub fn is_runnable(&self, now: u64) -> bool {
        match (self.state, self.resume) {
            (ProcessState::Ready, Some(Resume::Sleep { until })) => now >= until,
            (ProcessState::Ready, _) => true,
            _ => false,
        }
    }

    /// Drop every file and semaphore handle; the last holder closes the object.
    pub fn release_handles(&mut self) {
        self.files.iter_mut().for_each(|f| *f = None);
        self.usems.iter_mut().for_each(|s| *s = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_slot_has_empty_tables() {
        let p = Process::unused();
        assert_eq!(p.state, ProcessState::Unused);
        assert_eq!(p.files.len(), NR_OFILE);
        assert_eq!(p.usems.len(), NR_USEM);
        assert!(p.files.iter().all(Option::is_none));
    }

    #[test]
    fn sleepers_wait_for_their_deadline() {
        let mut p = Process::unused();
        p.state = ProcessState::Ready;
        assert!(p.is_runnable(0));
        p.resume = Some(Resume::Sleep { until: 5 });
        assert!(!p.is_runnable(4));
        assert!(p.is_runnable(5));
        p.state = ProcessState::Blocked;
        assert!(!p.is_runnable(9));
    }
}
