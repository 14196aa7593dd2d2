use alloc::vec::Vec;
use core::fmt;

use super::context::{load_context, save_context};
use super::task::{Process, ProcessId, ProcessState, SemRef};
use crate::fs::FileRef;
use crate::memory::{Frame, MemError, Vm};

/// Slots in the process table. Slot 0 is the idle process.
pub const NR_PROC: usize = 64;

/// Recoverable process-table errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcError {
    NoFreeSlot,
    OutOfMemory,
    TableFull,
}

impl fmt::Display for ProcError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProcError::NoFreeSlot => write!(f, "Process table full"),
            ProcError::OutOfMemory => write!(f, "Out of memory"),
            ProcError::TableFull => write!(f, "Per-process table full"),
        }
    }
}

impl From<MemError> for ProcError {
    fn from(_: MemError) -> Self {
        ProcError::OutOfMemory
    }
}

/// Fixed array of PCBs plus the index of the running one.
///
/// Slots are never moved; a slot index stays valid for as long as the
/// process it names is not reaped.
pub struct ProcTable {
    slots: Vec<Process>,
    next_pid: u32,
    current: usize,
}

impl ProcTable {
    /// Slot 0 becomes the running idle process on `idle_stack`.
    pub fn new(idle_stack: Frame) -> Self {
        let mut slots: Vec<Process> = (0..NR_PROC).map(|_| Process::unused()).collect();
        slots[0].state = ProcessState::Running;
        slots[0].kstack = Some(idle_stack);
        ProcTable {
            slots,
            next_pid: 1,
            current: 0,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn set_current(&mut self, slot: usize) {
        self.current = slot;
    }

    pub fn get(&self, slot: usize) -> &Process {
        &self.slots[slot]
    }

    pub fn get_mut(&mut self, slot: usize) -> &mut Process {
        &mut self.slots[slot]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Process)> {
        self.slots.iter().enumerate()
    }

    pub fn find_pid(&self, pid: ProcessId) -> Option<usize> {
        self.slots
            .iter()
            .position(|p| p.state != ProcessState::Unused && p.pid == pid)
    }

    /// Kernel stack of an allocated slot.
    pub fn kstack(&self, slot: usize) -> Frame {
        match self.slots[slot].kstack {
            Some(frame) => frame,
            None => panic!("proc: slot {} has no kernel stack", slot),
        }
    }

    /// Claim an unused slot with a fresh pid, address space and kernel stack.
    pub fn allocate(&mut self, vm: &mut Vm) -> Result<usize, ProcError> {
        let slot = (1..NR_PROC)
            .find(|&i| self.slots[i].state == ProcessState::Unused)
            .ok_or(ProcError::NoFreeSlot)?;

        let pgdir = vm.create_address_space()?;
        let kstack = match vm.allocate_frame() {
            Ok(frame) => frame,
            Err(e) => {
                vm.destroy_address_space(pgdir);
                return Err(e.into());
            }
        };

        let pid = ProcessId(self.next_pid);
        self.next_pid += 1;

        let proc = &mut self.slots[slot];
        *proc = Process::unused();
        proc.pid = pid;
        proc.state = ProcessState::Uninit;
        proc.pgdir = Some(pgdir);
        proc.kstack = Some(kstack);
        Ok(slot)
    }

    /// Release the slot's address space and kernel stack, then mark it unused.
    pub fn free(&mut self, vm: &mut Vm, slot: usize) {
        assert_ne!(slot, 0, "proc: the idle process cannot be freed");
        let proc = &mut self.slots[slot];
        assert_ne!(proc.state, ProcessState::Running, "proc: freeing the running process");
        if let Some(space) = proc.pgdir.take() {
            vm.destroy_address_space(space);
        }
        if let Some(kstack) = proc.kstack.take() {
            vm.release_frame(kstack);
        }
        *proc = Process::unused();
    }

    /// Make `child` a copy of `parent`, whose address space must be active.
    ///
    /// The child's saved frame returns 0 from `fork`. Handles are shared,
    /// not copied.
    pub fn duplicate_into(&mut self, vm: &mut Vm, parent: usize, child: usize) -> Result<(), ProcError> {
        if let Some(dest) = self.slots[child].pgdir.as_ref() {
            vm.fork_copy(dest)?;
        }

        let mut ctx = load_context(&vm.phys, self.kstack(parent));
        ctx.eax = 0;
        save_context(&mut vm.phys, self.kstack(child), &ctx);

        let brk = self.slots[parent].brk;
        let files = self.slots[parent].files.clone();
        let usems = self.slots[parent].usems.clone();

        let proc = &mut self.slots[child];
        proc.brk = brk;
        proc.parent = Some(parent);
        proc.files = files;
        proc.usems = usems;
        self.slots[parent].child_num += 1;
        Ok(())
    }

    /// Turn `slot` into a zombie. Returns the parent slot if it was woken.
    ///
    /// Zombies nobody can reap (an orphan exiting, or zombie children of
    /// `slot`) give their memory back at once; only the slot stays taken.
    pub fn transition_to_zombie(&mut self, vm: &mut Vm, slot: usize, exit_code: i32) -> Option<usize> {
        let proc = &mut self.slots[slot];
        proc.state = ProcessState::Zombie;
        proc.exit_code = exit_code;
        proc.resume = None;
        proc.release_handles();
        let parent = proc.parent;

        // Orphans are never reaped.
        for child in 1..NR_PROC {
            if self.slots[child].parent != Some(slot) {
                continue;
            }
            self.slots[child].parent = None;
            if self.slots[child].state == ProcessState::Zombie {
                self.release_memory(vm, child);
            }
        }

        let Some(parent) = parent else {
            self.release_memory(vm, slot);
            return None;
        };
        let waiter = self.slots[parent].zombie_sem.v()?;
        self.wake(waiter);
        Some(waiter)
    }

    /// Drop the address space and kernel stack of a zombie, leaving its slot.
    fn release_memory(&mut self, vm: &mut Vm, slot: usize) {
        let proc = &mut self.slots[slot];
        if let Some(space) = proc.pgdir.take() {
            if vm.current_address_space() == space.root() {
                let root = vm.kernel_root();
                vm.switch_to(root);
            }
            vm.destroy_address_space(space);
        }
        if let Some(kstack) = proc.kstack.take() {
            vm.release_frame(kstack);
        }
    }

    pub fn find_zombie_child(&self, parent: usize) -> Option<usize> {
        (1..NR_PROC).find(|&i| {
            let p = &self.slots[i];
            p.state == ProcessState::Zombie && p.parent == Some(parent)
        })
    }

    /// BLOCKED -> READY. Anything else is left alone.
    pub fn wake(&mut self, slot: usize) {
        let proc = &mut self.slots[slot];
        if proc.state == ProcessState::Blocked {
            proc.state = ProcessState::Ready;
        }
    }

    // ── Per-process handle tables ──

    pub fn allocate_semaphore_slot(&mut self, slot: usize, sem: SemRef) -> Result<usize, ProcError> {
        let table = &mut self.slots[slot].usems;
        let id = table.iter().position(Option::is_none).ok_or(ProcError::TableFull)?;
        table[id] = Some(sem);
        Ok(id)
    }

    pub fn get_semaphore(&self, slot: usize, id: usize) -> Option<SemRef> {
        self.slots[slot].usems.get(id)?.clone()
    }

    pub fn release_semaphore_slot(&mut self, slot: usize, id: usize) -> Option<SemRef> {
        self.slots[slot].usems.get_mut(id)?.take()
    }

    pub fn allocate_file_slot(&mut self, slot: usize, file: FileRef) -> Result<usize, ProcError> {
        let table = &mut self.slots[slot].files;
        let fd = table.iter().position(Option::is_none).ok_or(ProcError::TableFull)?;
        table[fd] = Some(file);
        Ok(fd)
    }

    pub fn get_file(&self, slot: usize, fd: usize) -> Option<FileRef> {
        self.slots[slot].files.get(fd)?.clone()
    }

    pub fn release_file_slot(&mut self, slot: usize, fd: usize) -> Option<FileRef> {
        self.slots[slot].files.get_mut(fd)?.take()
    }
}
