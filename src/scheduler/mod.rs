pub mod context;
pub mod semaphore;
pub mod table;
pub mod task;

pub use context::Context;
pub use table::{ProcError, ProcTable, NR_PROC};
pub use task::{Process, ProcessId, ProcessState, Resume};

use context::{load_context, stack_top};
use crate::Kernel;

impl Kernel {
    /// Give up the CPU: the running process stays READY and the scheduler
    /// runs on the way out of the current trap.
    pub fn yield_current(&mut self) {
        let slot = self.procs.current();
        self.procs.get_mut(slot).state = ProcessState::Ready;
        self.need_resched = true;
    }

    /// Park the running process until something wakes it.
    pub fn block_current(&mut self) {
        let slot = self.procs.current();
        assert_ne!(slot, 0, "scheduler: the idle process cannot block");
        self.procs.get_mut(slot).state = ProcessState::Blocked;
        self.need_resched = true;
    }

    /// Pick the next process and switch to it.
    ///
    /// The outgoing frame is already on its kernel stack (trap entry put it
    /// there). The scan starts after the current slot and wraps around to
    /// it; when nothing is runnable the idle process spins until the next
    /// trap.
    pub fn schedule(&mut self) {
        let prev = self.procs.current();
        if self.procs.get(prev).state == ProcessState::Running {
            self.procs.get_mut(prev).state = ProcessState::Ready;
        }
        let next = (1..=NR_PROC)
            .map(|i| (prev + i) % NR_PROC)
            .filter(|&slot| slot != 0)
            .find(|&slot| self.procs.get(slot).is_runnable(self.tick))
            .unwrap_or(0);
        self.proc_run(next);
    }

    /// Make `slot` the running process: its address space, its trap stack.
    fn proc_run(&mut self, slot: usize) {
        let kernel_root = self.vm.kernel_root();
        let proc = self.procs.get_mut(slot);
        proc.state = ProcessState::Running;
        let root = proc.pgdir.as_ref().map_or(kernel_root, |space| space.root());
        self.procs.set_current(slot);
        self.vm.switch_to(root);
        self.tss.set_esp0(stack_top(self.procs.kstack(slot)));
    }

    /// Leave the kernel: reschedule while asked to, finishing any syscall
    /// the resumed process was parked in, and hand back the frame to iret to.
    pub(crate) fn return_from_trap(&mut self) -> Context {
        while self.need_resched {
            self.need_resched = false;
            self.schedule();
            let slot = self.procs.current();
            match self.procs.get_mut(slot).resume.take() {
                Some(Resume::Reap { status_ptr }) => {
                    let pid = crate::syscalls::proc::reap(self, status_ptr);
                    self.set_syscall_result(pid);
                }
                Some(Resume::Sleep { .. }) | None => {}
            }
        }
        load_context(&self.vm.phys, self.procs.kstack(self.procs.current()))
    }

    /// Write a syscall's result into the running process's saved frame.
    pub(crate) fn set_syscall_result(&mut self, value: i32) {
        let kstack = self.procs.kstack(self.procs.current());
        let mut ctx = load_context(&self.vm.phys, kstack);
        ctx.eax = value as u32;
        context::save_context(&mut self.vm.phys, kstack, &ctx);
    }

    /// Enter the scheduler from the idle process, as its first timer tick would.
    pub fn start(&mut self) -> Context {
        let mut ctx = Context::empty();
        ctx.irq = crate::interrupts::idt::InterruptIndex::Schedule.as_u32();
        self.trap(ctx)
    }
}
