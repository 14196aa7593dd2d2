pub mod gdt;
pub mod idt;

pub use idt::{page_fault, InterruptIndex};

use crate::scheduler::context::{save_context, Context};
use crate::Kernel;

impl Kernel {
    /// Common trap entry.
    ///
    /// `ctx` is the frame the trap pushed for the running process. It is
    /// stored on that process's kernel stack, the vector is handled, and the
    /// frame of whichever process runs next is returned.
    pub fn trap(&mut self, ctx: Context) -> Context {
        let slot = self.procs.current();
        save_context(&mut self.vm.phys, self.procs.kstack(slot), &ctx);

        match InterruptIndex::from_vector(ctx.irq) {
            Some(InterruptIndex::Syscall) => crate::syscalls::dispatch(self),
            Some(InterruptIndex::Schedule) => self.yield_current(),
            Some(InterruptIndex::Timer) => {
                self.tick += 1;
                self.yield_current();
            }
            Some(InterruptIndex::PageFault) => idt::page_fault_at(ctx.eip, ctx.errcode),
            None => idt::unexpected_trap(ctx.irq, ctx.eip),
        }

        self.return_from_trap()
    }
}
