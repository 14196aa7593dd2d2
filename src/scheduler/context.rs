use crate::interrupts::gdt::{KERNEL_CODE, KERNEL_DATA, USER_CODE, USER_DATA};
use crate::memory::{Frame, PhysMem, PGSIZE};

/// IF set, reserved bit 1 set.
pub const EFLAGS_IF: u32 = 0x202;

/// Register frame pushed on the kernel stack by a trap.
///
/// `irq` names the vector that trapped; `eax` carries the syscall number
/// in and the result out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Context {
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub irq: u32,
    pub errcode: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

/// Words in a saved frame.
pub const CONTEXT_WORDS: usize = 15;
/// Bytes the frame occupies at the top of a kernel stack.
pub const CONTEXT_SIZE: usize = CONTEXT_WORDS * 4;

impl Context {
    /// Create an empty context (used for the idle task).
    pub fn empty() -> Self {
        Context {
            ds: KERNEL_DATA.bits(),
            cs: KERNEL_CODE.bits(),
            ss: KERNEL_DATA.bits(),
            eflags: EFLAGS_IF,
            ..Context::default()
        }
    }

    /// Initial frame of a user program: iret lands on `entry` with `esp`.
    pub fn user(entry: u32, esp: u32) -> Self {
        Context {
            ds: USER_DATA.bits(),
            cs: USER_CODE.bits(),
            ss: USER_DATA.bits(),
            eflags: EFLAGS_IF,
            eip: entry,
            esp,
            ..Context::default()
        }
    }

    /// The five syscall arguments in ABI order.
    pub fn syscall_args(&self) -> [u32; 5] {
        [self.ebx, self.ecx, self.edx, self.esi, self.edi]
    }

    fn to_words(self) -> [u32; CONTEXT_WORDS] {
        [
            self.ds, self.edi, self.esi, self.ebp, self.ebx, self.edx, self.ecx, self.eax,
            self.irq, self.errcode, self.eip, self.cs, self.eflags, self.esp, self.ss,
        ]
    }

    fn from_words(w: [u32; CONTEXT_WORDS]) -> Self {
        Context {
            ds: w[0],
            edi: w[1],
            esi: w[2],
            ebp: w[3],
            ebx: w[4],
            edx: w[5],
            ecx: w[6],
            eax: w[7],
            irq: w[8],
            errcode: w[9],
            eip: w[10],
            cs: w[11],
            eflags: w[12],
            esp: w[13],
            ss: w[14],
        }
    }
}

/// Top of a one-page kernel stack; this is what the TSS `esp0` points at.
pub fn stack_top(kstack: Frame) -> u32 {
    (kstack.start_address() + PGSIZE) as u32
}

fn frame_address(kstack: Frame) -> usize {
    kstack.start_address() + PGSIZE - CONTEXT_SIZE
}

/// Store `ctx` where a trap leaves it: the top of `kstack`.
pub fn save_context(phys: &mut PhysMem, kstack: Frame, ctx: &Context) {
    let base = frame_address(kstack);
    for (i, word) in ctx.to_words().iter().enumerate() {
        phys.write_u32(base + i * 4, *word);
    }
}

/// Read back the frame saved at the top of `kstack`.
pub fn load_context(phys: &PhysMem, kstack: Frame) -> Context {
    let base = frame_address(kstack);
    let mut words = [0u32; CONTEXT_WORDS];
    for (i, word) in words.iter_mut().enumerate() {
        *word = phys.read_u32(base + i * 4);
    }
    Context::from_words(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_survives_the_kernel_stack() {
        let mut phys = PhysMem::new(4 * PGSIZE);
        let kstack = Frame::from_number(2);
        let mut ctx = Context::user(0x0100_0000, 0xBFFF_FFF0);
        ctx.eax = 7;
        ctx.edi = 5;
        ctx.irq = 0x80;
        save_context(&mut phys, kstack, &ctx);
        assert_eq!(load_context(&phys, kstack), ctx);
        // The frame sits right under the stack top.
        assert_eq!(phys.read_u32(stack_top(kstack) as usize - 4), ctx.ss);
    }

    #[test]
    fn syscall_arguments_follow_register_order() {
        let ctx = Context { ebx: 1, ecx: 2, edx: 3, esi: 4, edi: 5, ..Context::default() };
        assert_eq!(ctx.syscall_args(), [1, 2, 3, 4, 5]);
    }
}
