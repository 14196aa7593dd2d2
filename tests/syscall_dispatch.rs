mod common;

use common::{Machine, SCRATCH};
use minikern::interrupts::InterruptIndex;
use minikern::syscalls::{self, NR_SYS, SYS_CHDIR, SYS_GETPID, SYS_MMAP, SYS_PIPE, SYS_WRITE};

#[test]
fn unknown_numbers_return_minus_one() {
    let mut m = Machine::boot();
    assert_eq!(m.syscall(NR_SYS as u32, &[]), -1);
    assert_eq!(m.syscall(u32::MAX, &[]), -1);
    assert_eq!(m.pid(), 1);
    assert_eq!(syscalls::name(NR_SYS as u32), None);
}

#[test]
fn reserved_numbers_return_minus_one() {
    let mut m = Machine::boot();
    for number in [SYS_CHDIR, SYS_MMAP, SYS_PIPE] {
        assert_eq!(m.syscall(number, &[0, 0, 0]), -1);
        assert_eq!(m.pid(), 1);
    }
    assert_eq!(m.syscall(SYS_GETPID, &[]), 1);
}

#[test]
fn arguments_come_from_the_general_registers() {
    let mut m = Machine::boot();
    m.store(SCRATCH, b"regs");
    let mut ctx = m.regs;
    ctx.irq = InterruptIndex::Syscall.as_u32();
    ctx.eax = SYS_WRITE;
    ctx.ebx = 1;
    ctx.ecx = SCRATCH as u32;
    ctx.edx = 4;
    let back = m.kernel.trap(ctx);
    assert_eq!(back.eax, 4);
    assert_eq!(back.eip, ctx.eip);
    assert_eq!(back.esp, ctx.esp);
    assert_eq!(m.kernel.take_console_output(), b"regs");
}

#[test]
#[should_panic(expected = "page fault @ 0x5000000")]
fn unmapped_user_buffers_are_fatal() {
    let mut m = Machine::boot();
    m.syscall(SYS_WRITE, &[1, 0x0500_0000, 4]);
}

#[test]
#[should_panic(expected = "page fault at eip 0x1000000")]
fn page_fault_traps_are_fatal() {
    let mut m = Machine::boot();
    let mut ctx = m.regs;
    ctx.irq = InterruptIndex::PageFault.as_u32();
    ctx.errcode = 4;
    m.kernel.trap(ctx);
}
