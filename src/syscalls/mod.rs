pub mod file;
pub mod proc;

use crate::Kernel;

/// Syscall numbers (passed in EAX from userland).
pub const SYS_WRITE: u32 = 0;
pub const SYS_READ: u32 = 1;
pub const SYS_BRK: u32 = 2;
pub const SYS_SLEEP: u32 = 3;
pub const SYS_EXEC: u32 = 4;
pub const SYS_GETPID: u32 = 5;
pub const SYS_YIELD: u32 = 6;
pub const SYS_FORK: u32 = 7;
pub const SYS_EXIT: u32 = 8;
pub const SYS_WAIT: u32 = 9;
pub const SYS_SEM_OPEN: u32 = 10;
pub const SYS_SEM_P: u32 = 11;
pub const SYS_SEM_V: u32 = 12;
pub const SYS_SEM_CLOSE: u32 = 13;
pub const SYS_OPEN: u32 = 14;
pub const SYS_CLOSE: u32 = 15;
pub const SYS_DUP: u32 = 16;
pub const SYS_LSEEK: u32 = 17;
pub const SYS_FSTAT: u32 = 18;
pub const SYS_CHDIR: u32 = 19;
pub const SYS_UNLINK: u32 = 20;
pub const SYS_MMAP: u32 = 21;
pub const SYS_MUNMAP: u32 = 22;
pub const SYS_CLONE: u32 = 23;
pub const SYS_KILL: u32 = 24;
pub const SYS_CV_OPEN: u32 = 25;
pub const SYS_CV_WAIT: u32 = 26;
pub const SYS_CV_SIG: u32 = 27;
pub const SYS_CV_SIGALL: u32 = 28;
pub const SYS_CV_CLOSE: u32 = 29;
pub const SYS_PIPE: u32 = 30;
pub const SYS_LINK: u32 = 31;
pub const SYS_SYMLINK: u32 = 32;

pub const NR_SYS: usize = 33;

/// How a handler leaves the syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Store the value in EAX of the caller's frame.
    Return(i32),
    /// The frame was replaced or the caller is parked; leave it alone.
    Diverted,
}

/// Arguments come from EBX, ECX, EDX, ESI, EDI.
pub type Handler = fn(&mut Kernel, [u32; 5]) -> Flow;

struct Syscall {
    name: &'static str,
    handler: Option<Handler>,
}

const fn sys(name: &'static str, handler: Handler) -> Syscall {
    Syscall { name, handler: Some(handler) }
}

const fn reserved(name: &'static str) -> Syscall {
    Syscall { name, handler: None }
}

static SYSCALL_TABLE: [Syscall; NR_SYS] = [
    sys("write", file::sys_write),
    sys("read", file::sys_read),
    sys("brk", proc::sys_brk),
    sys("sleep", proc::sys_sleep),
    sys("exec", proc::sys_exec),
    sys("getpid", proc::sys_getpid),
    sys("yield", proc::sys_yield),
    sys("fork", proc::sys_fork),
    sys("exit", proc::sys_exit),
    sys("wait", proc::sys_wait),
    sys("sem_open", proc::sys_sem_open),
    sys("sem_p", proc::sys_sem_p),
    sys("sem_v", proc::sys_sem_v),
    sys("sem_close", proc::sys_sem_close),
    sys("open", file::sys_open),
    sys("close", file::sys_close),
    sys("dup", file::sys_dup),
    sys("lseek", file::sys_lseek),
    sys("fstat", file::sys_fstat),
    reserved("chdir"),
    sys("unlink", file::sys_unlink),
    reserved("mmap"),
    reserved("munmap"),
    reserved("clone"),
    reserved("kill"),
    reserved("cv_open"),
    reserved("cv_wait"),
    reserved("cv_sig"),
    reserved("cv_sigall"),
    reserved("cv_close"),
    reserved("pipe"),
    reserved("link"),
    reserved("symlink"),
];

/// Central syscall dispatcher, run with the trapped process current and
/// its frame already on its kernel stack.
pub fn dispatch(kernel: &mut Kernel) {
    let ctx = kernel.saved_context();
    let flow = match SYSCALL_TABLE.get(ctx.eax as usize) {
        Some(Syscall { handler: Some(handler), .. }) => handler(kernel, ctx.syscall_args()),
        Some(Syscall { name, handler: None }) => {
            crate::log_warn!("syscall: {} is not supported", name);
            Flow::Return(-1)
        }
        None => {
            crate::log_warn!("syscall: unknown number {}", ctx.eax);
            Flow::Return(-1)
        }
    };
    if let Flow::Return(value) = flow {
        kernel.set_syscall_result(value);
    }
}

/// Syscall name for log lines.
pub fn name(number: u32) -> Option<&'static str> {
    SYSCALL_TABLE.get(number as usize).map(|s| s.name)
}
