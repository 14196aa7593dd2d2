#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod fs;
pub mod interrupts;
pub mod loader;
pub mod memory;
pub mod scheduler;
pub mod serial;
pub mod syscalls;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

pub use config::KernelConfig;
pub use scheduler::context::Context;
pub use scheduler::task::{ProcessId, ProcessState};

use fs::{Console, RamFs};
use interrupts::gdt::TaskStateSegment;
use memory::{Frame, PageFlags, Vm};
use scheduler::context::{load_context, stack_top};
use scheduler::table::ProcTable;

/// The whole machine: memory, processes, the filesystem and the console.
///
/// Everything runs on one execution context. The host drives it by
/// delivering traps through [`Kernel::trap`] and resuming whatever frame
/// comes back.
pub struct Kernel {
    pub vm: Vm,
    pub procs: ProcTable,
    pub fs: RamFs,
    pub console: Arc<Mutex<Console>>,
    pub tss: TaskStateSegment,
    tick: u64,
    need_resched: bool,
}

impl Kernel {
    pub fn boot(config: KernelConfig) -> Self {
        serial::init();
        log_info!(
            "minikern: booting with PHY_MEM={:#x} KER_MEM={:#x} USR_MEM={:#x}",
            config.phy_mem,
            config.ker_mem,
            config.usr_mem
        );

        let vm = Vm::init(config);
        log_info!("Memory initialized.");

        let procs = ProcTable::new(vm.idle_stack());
        let mut tss = TaskStateSegment::new();
        tss.set_esp0(stack_top(vm.idle_stack()));
        log_info!("Process table initialized, idle process running.");

        let mut fs = RamFs::new();
        for dir in ["/bin", "/dev", "/tmp"] {
            if let Err(e) = fs.mkdir(dir) {
                log_warn!("fs: cannot create {}: {}", dir, e);
            }
        }
        log_info!("Syscall interface initialized ({} entries).", syscalls::NR_SYS);

        Kernel {
            vm,
            procs,
            fs,
            console: Arc::new(Mutex::new(Console::new())),
            tss,
            tick: 0,
            need_resched: false,
        }
    }

    /// Timer ticks delivered so far.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn current_pid(&self) -> ProcessId {
        self.procs.get(self.procs.current()).pid
    }

    /// Directory of the running process, or the kernel's for the idle process.
    pub fn current_root(&self) -> Frame {
        match self.procs.get(self.procs.current()).pgdir.as_ref() {
            Some(space) => space.root(),
            None => self.vm.kernel_root(),
        }
    }

    /// The frame saved on the running process's kernel stack.
    pub fn saved_context(&self) -> Context {
        load_context(&self.vm.phys, self.procs.kstack(self.procs.current()))
    }

    /// Whether `[va, va + len)` lies in user space.
    pub fn is_user_range(&self, va: usize, len: usize) -> bool {
        let layout = self.vm.layout();
        match va.checked_add(len) {
            Some(end) => va >= layout.phy_mem && end <= layout.usr_mem,
            None => false,
        }
    }

    /// Load from the running process's memory with user privilege.
    pub fn user_load(&self, va: usize, buf: &mut [u8]) {
        self.vm.read_virt(self.current_root(), va, buf, PageFlags::USER);
    }

    /// Store into the running process's memory with user privilege.
    pub fn user_store(&mut self, va: usize, data: &[u8]) {
        let root = self.current_root();
        self.vm.write_virt(root, va, data, PageFlags::USER | PageFlags::WRITABLE);
    }

    /// NUL-terminated bytes from user space, at most `max` long. The string
    /// must end before `USR_MEM`.
    pub fn user_cstr(&self, va: usize, max: usize) -> Option<Vec<u8>> {
        if !self.is_user_range(va, 1) {
            return None;
        }
        let max = max.min(self.vm.layout().usr_mem - va);
        self.vm.read_cstr(self.current_root(), va, max)
    }

    /// Like [`Kernel::user_cstr`], for text that must be UTF-8 (paths).
    pub fn user_str(&self, va: usize, max: usize) -> Option<String> {
        String::from_utf8(self.user_cstr(va, max)?).ok()
    }

    pub fn push_console_input(&self, data: &[u8]) {
        self.console.lock().push_input(data);
    }

    /// Everything written to the console so far, emptying it.
    pub fn take_console_output(&self) -> Vec<u8> {
        self.console.lock().take_output()
    }
}
