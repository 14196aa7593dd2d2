pub mod elf;

use alloc::vec::Vec;

pub use elf::{ExecError, MAX_ARGS};

use crate::fs::File;
use crate::scheduler::context::save_context;
use crate::scheduler::task::{ProcessId, ProcessState};
use crate::Kernel;

impl Kernel {
    /// Start `path` as a new top-level process with stdin, stdout and
    /// stderr on the console. The process is READY but does not run until
    /// the next reschedule.
    pub fn spawn(&mut self, path: &str, argv: &[&str]) -> Result<ProcessId, ExecError> {
        let args: Vec<Vec<u8>> = argv.iter().map(|a| a.as_bytes().to_vec()).collect();
        let slot = self.procs.allocate(&mut self.vm)?;

        let loaded = match self.procs.get(slot).pgdir.as_ref() {
            Some(space) => elf::load_into(&mut self.vm, &self.fs, space, path, &args),
            None => Err(ExecError::MemoryError),
        };
        let ctx = match loaded {
            Ok(ctx) => ctx,
            Err(e) => {
                crate::log_warn!("ELF: cannot spawn '{}': {}", path, e);
                self.procs.free(&mut self.vm, slot);
                return Err(e);
            }
        };

        save_context(&mut self.vm.phys, self.procs.kstack(slot), &ctx);
        for _ in 0..3 {
            self.procs.allocate_file_slot(slot, File::new_console(&self.console))?;
        }
        let proc = self.procs.get_mut(slot);
        proc.state = ProcessState::Ready;
        let pid = proc.pid;
        crate::log_info!("ELF: spawned process '{}' (PID {})", path, pid.0);
        Ok(pid)
    }
}
