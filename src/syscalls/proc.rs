use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use super::Flow;
use crate::loader::{elf, MAX_ARGS};
use crate::memory::{page_up, PageFlags};
use crate::scheduler::context::save_context;
use crate::scheduler::semaphore::Semaphore;
use crate::scheduler::task::{ProcessState, Resume};
use crate::Kernel;

/// Longest path `exec` accepts, NUL excluded.
pub const PATH_MAX: usize = 255;
/// Longest single argument `exec` accepts.
const ARG_MAX: usize = 1024;

pub fn sys_brk(kernel: &mut Kernel, args: [u32; 5]) -> Flow {
    let addr = args[0] as usize;
    let new_brk = page_up(addr);
    let layout = *kernel.vm.layout();
    if addr < layout.phy_mem || new_brk > layout.usr_mem {
        return Flow::Return(-1);
    }

    let slot = kernel.procs.current();
    let brk = kernel.procs.get(slot).brk;
    if brk == 0 {
        kernel.procs.get_mut(slot).brk = new_brk;
    } else if new_brk > brk {
        let Some(space) = kernel.procs.get(slot).pgdir.as_ref() else {
            return Flow::Return(-1);
        };
        if let Err(e) = kernel.vm.map_range(space, brk, new_brk - brk, PageFlags::USER | PageFlags::WRITABLE) {
            crate::log_warn!("brk: cannot grow heap to {:#x}: {}", new_brk, e);
            return Flow::Return(-1);
        }
        kernel.procs.get_mut(slot).brk = new_brk;
    }
    // Shrinking keeps the pages.
    Flow::Return(0)
}

pub fn sys_sleep(kernel: &mut Kernel, args: [u32; 5]) -> Flow {
    let until = kernel.tick + u64::from(args[0]);
    if kernel.tick >= until {
        return Flow::Return(0);
    }
    let slot = kernel.procs.current();
    kernel.procs.get_mut(slot).resume = Some(Resume::Sleep { until });
    kernel.yield_current();
    Flow::Return(0)
}

fn read_argv(kernel: &Kernel, argv_ptr: usize) -> Option<Vec<Vec<u8>>> {
    let mut args = Vec::new();
    if argv_ptr == 0 {
        return Some(args);
    }
    loop {
        let slot = argv_ptr + args.len() * 4;
        if !kernel.is_user_range(slot, 4) {
            return None;
        }
        let ptr = kernel.vm.read_u32_virt(kernel.current_root(), slot) as usize;
        if ptr == 0 {
            return Some(args);
        }
        if args.len() == MAX_ARGS {
            return None;
        }
        args.push(kernel.user_cstr(ptr, ARG_MAX)?);
    }
}

pub fn sys_exec(kernel: &mut Kernel, args: [u32; 5]) -> Flow {
    let slot = kernel.procs.current();
    if slot == 0 {
        crate::log_warn!("exec: the idle process cannot exec");
        return Flow::Return(-1);
    }
    let Some(path) = kernel.user_str(args[0] as usize, PATH_MAX + 1) else {
        return Flow::Return(-1);
    };
    let Some(argv) = read_argv(kernel, args[1] as usize) else {
        return Flow::Return(-1);
    };

    let space = match kernel.vm.create_address_space() {
        Ok(space) => space,
        Err(_) => return Flow::Return(-1),
    };
    let ctx = match elf::load_into(&mut kernel.vm, &kernel.fs, &space, &path, &argv) {
        Ok(ctx) => ctx,
        Err(e) => {
            crate::log_warn!("exec: '{}': {}", path, e);
            kernel.vm.destroy_address_space(space);
            return Flow::Return(-1);
        }
    };

    // The old image can only go once it is no longer active.
    kernel.vm.switch_to(space.root());
    let proc = kernel.procs.get_mut(slot);
    let old = proc.pgdir.replace(space);
    proc.brk = 0;
    let pid = proc.pid;
    if let Some(old) = old {
        kernel.vm.destroy_address_space(old);
    }
    save_context(&mut kernel.vm.phys, kernel.procs.kstack(slot), &ctx);
    crate::log_info!("exec: PID {} now runs '{}'", pid.0, path);
    Flow::Diverted
}

pub fn sys_getpid(kernel: &mut Kernel, _args: [u32; 5]) -> Flow {
    Flow::Return(kernel.current_pid().0 as i32)
}

pub fn sys_yield(kernel: &mut Kernel, _args: [u32; 5]) -> Flow {
    kernel.yield_current();
    Flow::Return(0)
}

pub fn sys_fork(kernel: &mut Kernel, _args: [u32; 5]) -> Flow {
    let parent = kernel.procs.current();
    let child = match kernel.procs.allocate(&mut kernel.vm) {
        Ok(slot) => slot,
        Err(e) => {
            crate::log_warn!("fork: {}", e);
            return Flow::Return(-1);
        }
    };
    if let Err(e) = kernel.procs.duplicate_into(&mut kernel.vm, parent, child) {
        crate::log_warn!("fork: {}", e);
        kernel.procs.free(&mut kernel.vm, child);
        return Flow::Return(-1);
    }

    let proc = kernel.procs.get_mut(child);
    proc.state = ProcessState::Ready;
    let pid = proc.pid;
    crate::log_info!("fork: PID {} created child PID {}", kernel.current_pid().0, pid.0);
    Flow::Return(pid.0 as i32)
}

pub fn sys_exit(kernel: &mut Kernel, args: [u32; 5]) -> Flow {
    let slot = kernel.procs.current();
    assert_ne!(slot, 0, "exit: the idle process cannot exit");
    let code = args[0] as i32;
    let pid = kernel.current_pid();
    kernel.procs.transition_to_zombie(&mut kernel.vm, slot, code);
    kernel.need_resched = true;
    crate::log_info!("exit: PID {} exited with code {}", pid.0, code);
    Flow::Diverted
}

pub fn sys_wait(kernel: &mut Kernel, args: [u32; 5]) -> Flow {
    let slot = kernel.procs.current();
    let status_ptr = args[0];
    if kernel.procs.get(slot).child_num == 0 {
        return Flow::Return(-1);
    }
    if status_ptr != 0 && !kernel.is_user_range(status_ptr as usize, 4) {
        return Flow::Return(-1);
    }
    if kernel.procs.get_mut(slot).zombie_sem.p(slot) {
        kernel.procs.get_mut(slot).resume = Some(Resume::Reap { status_ptr });
        kernel.block_current();
        return Flow::Diverted;
    }
    Flow::Return(reap(kernel, status_ptr))
}

/// Collect one zombie child of the running process; returns its pid.
pub(crate) fn reap(kernel: &mut Kernel, status_ptr: u32) -> i32 {
    let slot = kernel.procs.current();
    let Some(zombie) = kernel.procs.find_zombie_child(slot) else {
        crate::log_error!("wait: PID {} woken without a zombie child", kernel.current_pid().0);
        return -1;
    };
    let child = kernel.procs.get(zombie);
    let (pid, code) = (child.pid, child.exit_code);
    if status_ptr != 0 {
        kernel.user_store(status_ptr as usize, &code.to_le_bytes());
    }
    kernel.procs.free(&mut kernel.vm, zombie);
    kernel.procs.get_mut(slot).child_num -= 1;
    pid.0 as i32
}

pub fn sys_sem_open(kernel: &mut Kernel, args: [u32; 5]) -> Flow {
    let slot = kernel.procs.current();
    let sem = Arc::new(Mutex::new(Semaphore::new(args[0] as i32)));
    match kernel.procs.allocate_semaphore_slot(slot, sem) {
        Ok(id) => Flow::Return(id as i32),
        Err(_) => Flow::Return(-1),
    }
}

pub fn sys_sem_p(kernel: &mut Kernel, args: [u32; 5]) -> Flow {
    let slot = kernel.procs.current();
    let Some(sem) = kernel.procs.get_semaphore(slot, args[0] as usize) else {
        return Flow::Return(-1);
    };
    let must_block = sem.lock().p(slot);
    if must_block {
        kernel.block_current();
    }
    Flow::Return(0)
}

pub fn sys_sem_v(kernel: &mut Kernel, args: [u32; 5]) -> Flow {
    let slot = kernel.procs.current();
    let Some(sem) = kernel.procs.get_semaphore(slot, args[0] as usize) else {
        return Flow::Return(-1);
    };
    let woken = sem.lock().v();
    if let Some(waiter) = woken {
        kernel.procs.wake(waiter);
    }
    Flow::Return(0)
}

pub fn sys_sem_close(kernel: &mut Kernel, args: [u32; 5]) -> Flow {
    let slot = kernel.procs.current();
    match kernel.procs.release_semaphore_slot(slot, args[0] as usize) {
        Some(_) => Flow::Return(0),
        None => Flow::Return(-1),
    }
}
