use alloc::sync::Arc;
use alloc::vec;

use super::proc::PATH_MAX;
use super::Flow;
use crate::fs::{self, OpenFlags};
use crate::memory::PGSIZE;
use crate::Kernel;

pub fn sys_write(kernel: &mut Kernel, args: [u32; 5]) -> Flow {
    let [fd, buf, count, ..] = args.map(|a| a as usize);
    let Some(file) = kernel.procs.get_file(kernel.procs.current(), fd) else {
        return Flow::Return(-1);
    };
    if count == 0 {
        return Flow::Return(0);
    }
    if !kernel.is_user_range(buf, count) {
        return Flow::Return(-1);
    }

    let mut chunk = vec![0u8; count.min(PGSIZE)];
    let mut done = 0;
    while done < count {
        let len = (count - done).min(PGSIZE);
        kernel.user_load(buf + done, &mut chunk[..len]);
        match file.lock().write(&mut kernel.fs, &chunk[..len]) {
            Ok(n) => done += n,
            Err(_) if done > 0 => break,
            Err(_) => return Flow::Return(-1),
        }
    }
    Flow::Return(done as i32)
}

pub fn sys_read(kernel: &mut Kernel, args: [u32; 5]) -> Flow {
    let [fd, buf, count, ..] = args.map(|a| a as usize);
    let Some(file) = kernel.procs.get_file(kernel.procs.current(), fd) else {
        return Flow::Return(-1);
    };
    if count == 0 {
        return Flow::Return(0);
    }
    if !kernel.is_user_range(buf, count) {
        return Flow::Return(-1);
    }

    let mut chunk = vec![0u8; count.min(PGSIZE)];
    let mut done = 0;
    while done < count {
        let len = (count - done).min(PGSIZE);
        let n = match file.lock().read(&kernel.fs, &mut chunk[..len]) {
            Ok(n) => n,
            Err(_) if done > 0 => break,
            Err(_) => return Flow::Return(-1),
        };
        kernel.user_store(buf + done, &chunk[..n]);
        done += n;
        if n < len {
            break;
        }
    }
    Flow::Return(done as i32)
}

pub fn sys_open(kernel: &mut Kernel, args: [u32; 5]) -> Flow {
    let Some(path) = kernel.user_str(args[0] as usize, PATH_MAX + 1) else {
        return Flow::Return(-1);
    };
    let flags = OpenFlags::from_bits_truncate(args[1]);
    let file = match fs::open(&mut kernel.fs, &kernel.console, &path, flags) {
        Ok(file) => file,
        Err(e) => {
            crate::log_warn!("open: '{}': {}", path, e);
            return Flow::Return(-1);
        }
    };
    match kernel.procs.allocate_file_slot(kernel.procs.current(), file) {
        Ok(fd) => Flow::Return(fd as i32),
        Err(_) => Flow::Return(-1),
    }
}

pub fn sys_close(kernel: &mut Kernel, args: [u32; 5]) -> Flow {
    let slot = kernel.procs.current();
    match kernel.procs.release_file_slot(slot, args[0] as usize) {
        Some(_) => Flow::Return(0),
        None => Flow::Return(-1),
    }
}

pub fn sys_dup(kernel: &mut Kernel, args: [u32; 5]) -> Flow {
    let slot = kernel.procs.current();
    let Some(file) = kernel.procs.get_file(slot, args[0] as usize) else {
        return Flow::Return(-1);
    };
    match kernel.procs.allocate_file_slot(slot, Arc::clone(&file)) {
        Ok(fd) => Flow::Return(fd as i32),
        Err(_) => Flow::Return(-1),
    }
}

pub fn sys_lseek(kernel: &mut Kernel, args: [u32; 5]) -> Flow {
    let Some(file) = kernel.procs.get_file(kernel.procs.current(), args[0] as usize) else {
        return Flow::Return(-1);
    };
    let result = file.lock().seek(&kernel.fs, args[1] as i32, args[2]);
    match result {
        Ok(offset) => Flow::Return(offset as i32),
        Err(_) => Flow::Return(-1),
    }
}

pub fn sys_fstat(kernel: &mut Kernel, args: [u32; 5]) -> Flow {
    let Some(file) = kernel.procs.get_file(kernel.procs.current(), args[0] as usize) else {
        return Flow::Return(-1);
    };
    let st_ptr = args[1] as usize;
    if !kernel.is_user_range(st_ptr, 12) {
        return Flow::Return(-1);
    }
    let stat = file.lock().stat(&kernel.fs);
    match stat {
        Ok(stat) => {
            kernel.user_store(st_ptr, &stat.to_bytes());
            Flow::Return(0)
        }
        Err(_) => Flow::Return(-1),
    }
}

pub fn sys_unlink(kernel: &mut Kernel, args: [u32; 5]) -> Flow {
    let Some(path) = kernel.user_str(args[0] as usize, PATH_MAX + 1) else {
        return Flow::Return(-1);
    };
    match kernel.fs.unlink(&path) {
        Ok(()) => Flow::Return(0),
        Err(e) => {
            crate::log_warn!("unlink: '{}': {}", path, e);
            Flow::Return(-1)
        }
    }
}
