use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use super::error::{FsError, FsResult};
use super::inode::Stat;
use super::ramfs::RamFs;

/// `lseek` origins.
pub const SEEK_SET: u32 = 0;
pub const SEEK_CUR: u32 = 1;
pub const SEEK_END: u32 = 2;

/// The console device: everything written is kept (and mirrored to the
/// serial log), reads take from a queue fed by the host.
#[derive(Debug, Default)]
pub struct Console {
    output: Vec<u8>,
    input: VecDeque<u8>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, data: &[u8]) -> usize {
        self.output.extend_from_slice(data);
        crate::serial::write_bytes(data);
        data.len()
    }

    /// Non-blocking: returns 0 when no input is queued.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.input.len());
        for (dst, src) in buf.iter_mut().zip(self.input.drain(..n)) {
            *dst = src;
        }
        n
    }

    pub fn push_input(&mut self, data: &[u8]) {
        self.input.extend(data.iter().copied());
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.output)
    }
}

pub enum FileKind {
    Console(Arc<Mutex<Console>>),
    Inode(u64),
}

/// An open file. Shared between descriptors by `dup` and `fork`; the last
/// reference closes it.
pub struct File {
    pub kind: FileKind,
    pub offset: usize,
    pub readable: bool,
    pub writable: bool,
}

pub type FileRef = Arc<Mutex<File>>;

impl File {
    pub fn new_console(console: &Arc<Mutex<Console>>) -> FileRef {
        Arc::new(Mutex::new(File {
            kind: FileKind::Console(Arc::clone(console)),
            offset: 0,
            readable: true,
            writable: true,
        }))
    }

    pub fn new_inode(id: u64, readable: bool, writable: bool) -> FileRef {
        Arc::new(Mutex::new(File {
            kind: FileKind::Inode(id),
            offset: 0,
            readable,
            writable,
        }))
    }

    pub fn read(&mut self, fs: &RamFs, buf: &mut [u8]) -> FsResult<usize> {
        if !self.readable {
            return Err(FsError::PermissionDenied);
        }
        match &self.kind {
            FileKind::Console(console) => Ok(console.lock().read(buf)),
            FileKind::Inode(id) => {
                let n = fs.read(*id, self.offset, buf)?;
                self.offset += n;
                Ok(n)
            }
        }
    }

    pub fn write(&mut self, fs: &mut RamFs, data: &[u8]) -> FsResult<usize> {
        if !self.writable {
            return Err(FsError::PermissionDenied);
        }
        match &self.kind {
            FileKind::Console(console) => Ok(console.lock().write(data)),
            FileKind::Inode(id) => {
                let n = fs.write(*id, self.offset, data)?;
                self.offset += n;
                Ok(n)
            }
        }
    }

    /// Move the offset; a resulting negative offset is rejected.
    pub fn seek(&mut self, fs: &RamFs, offset: i32, whence: u32) -> FsResult<usize> {
        let id = match &self.kind {
            FileKind::Console(_) => return Err(FsError::InvalidSeek),
            FileKind::Inode(id) => *id,
        };
        let base = match whence {
            SEEK_SET => 0,
            SEEK_CUR => self.offset as i64,
            SEEK_END => fs.stat(id)?.size as i64,
            _ => return Err(FsError::InvalidSeek),
        };
        let target = base + offset as i64;
        if target < 0 {
            return Err(FsError::InvalidSeek);
        }
        self.offset = target as usize;
        Ok(self.offset)
    }

    pub fn stat(&self, fs: &RamFs) -> FsResult<Stat> {
        match &self.kind {
            FileKind::Console(_) => Ok(Stat::device()),
            FileKind::Inode(id) => Ok(Stat::from(&fs.stat(*id)?)),
        }
    }
}
