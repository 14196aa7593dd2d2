pub mod error;
pub mod fd;
pub mod inode;
pub mod ramfs;

use alloc::sync::Arc;
use bitflags::bitflags;
use spin::Mutex;

pub use error::{FsError, FsResult};
pub use fd::{Console, File, FileKind, FileRef};
pub use ramfs::RamFs;

/// Path of the console device.
pub const CONSOLE_PATH: &str = "/dev/console";

bitflags! {
    /// Mode bits of `open`. The access mode lives in the low two bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const WRONLY = 1;
        const RDWR   = 2;
        const CREATE = 4;
        const TRUNC  = 8;
        const DIR    = 16;
    }
}

impl OpenFlags {
    pub const RDONLY: OpenFlags = OpenFlags::empty();

    pub fn readable(self) -> bool {
        !self.contains(OpenFlags::WRONLY) || self.contains(OpenFlags::RDWR)
    }

    pub fn writable(self) -> bool {
        self.intersects(OpenFlags::WRONLY | OpenFlags::RDWR)
    }
}

/// Resolve `path` into a new open file.
///
/// `CREATE` makes missing files (directories with `DIR`); `TRUNC` empties a
/// regular file opened for writing. Directories open read-only.
pub fn open(fs: &mut RamFs, console: &Arc<Mutex<Console>>, path: &str, flags: OpenFlags) -> FsResult<FileRef> {
    if path == CONSOLE_PATH {
        return Ok(File::new_console(console));
    }

    let inode = match fs.lookup(path) {
        Ok(inode) => inode,
        Err(FsError::NotFound) if flags.contains(OpenFlags::CREATE) => {
            if flags.contains(OpenFlags::DIR) {
                fs.mkdir(path)?
            } else {
                fs.create(path)?
            }
        }
        Err(e) => return Err(e),
    };

    let is_dir = inode.file_type == inode::FileType::Directory;
    if is_dir && flags.writable() {
        return Err(FsError::IsADirectory);
    }
    if flags.contains(OpenFlags::DIR) && !is_dir {
        return Err(FsError::NotADirectory);
    }
    if flags.contains(OpenFlags::TRUNC) && flags.writable() {
        fs.truncate(inode.id)?;
    }
    Ok(File::new_inode(inode.id, flags.readable(), flags.writable()))
}
