/// Inode represents a filesystem node (file or directory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub id: u64,
    pub file_type: FileType,
    pub size: usize,
}

/// Type of filesystem node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
}

pub const TYPE_FILE: u32 = 1;
pub const TYPE_DIR: u32 = 2;
pub const TYPE_DEV: u32 = 3;

/// What `fstat` copies out to user space, three little-endian words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub file_type: u32,
    pub node: u32,
    pub size: u32,
}

impl Stat {
    pub fn device() -> Self {
        Stat { file_type: TYPE_DEV, node: 0, size: 0 }
    }

    pub fn to_bytes(self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[0..4].copy_from_slice(&self.file_type.to_le_bytes());
        out[4..8].copy_from_slice(&self.node.to_le_bytes());
        out[8..12].copy_from_slice(&self.size.to_le_bytes());
        out
    }
}

impl From<&Inode> for Stat {
    fn from(inode: &Inode) -> Self {
        Stat {
            file_type: match inode.file_type {
                FileType::File => TYPE_FILE,
                FileType::Directory => TYPE_DIR,
            },
            node: inode.id as u32,
            size: inode.size as u32,
        }
    }
}
