use alloc::string::String;
use alloc::vec::Vec;

use super::error::{FsError, FsResult};
use super::inode::{FileType, Inode};

// ──────────────────────────────────────────────────────────────
//  Tree node: stored in an arena, addressed by inode id
// ──────────────────────────────────────────────────────────────

struct RamNode {
    id: u64,
    name: String,
    file_type: FileType,
    parent: Option<u64>,
    children: Vec<u64>,
    data: Vec<u8>,
}

impl RamNode {
    fn size(&self) -> usize {
        match self.file_type {
            FileType::File => self.data.len(),
            FileType::Directory => self.children.len(),
        }
    }

    fn to_inode(&self) -> Inode {
        Inode {
            id: self.id,
            file_type: self.file_type,
            size: self.size(),
        }
    }
}

/// In-memory object store behind `open`, `read`, `write`, `exec` and `unlink`.
///
/// Open files hold inode ids; once unlinked, an id no longer resolves and
/// I/O through stale handles fails with `NotFound`.
pub struct RamFs {
    nodes: Vec<RamNode>,
    next_id: u64,
}

impl Default for RamFs {
    fn default() -> Self {
        Self::new()
    }
}

impl RamFs {
    pub fn new() -> Self {
        let root = RamNode {
            id: 0,
            name: String::from("/"),
            file_type: FileType::Directory,
            parent: None,
            children: Vec::new(),
            data: Vec::new(),
        };
        RamFs {
            nodes: alloc::vec![root],
            next_id: 1,
        }
    }

    fn find_by_id(&self, id: u64) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    fn node(&self, id: u64) -> FsResult<&RamNode> {
        self.find_by_id(id).map(|i| &self.nodes[i]).ok_or(FsError::NotFound)
    }

    fn node_mut(&mut self, id: u64) -> FsResult<&mut RamNode> {
        let idx = self.find_by_id(id).ok_or(FsError::NotFound)?;
        Ok(&mut self.nodes[idx])
    }

    fn child_named(&self, dir: &RamNode, name: &str) -> Option<u64> {
        dir.children
            .iter()
            .copied()
            .find(|&c| self.node(c).map(|n| n.name == name).unwrap_or(false))
    }

    /// Walk an absolute path from the root.
    fn resolve_path(&self, path: &str) -> FsResult<u64> {
        if !path.starts_with('/') {
            return Err(FsError::InvalidPath);
        }
        let mut current = 0;
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            let node = self.node(current)?;
            if node.file_type != FileType::Directory {
                return Err(FsError::NotADirectory);
            }
            current = self.child_named(node, seg).ok_or(FsError::NotFound)?;
        }
        Ok(current)
    }

    /// Split into (parent id, leaf name); the leaf must not exist yet.
    fn resolve_parent(&self, path: &str) -> FsResult<(u64, String)> {
        let path = path.trim_end_matches('/');
        let last_slash = path.rfind('/').ok_or(FsError::InvalidPath)?;
        let parent_path = if last_slash == 0 { "/" } else { &path[..last_slash] };
        let leaf = &path[last_slash + 1..];
        if leaf.is_empty() {
            return Err(FsError::InvalidPath);
        }

        let parent_id = self.resolve_path(parent_path)?;
        let parent = self.node(parent_id)?;
        if parent.file_type != FileType::Directory {
            return Err(FsError::NotADirectory);
        }
        if self.child_named(parent, leaf).is_some() {
            return Err(FsError::AlreadyExists);
        }
        Ok((parent_id, String::from(leaf)))
    }

    fn insert_node(&mut self, path: &str, file_type: FileType) -> FsResult<Inode> {
        let (parent_id, name) = self.resolve_parent(path)?;
        let id = self.next_id;
        self.next_id += 1;
        let node = RamNode {
            id,
            name,
            file_type,
            parent: Some(parent_id),
            children: Vec::new(),
            data: Vec::new(),
        };
        let inode = node.to_inode();
        self.nodes.push(node);
        self.node_mut(parent_id)?.children.push(id);
        Ok(inode)
    }

    pub fn create(&mut self, path: &str) -> FsResult<Inode> {
        self.insert_node(path, FileType::File)
    }

    pub fn mkdir(&mut self, path: &str) -> FsResult<Inode> {
        self.insert_node(path, FileType::Directory)
    }

    pub fn lookup(&self, path: &str) -> FsResult<Inode> {
        let id = self.resolve_path(path)?;
        Ok(self.node(id)?.to_inode())
    }

    pub fn stat(&self, id: u64) -> FsResult<Inode> {
        Ok(self.node(id)?.to_inode())
    }

    /// Read from `offset`; returns 0 at end of file.
    pub fn read(&self, id: u64, offset: usize, buf: &mut [u8]) -> FsResult<usize> {
        let node = self.node(id)?;
        if node.file_type == FileType::Directory {
            return Err(FsError::IsADirectory);
        }
        if offset >= node.data.len() {
            return Ok(0);
        }
        let available = &node.data[offset..];
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }

    /// Write at `offset`, zero-filling any gap past the end.
    pub fn write(&mut self, id: u64, offset: usize, data: &[u8]) -> FsResult<usize> {
        let node = self.node_mut(id)?;
        if node.file_type == FileType::Directory {
            return Err(FsError::IsADirectory);
        }
        let end = offset + data.len();
        if end > node.data.len() {
            node.data.resize(end, 0);
        }
        node.data[offset..end].copy_from_slice(data);
        Ok(data.len())
    }

    pub fn truncate(&mut self, id: u64) -> FsResult<()> {
        let node = self.node_mut(id)?;
        if node.file_type == FileType::Directory {
            return Err(FsError::IsADirectory);
        }
        node.data.clear();
        Ok(())
    }

    /// Whole contents of the file at `path`.
    pub fn read_all(&self, path: &str) -> FsResult<Vec<u8>> {
        let inode = self.lookup(path)?;
        let mut buf = alloc::vec![0u8; inode.size];
        let n = self.read(inode.id, 0, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    pub fn unlink(&mut self, path: &str) -> FsResult<()> {
        let id = self.resolve_path(path)?;
        let node = self.node(id)?;
        if node.file_type == FileType::Directory && !node.children.is_empty() {
            return Err(FsError::DirectoryNotEmpty);
        }
        let parent_id = node.parent.ok_or(FsError::InvalidPath)?;
        self.node_mut(parent_id)?.children.retain(|&c| c != id);
        let idx = self.find_by_id(id).ok_or(FsError::NotFound)?;
        self.nodes.remove(idx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_write_read_back() {
        let mut fs = RamFs::new();
        let inode = fs.create("/hello.txt").unwrap();
        assert_eq!(fs.write(inode.id, 0, b"hi there").unwrap(), 8);
        let mut buf = [0u8; 5];
        assert_eq!(fs.read(inode.id, 3, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"there");
        assert_eq!(fs.read(inode.id, 8, &mut buf).unwrap(), 0);
        assert_eq!(fs.lookup("/hello.txt").unwrap().size, 8);
    }

    #[test]
    fn writes_past_the_end_zero_fill() {
        let mut fs = RamFs::new();
        let id = fs.create("/gap").unwrap().id;
        fs.write(id, 4, b"x").unwrap();
        assert_eq!(fs.read_all("/gap").unwrap(), b"\0\0\0\0x".to_vec());
    }

    #[test]
    fn nested_paths_need_directories() {
        let mut fs = RamFs::new();
        assert_eq!(fs.create("/bin/sh"), Err(FsError::NotFound));
        fs.mkdir("/bin").unwrap();
        fs.create("/bin/sh").unwrap();
        assert_eq!(fs.create("/bin/sh"), Err(FsError::AlreadyExists));
        assert_eq!(fs.create("/bin/sh/x"), Err(FsError::NotADirectory));
        assert_eq!(fs.unlink("/bin"), Err(FsError::DirectoryNotEmpty));
    }

    #[test]
    fn unlinked_ids_stop_resolving() {
        let mut fs = RamFs::new();
        let id = fs.create("/tmp").unwrap().id;
        fs.unlink("/tmp").unwrap();
        assert_eq!(fs.lookup("/tmp"), Err(FsError::NotFound));
        assert_eq!(fs.stat(id), Err(FsError::NotFound));
    }

    #[test]
    fn relative_paths_are_rejected() {
        let fs = RamFs::new();
        assert_eq!(fs.lookup("etc"), Err(FsError::InvalidPath));
    }
}
