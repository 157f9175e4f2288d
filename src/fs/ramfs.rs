//! In-memory filesystem
//!
//! Ramfs stores everything in an inode arena keyed by stable inode
//! ids: directories are name-to-id maps, files are byte vectors. It
//! serves as the root filesystem at boot.
//!
//! ## Inode lifetime
//!
//! Two counts keep an inode alive: `nlink` (directory entries naming
//! it) and `ref_count` (open handles retaining it). Unlinking an open
//! file only drops the link; the bytes survive until the last handle
//! closes. Both `unlink` and `close` check the destroy condition
//! (`nlink == 0 && ref_count == 0`) and whichever sees it last frees
//! the inode, truncating file contents first.
//!
//! ## Locking
//!
//! Namespace mutations are serialized by the VFS through the
//! filesystem's [`FsLock`]; the mutating operations assert that the
//! exclusive side is held. The arena itself sits behind its own
//! `RwLock` purely for memory safety of concurrent handle I/O.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::RwLock;

use super::vfs::{
    DirEnt, Filesystem, FsLock, FsPathEntry, HandleId, InodeId, ResolvedPath, Stat, VfsEntryKind,
};
use crate::{KernelError, KernelResult};

/// Owner-write permission bit
const MODE_OWNER_WRITE: u16 = 0o200;

/// Largest file the ramfs will hold (1 GiB). Seeks past this point and
/// writes that would grow a file beyond it fail instead of letting the
/// cursor drive an unbounded allocation.
const MAX_FILE_SIZE: usize = 1 << 30;

/// Inode contents: file bytes or directory entries
#[derive(Debug)]
enum InodePayload {
    File(Vec<u8>),
    Dir(BTreeMap<String, InodeId>),
}

#[derive(Debug)]
struct RamfsInode {
    /// Permission bits
    mode: u16,
    /// Directory entries naming this inode
    nlink: u32,
    /// Open handles retaining this inode
    ref_count: u32,
    payload: InodePayload,
}

impl RamfsInode {
    fn kind(&self) -> VfsEntryKind {
        match self.payload {
            InodePayload::File(_) => VfsEntryKind::File,
            InodePayload::Dir(_) => VfsEntryKind::Dir,
        }
    }
}

/// An open file: the inode it retains plus a byte cursor
#[derive(Debug, Clone, Copy)]
struct OpenFile {
    inode: InodeId,
    pos: u64,
}

struct RamfsState {
    inodes: BTreeMap<InodeId, RamfsInode>,
    handles: BTreeMap<HandleId, OpenFile>,
    next_inode: InodeId,
    next_handle: HandleId,
    root: InodeId,
}

impl RamfsState {
    fn create_inode(&mut self, mode: u16, payload: InodePayload) -> InodeId {
        let id = self.next_inode;
        self.next_inode += 1;
        self.inodes.insert(
            id,
            RamfsInode {
                mode,
                nlink: 0,
                ref_count: 0,
                payload,
            },
        );
        id
    }

    fn create_inode_file(&mut self, mode: u16) -> InodeId {
        self.create_inode(mode, InodePayload::File(Vec::new()))
    }

    fn create_inode_dir(&mut self, mode: u16) -> InodeId {
        self.create_inode(mode, InodePayload::Dir(BTreeMap::new()))
    }

    fn inode(&self, id: InodeId) -> &RamfsInode {
        self.inodes.get(&id).expect("dangling inode id")
    }

    fn inode_mut(&mut self, id: InodeId) -> &mut RamfsInode {
        self.inodes.get_mut(&id).expect("dangling inode id")
    }

    /// Look up a name in a directory; None on a miss or when `dir` is
    /// not a directory (a path walking through a file misses)
    fn dir_get_entry_by_name(&self, dir: InodeId, name: &str) -> Option<InodeId> {
        match &self.inode(dir).payload {
            InodePayload::Dir(children) => children.get(name).copied(),
            InodePayload::File(_) => None,
        }
    }

    /// Enter `target` into `dir` under `name`, bumping the target's
    /// link count
    fn dir_add_entry(&mut self, dir: InodeId, name: &str, target: InodeId) -> KernelResult<()> {
        let children = match &mut self.inode_mut(dir).payload {
            InodePayload::Dir(children) => children,
            InodePayload::File(_) => return Err(KernelError::NotDirectory),
        };
        if children.contains_key(name) {
            return Err(KernelError::AlreadyExists);
        }
        children.insert(String::from(name), target);
        self.inode_mut(target).nlink += 1;
        Ok(())
    }

    /// Remove a name from `dir`, dropping the target's link count.
    /// Does not destroy anything; callers follow up with
    /// `destroy_if_unused`.
    fn dir_remove_entry(&mut self, dir: InodeId, name: &str) -> InodeId {
        let children = match &mut self.inode_mut(dir).payload {
            InodePayload::Dir(children) => children,
            InodePayload::File(_) => panic!("removing entry from non-directory"),
        };
        let target = children.remove(name).expect("removing missing entry");
        self.inode_mut(target).nlink -= 1;
        target
    }

    /// Free the inode if nothing names it and nothing holds it open
    fn destroy_if_unused(&mut self, id: InodeId) {
        let inode = self.inode(id);
        if inode.nlink == 0 && inode.ref_count == 0 {
            // Truncate before the inode goes away
            if let InodePayload::File(data) = &mut self.inode_mut(id).payload {
                data.clear();
            }
            self.inodes.remove(&id);
        }
    }
}

/// The in-memory filesystem
pub struct Ramfs {
    lock: FsLock,
    state: RwLock<RamfsState>,
}

impl Ramfs {
    /// Create a ramfs with an empty root directory
    pub fn create() -> Arc<Self> {
        let mut state = RamfsState {
            inodes: BTreeMap::new(),
            handles: BTreeMap::new(),
            next_inode: 1,
            next_handle: 1,
            root: 0,
        };
        // The root is never named by an entry; its link count stands
        // in for the mount reference so the destroy check never fires
        // on it.
        let root = state.create_inode_dir(0o755);
        state.inode_mut(root).nlink = 1;
        state.root = root;

        Arc::new(Self {
            lock: FsLock::new(),
            state: RwLock::new(state),
        })
    }

    /// Number of live inodes (root included)
    pub fn inode_count(&self) -> usize {
        self.state.read().inodes.len()
    }

    /// Number of open handles
    pub fn open_handle_count(&self) -> usize {
        self.state.read().handles.len()
    }
}

impl Filesystem for Ramfs {
    fn get_entry(&self, dir: Option<InodeId>, name: &str) -> FsPathEntry {
        let state = self.state.read();
        let root = state.root;

        // Seed of a path walk: the root itself
        if dir.is_none() && name.is_empty() {
            return FsPathEntry {
                inode: Some(root),
                dir_inode: Some(root),
                kind: VfsEntryKind::Dir,
            };
        }

        let dir_id = dir.unwrap_or(root);
        match state.dir_get_entry_by_name(dir_id, name) {
            Some(id) => FsPathEntry {
                inode: Some(id),
                dir_inode: Some(dir_id),
                kind: state.inode(id).kind(),
            },
            None => FsPathEntry::not_found(Some(dir_id)),
        }
    }

    fn open(&self, path: &ResolvedPath) -> KernelResult<HandleId> {
        let inode = path.entry.inode.ok_or(KernelError::NotFound)?;

        let mut state = self.state.write();
        // A resolution taken outside the lock window can name an inode
        // that has since been unlinked and destroyed; that is a miss,
        // not a dangling id.
        let node = state.inodes.get_mut(&inode).ok_or(KernelError::NotFound)?;
        node.ref_count += 1;

        let handle = state.next_handle;
        state.next_handle += 1;
        state.handles.insert(handle, OpenFile { inode, pos: 0 });
        Ok(handle)
    }

    fn close(&self, handle: HandleId) {
        let mut state = self.state.write();
        let open = state.handles.remove(&handle).expect("closing unknown handle");
        state.inode_mut(open.inode).ref_count -= 1;
        // Same condition unlink checks; the later of the two frees the
        // inode
        state.destroy_if_unused(open.inode);
    }

    fn dup(&self, handle: HandleId) -> KernelResult<HandleId> {
        let mut state = self.state.write();
        let open = *state.handles.get(&handle).ok_or(KernelError::BadHandle)?;
        state.inode_mut(open.inode).ref_count += 1;

        let new_handle = state.next_handle;
        state.next_handle += 1;
        state.handles.insert(new_handle, open);
        Ok(new_handle)
    }

    fn read(&self, handle: HandleId, buf: &mut [u8]) -> KernelResult<usize> {
        let mut state = self.state.write();
        let open = *state.handles.get(&handle).ok_or(KernelError::BadHandle)?;

        let data = match &state.inode(open.inode).payload {
            InodePayload::File(data) => data,
            InodePayload::Dir(_) => return Err(KernelError::IsDirectory),
        };

        let pos = open.pos as usize;
        if pos >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - pos);
        buf[..n].copy_from_slice(&data[pos..pos + n]);

        state.handles.get_mut(&handle).expect("handle vanished").pos += n as u64;
        Ok(n)
    }

    fn write(&self, handle: HandleId, data: &[u8]) -> KernelResult<usize> {
        let mut state = self.state.write();
        let open = *state.handles.get(&handle).ok_or(KernelError::BadHandle)?;

        let file = match &mut state.inode_mut(open.inode).payload {
            InodePayload::File(file) => file,
            InodePayload::Dir(_) => return Err(KernelError::IsDirectory),
        };

        let pos = open.pos as usize;
        if pos.checked_add(data.len()).map_or(true, |end| end > MAX_FILE_SIZE) {
            return Err(KernelError::OutOfMemory);
        }

        // Writing past the end zero-fills the gap
        if pos > file.len() {
            file.resize(pos, 0);
        }

        let overwrite = data.len().min(file.len().saturating_sub(pos));
        file[pos..pos + overwrite].copy_from_slice(&data[..overwrite]);
        file.extend_from_slice(&data[overwrite..]);

        state.handles.get_mut(&handle).expect("handle vanished").pos += data.len() as u64;
        Ok(data.len())
    }

    fn seek(&self, handle: HandleId, pos: u64) -> KernelResult<()> {
        if pos > MAX_FILE_SIZE as u64 {
            return Err(KernelError::InvalidArgument);
        }

        let mut state = self.state.write();
        let open = state.handles.get_mut(&handle).ok_or(KernelError::BadHandle)?;
        open.pos = pos;
        Ok(())
    }

    fn getdents(&self, handle: HandleId) -> KernelResult<Vec<DirEnt>> {
        let state = self.state.read();
        let open = state.handles.get(&handle).ok_or(KernelError::BadHandle)?;

        let children = match &state.inode(open.inode).payload {
            InodePayload::Dir(children) => children,
            InodePayload::File(_) => return Err(KernelError::NotDirectory),
        };

        Ok(children
            .iter()
            .map(|(name, &id)| DirEnt {
                inode: id,
                kind: state.inode(id).kind(),
                name: name.clone(),
            })
            .collect())
    }

    fn create(&self, path: &ResolvedPath, mode: u16) -> KernelResult<()> {
        assert!(self.lock.holding_exlock(), "create without exlock");

        if path.entry.inode.is_some() {
            return Err(KernelError::AlreadyExists);
        }
        let dir = path.entry.dir_inode.ok_or(KernelError::NotFound)?;

        let mut state = self.state.write();
        if state.inode(dir).kind() != VfsEntryKind::Dir {
            return Err(KernelError::NotDirectory);
        }
        if state.inode(dir).mode & MODE_OWNER_WRITE == 0 {
            return Err(KernelError::PermissionDenied);
        }

        let file = state.create_inode_file(mode);
        state.dir_add_entry(dir, &path.last_comp, file)
    }

    fn unlink(&self, path: &ResolvedPath) -> KernelResult<()> {
        assert!(self.lock.holding_exlock(), "unlink without exlock");

        let inode = path.entry.inode.ok_or(KernelError::NotFound)?;
        let dir = path.entry.dir_inode.expect("entry without parent");

        let mut state = self.state.write();
        if state.inode(inode).kind() == VfsEntryKind::Dir {
            return Err(KernelError::IsDirectory);
        }
        if state.inode(dir).mode & MODE_OWNER_WRITE == 0 {
            return Err(KernelError::PermissionDenied);
        }

        let target = state.dir_remove_entry(dir, &path.last_comp);
        debug_assert_eq!(target, inode);
        state.destroy_if_unused(inode);
        Ok(())
    }

    fn mkdir(&self, path: &ResolvedPath, mode: u16) -> KernelResult<()> {
        assert!(self.lock.holding_exlock(), "mkdir without exlock");

        if path.entry.inode.is_some() {
            return Err(KernelError::AlreadyExists);
        }
        let dir = path.entry.dir_inode.ok_or(KernelError::NotFound)?;

        let mut state = self.state.write();
        if state.inode(dir).kind() != VfsEntryKind::Dir {
            return Err(KernelError::NotDirectory);
        }
        if state.inode(dir).mode & MODE_OWNER_WRITE == 0 {
            return Err(KernelError::PermissionDenied);
        }

        let new_dir = state.create_inode_dir(mode);
        state.dir_add_entry(dir, &path.last_comp, new_dir)
    }

    fn rmdir(&self, path: &ResolvedPath) -> KernelResult<()> {
        assert!(self.lock.holding_exlock(), "rmdir without exlock");

        let inode = path.entry.inode.ok_or(KernelError::NotFound)?;
        let dir = path.entry.dir_inode.expect("entry without parent");

        let mut state = self.state.write();
        if inode == state.root {
            return Err(KernelError::Busy);
        }
        match &state.inode(inode).payload {
            InodePayload::File(_) => return Err(KernelError::NotDirectory),
            InodePayload::Dir(children) => {
                if !children.is_empty() {
                    return Err(KernelError::DirectoryNotEmpty);
                }
            }
        }
        if state.inode(dir).mode & MODE_OWNER_WRITE == 0 {
            return Err(KernelError::PermissionDenied);
        }

        state.dir_remove_entry(dir, &path.last_comp);
        state.destroy_if_unused(inode);
        Ok(())
    }

    fn fstat(&self, handle: HandleId) -> KernelResult<Stat> {
        let state = self.state.read();
        let open = state.handles.get(&handle).ok_or(KernelError::BadHandle)?;
        let inode = state.inode(open.inode);

        Ok(Stat {
            inode: open.inode,
            kind: inode.kind(),
            mode: inode.mode,
            nlink: inode.nlink,
            size: match &inode.payload {
                InodePayload::File(data) => data.len() as u64,
                InodePayload::Dir(_) => 0,
            },
        })
    }

    fn fs_exlock(&self) {
        self.lock.exlock();
    }

    fn fs_exunlock(&self) {
        self.lock.exunlock();
    }

    fn fs_shlock(&self) {
        self.lock.shlock();
    }

    fn fs_shunlock(&self) {
        self.lock.shunlock();
    }
}
