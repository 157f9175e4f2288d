//! Filesystem trait and shared VFS types
//!
//! Every filesystem implementation exposes one capability set, the
//! [`Filesystem`] trait. The VFS dispatches through it after picking
//! the instance via the mount table and resolving the path.
//!
//! ## Locking model
//!
//! Each filesystem carries one reader/writer lock ([`FsLock`]).
//! Read-only path operations (open, stat) run under the shared side,
//! namespace mutations (unlink, mkdir, rmdir) under the exclusive
//! side. The VFS wrappers in `fs::mod` take the correct side around
//! resolve-plus-operation; the mutating trait ops assert that the
//! exclusive lock is held.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use core::sync::atomic::{AtomicUsize, Ordering};

use spin::RwLock;

use crate::KernelResult;

/// Inode number, stable for the life of the inode
pub type InodeId = u64;

/// Open-file handle id, scoped to one filesystem instance
pub type HandleId = u64;

/// What a resolved directory entry refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsEntryKind {
    /// No entry with that name (a "not found" terminal)
    None,
    /// Regular file
    File,
    /// Directory
    Dir,
}

/// One step of a path walk: the entry and the directory it was found in
#[derive(Debug, Clone, Copy)]
pub struct FsPathEntry {
    /// Inode of the entry, None when the name did not resolve
    pub inode: Option<InodeId>,
    /// Inode of the containing directory
    pub dir_inode: Option<InodeId>,
    /// Kind of the entry
    pub kind: VfsEntryKind,
}

impl FsPathEntry {
    /// A lookup miss inside `dir_inode`
    pub fn not_found(dir_inode: Option<InodeId>) -> Self {
        Self {
            inode: None,
            dir_inode,
            kind: VfsEntryKind::None,
        }
    }
}

/// Outcome of a full path resolution
///
/// `last_comp` keeps the final component's name even when the entry
/// does not exist, so create-style callers (mkdir, file creation) know
/// what to add to `entry.dir_inode`.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    /// The terminal entry
    pub entry: FsPathEntry,
    /// Name of the last path component ("" for the root path)
    pub last_comp: String,
}

/// File metadata
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    /// Inode number
    pub inode: InodeId,
    /// Entry kind
    pub kind: VfsEntryKind,
    /// Permission bits
    pub mode: u16,
    /// Number of directory entries referring to the inode
    pub nlink: u32,
    /// Size in bytes (files only)
    pub size: u64,
}

/// One directory entry as returned by getdents
#[derive(Debug, Clone)]
pub struct DirEnt {
    /// Inode number
    pub inode: InodeId,
    /// Entry kind
    pub kind: VfsEntryKind,
    /// Entry name
    pub name: String,
}

/// The filesystem capability set
///
/// Path-taking operations receive an already [`ResolvedPath`]; the VFS
/// does the walking. Handle-taking operations receive a `HandleId`
/// previously returned by `open` or `dup` on the same instance.
pub trait Filesystem: Send + Sync {
    /// Look up `name` inside a directory
    ///
    /// `dir` of None means the filesystem root itself (used to seed a
    /// path walk). A miss is not an error: it returns an entry with
    /// `inode: None`.
    fn get_entry(&self, dir: Option<InodeId>, name: &str) -> FsPathEntry;

    /// Open the resolved entry, retaining its inode
    fn open(&self, path: &ResolvedPath) -> KernelResult<HandleId>;

    /// Close a handle, releasing the inode retain
    ///
    /// Destroys the inode if it has no links and no remaining retains.
    fn close(&self, handle: HandleId);

    /// Duplicate a handle (new cursor, extra inode retain)
    fn dup(&self, handle: HandleId) -> KernelResult<HandleId>;

    /// Read from the handle's cursor
    fn read(&self, handle: HandleId, buf: &mut [u8]) -> KernelResult<usize>;

    /// Write at the handle's cursor, extending the file as needed
    fn write(&self, handle: HandleId, data: &[u8]) -> KernelResult<usize>;

    /// Move the handle's cursor
    fn seek(&self, handle: HandleId, pos: u64) -> KernelResult<()>;

    /// List the directory the handle refers to
    fn getdents(&self, handle: HandleId) -> KernelResult<Vec<DirEnt>>;

    /// Create a file where resolution found a miss
    ///
    /// Caller must hold the exclusive lock.
    fn create(&self, path: &ResolvedPath, mode: u16) -> KernelResult<()>;

    /// Remove a file's directory entry
    ///
    /// Caller must hold the exclusive lock.
    fn unlink(&self, path: &ResolvedPath) -> KernelResult<()>;

    /// Create a directory where resolution found a miss
    ///
    /// Caller must hold the exclusive lock.
    fn mkdir(&self, path: &ResolvedPath, mode: u16) -> KernelResult<()>;

    /// Remove an empty directory
    ///
    /// Caller must hold the exclusive lock.
    fn rmdir(&self, path: &ResolvedPath) -> KernelResult<()>;

    /// Metadata for the handle's inode
    fn fstat(&self, handle: HandleId) -> KernelResult<Stat>;

    /// Take the filesystem lock exclusively
    fn fs_exlock(&self);
    /// Release the exclusive lock
    fn fs_exunlock(&self);
    /// Take the filesystem lock shared
    fn fs_shlock(&self);
    /// Release the shared lock
    fn fs_shunlock(&self);
}

/// Per-filesystem reader/writer lock with explicit acquire/release
///
/// The VFS locking protocol spans multiple calls (lock, resolve,
/// operate, unlock), so guards cannot express it; acquisition forgets
/// the guard and release force-unlocks, the `inode_lock` pattern.
/// Holder counters let operations assert the lock state they require.
///
/// The counters are not owner-aware: `holding_exlock` reports that the
/// exclusive side is held by someone, not that the asking caller holds
/// it. Per-owner tracking needs the current task id, which the fs
/// layer only gets once the scheduler is wired to it.
pub struct FsLock {
    rwsem: RwLock<()>,
    /// 1 while the exclusive side is held
    writers: AtomicUsize,
    /// Number of shared holders
    readers: AtomicUsize,
}

impl FsLock {
    /// Create an unlocked FsLock
    pub const fn new() -> Self {
        Self {
            rwsem: RwLock::new(()),
            writers: AtomicUsize::new(0),
            readers: AtomicUsize::new(0),
        }
    }

    /// Acquire the exclusive side
    pub fn exlock(&self) {
        let guard = self.rwsem.write();
        core::mem::forget(guard);
        self.writers.store(1, Ordering::Release);
    }

    /// Release the exclusive side
    ///
    /// Must pair with a prior `exlock` by the same caller.
    pub fn exunlock(&self) {
        assert!(self.holding_exlock(), "exunlock without exlock");
        self.writers.store(0, Ordering::Release);
        unsafe { self.rwsem.force_write_unlock() };
    }

    /// Acquire the shared side
    pub fn shlock(&self) {
        let guard = self.rwsem.read();
        core::mem::forget(guard);
        self.readers.fetch_add(1, Ordering::AcqRel);
    }

    /// Release the shared side
    ///
    /// Must pair with a prior `shlock` by the same caller.
    pub fn shunlock(&self) {
        let prev = self.readers.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "shunlock without shlock");
        unsafe { self.rwsem.force_read_decrement() };
    }

    /// Is the exclusive side held?
    pub fn holding_exlock(&self) -> bool {
        self.writers.load(Ordering::Acquire) == 1
    }

    /// Is the shared side held?
    pub fn holding_shlock(&self) -> bool {
        self.readers.load(Ordering::Acquire) > 0
    }
}

impl Default for FsLock {
    fn default() -> Self {
        Self::new()
    }
}

/// An open file: the owning filesystem plus its handle id
///
/// Closes the underlying handle on drop, so handle lifetime follows
/// ownership. Stored in the process handle table.
pub struct FileHandle {
    fs: Arc<dyn Filesystem>,
    id: HandleId,
}

impl FileHandle {
    /// Wrap a handle returned by `fs.open`/`fs.dup`
    pub fn new(fs: Arc<dyn Filesystem>, id: HandleId) -> Self {
        Self { fs, id }
    }

    /// The filesystem this handle belongs to
    pub fn fs(&self) -> &Arc<dyn Filesystem> {
        &self.fs
    }

    /// The raw handle id
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Duplicate: new independent cursor on the same inode
    pub fn dup(&self) -> KernelResult<FileHandle> {
        let id = self.fs.dup(self.id)?;
        Ok(FileHandle {
            fs: self.fs.clone(),
            id,
        })
    }

    /// Read at the cursor
    pub fn read(&self, buf: &mut [u8]) -> KernelResult<usize> {
        self.fs.read(self.id, buf)
    }

    /// Write at the cursor
    pub fn write(&self, data: &[u8]) -> KernelResult<usize> {
        self.fs.write(self.id, data)
    }

    /// Move the cursor
    pub fn seek(&self, pos: u64) -> KernelResult<()> {
        self.fs.seek(self.id, pos)
    }

    /// List directory contents
    pub fn getdents(&self) -> KernelResult<Vec<DirEnt>> {
        self.fs.getdents(self.id)
    }

    /// Metadata for the underlying inode
    pub fn fstat(&self) -> KernelResult<Stat> {
        self.fs.fstat(self.id)
    }

    /// Close the handle (consumes it; drop does the same)
    pub fn close(self) {}
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        self.fs.close(self.id);
    }
}

impl core::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileHandle").field("id", &self.id).finish()
    }
}
