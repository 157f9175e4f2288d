//! Filesystem layer
//!
//! - [`vfs`]: the `Filesystem` trait, shared types, the per-fs lock
//! - [`ramfs`]: the in-memory filesystem
//! - [`mount`]: the mount table with longest-prefix lookup
//! - [`resolve`]: component-by-component path resolution
//!
//! The free functions below are the kernel-facing entry points. Each
//! one routes the path through the mount table, takes the matched
//! filesystem's lock on the side the operation needs (shared for
//! lookups, exclusive for namespace mutations), resolves the remainder
//! and dispatches the trait operation. Resolution and operation happen
//! under one lock acquisition, so the entry an operation acts on is
//! the entry that was resolved.

pub mod mount;
pub mod ramfs;
pub mod resolve;
pub mod vfs;

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use mount::MountTable;
use resolve::vfs_resolve;
use vfs::{DirEnt, FileHandle, Stat};

use crate::{KernelError, KernelResult};

/// Append a trailing slash so a final-component miss resolves to a
/// not-found terminal instead of failing (create-style lookups)
fn with_create_terminal(path: &str) -> String {
    if path.ends_with('/') {
        String::from(path)
    } else {
        format!("{}/", path)
    }
}

/// Open the file or directory at `path`
pub fn vfs_open(mt: &MountTable, path: &str) -> KernelResult<FileHandle> {
    let (fs, remainder) = mt.get_retained_fs_at(path).ok_or(KernelError::NotFound)?;

    fs.fs_shlock();
    let res = vfs_resolve(&*fs, remainder).and_then(|rp| fs.open(&rp));
    fs.fs_shunlock();

    res.map(|id| FileHandle::new(fs, id))
}

/// Create an empty file at `path`
pub fn vfs_create(mt: &MountTable, path: &str, mode: u16) -> KernelResult<()> {
    let path = with_create_terminal(path);
    let (fs, remainder) = mt.get_retained_fs_at(&path).ok_or(KernelError::NotFound)?;

    fs.fs_exlock();
    let res = vfs_resolve(&*fs, remainder).and_then(|rp| fs.create(&rp, mode));
    fs.fs_exunlock();
    res
}

/// Create a directory at `path`
pub fn vfs_mkdir(mt: &MountTable, path: &str, mode: u16) -> KernelResult<()> {
    let path = with_create_terminal(path);
    let (fs, remainder) = mt.get_retained_fs_at(&path).ok_or(KernelError::NotFound)?;

    fs.fs_exlock();
    let res = vfs_resolve(&*fs, remainder).and_then(|rp| fs.mkdir(&rp, mode));
    fs.fs_exunlock();
    res
}

/// Remove the file at `path`
pub fn vfs_unlink(mt: &MountTable, path: &str) -> KernelResult<()> {
    let (fs, remainder) = mt.get_retained_fs_at(path).ok_or(KernelError::NotFound)?;

    fs.fs_exlock();
    let res = vfs_resolve(&*fs, remainder).and_then(|rp| fs.unlink(&rp));
    fs.fs_exunlock();
    res
}

/// Remove the empty directory at `path`
pub fn vfs_rmdir(mt: &MountTable, path: &str) -> KernelResult<()> {
    let (fs, remainder) = mt.get_retained_fs_at(path).ok_or(KernelError::NotFound)?;

    fs.fs_exlock();
    let res = vfs_resolve(&*fs, remainder).and_then(|rp| fs.rmdir(&rp));
    fs.fs_exunlock();
    res
}

/// Metadata for the entry at `path`
pub fn vfs_stat(mt: &MountTable, path: &str) -> KernelResult<Stat> {
    let (fs, remainder) = mt.get_retained_fs_at(path).ok_or(KernelError::NotFound)?;

    // The transient handle lives entirely inside the lock window, so
    // the inode cannot be unlinked out from under it.
    fs.fs_shlock();
    let res = vfs_resolve(&*fs, remainder).and_then(|rp| {
        let handle = fs.open(&rp)?;
        let stat = fs.fstat(handle);
        fs.close(handle);
        stat
    });
    fs.fs_shunlock();
    res
}

/// List the directory at `path`
pub fn vfs_getdents(mt: &MountTable, path: &str) -> KernelResult<Vec<DirEnt>> {
    let (fs, remainder) = mt.get_retained_fs_at(path).ok_or(KernelError::NotFound)?;

    fs.fs_shlock();
    let res = vfs_resolve(&*fs, remainder).and_then(|rp| {
        let handle = fs.open(&rp)?;
        let ents = fs.getdents(handle);
        fs.close(handle);
        ents
    });
    fs.fs_shunlock();
    res
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use super::ramfs::Ramfs;
    use super::vfs::{
        Filesystem, FsLock, FsPathEntry, HandleId, InodeId, ResolvedPath, VfsEntryKind,
    };
    use super::*;

    /// Delegates to an inner filesystem while checking that every
    /// lookup-side call arrives inside a lock window.
    struct LockCheckedFs {
        lock: FsLock,
        inner: Arc<dyn Filesystem>,
    }

    impl LockCheckedFs {
        fn wrap(inner: Arc<dyn Filesystem>) -> Arc<Self> {
            Arc::new(Self {
                lock: FsLock::new(),
                inner,
            })
        }

        fn assert_locked(&self) {
            assert!(
                self.lock.holding_shlock() || self.lock.holding_exlock(),
                "filesystem op outside the lock window"
            );
        }
    }

    impl Filesystem for LockCheckedFs {
        fn get_entry(&self, dir: Option<InodeId>, name: &str) -> FsPathEntry {
            self.assert_locked();
            self.inner.get_entry(dir, name)
        }

        fn open(&self, path: &ResolvedPath) -> KernelResult<HandleId> {
            self.assert_locked();
            self.inner.open(path)
        }

        fn close(&self, handle: HandleId) {
            self.assert_locked();
            self.inner.close(handle)
        }

        fn dup(&self, handle: HandleId) -> KernelResult<HandleId> {
            self.inner.dup(handle)
        }

        fn read(&self, handle: HandleId, buf: &mut [u8]) -> KernelResult<usize> {
            self.inner.read(handle, buf)
        }

        fn write(&self, handle: HandleId, data: &[u8]) -> KernelResult<usize> {
            self.inner.write(handle, data)
        }

        fn seek(&self, handle: HandleId, pos: u64) -> KernelResult<()> {
            self.inner.seek(handle, pos)
        }

        fn getdents(&self, handle: HandleId) -> KernelResult<Vec<DirEnt>> {
            self.assert_locked();
            self.inner.getdents(handle)
        }

        fn create(&self, path: &ResolvedPath, mode: u16) -> KernelResult<()> {
            self.assert_locked();
            self.inner.create(path, mode)
        }

        fn unlink(&self, path: &ResolvedPath) -> KernelResult<()> {
            self.assert_locked();
            self.inner.unlink(path)
        }

        fn mkdir(&self, path: &ResolvedPath, mode: u16) -> KernelResult<()> {
            self.assert_locked();
            self.inner.mkdir(path, mode)
        }

        fn rmdir(&self, path: &ResolvedPath) -> KernelResult<()> {
            self.assert_locked();
            self.inner.rmdir(path)
        }

        fn fstat(&self, handle: HandleId) -> KernelResult<Stat> {
            self.assert_locked();
            self.inner.fstat(handle)
        }

        // Both locks are taken so the inner filesystem's own holder
        // assertions keep firing too.
        fn fs_exlock(&self) {
            self.lock.exlock();
            self.inner.fs_exlock();
        }

        fn fs_exunlock(&self) {
            self.inner.fs_exunlock();
            self.lock.exunlock();
        }

        fn fs_shlock(&self) {
            self.lock.shlock();
            self.inner.fs_shlock();
        }

        fn fs_shunlock(&self) {
            self.inner.fs_shunlock();
            self.lock.shunlock();
        }
    }

    /// Root ramfs plus a second ramfs at /mnt/data
    fn system() -> MountTable {
        let mt = MountTable::new();
        mt.mount("/", Ramfs::create() as Arc<dyn Filesystem>)
            .unwrap();
        vfs_mkdir(&mt, "/mnt", 0o755).unwrap();
        vfs_mkdir(&mt, "/mnt/data", 0o755).unwrap();
        mt.mount("/mnt/data", Ramfs::create() as Arc<dyn Filesystem>)
            .unwrap();
        mt
    }

    #[test]
    fn create_open_read_write_across_the_vfs() {
        let mt = system();

        vfs_create(&mt, "/mnt/data/file", 0o644).unwrap();
        let h = vfs_open(&mt, "/mnt/data/file").unwrap();
        h.write(b"payload").unwrap();
        h.seek(0).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(h.read(&mut buf).unwrap(), 7);
        assert_eq!(&buf[..7], b"payload");
        h.close();
    }

    #[test]
    fn mounted_fs_shadows_the_root_fs() {
        let mt = system();

        // The file lands in the data fs, not in the root fs's
        // /mnt/data directory
        vfs_create(&mt, "/mnt/data/file", 0o644).unwrap();
        let ents = vfs_getdents(&mt, "/mnt/data").unwrap();
        assert_eq!(ents.len(), 1);
        assert_eq!(ents[0].name, "file");

        // The root fs's own /mnt/data directory stays empty; listing
        // /mnt shows only the directory entry itself
        let ents = vfs_getdents(&mt, "/mnt").unwrap();
        assert_eq!(ents.len(), 1);
        assert_eq!(ents[0].name, "data");
    }

    #[test]
    fn stat_reports_kind_and_size() {
        let mt = system();
        vfs_create(&mt, "/f", 0o644).unwrap();

        let h = vfs_open(&mt, "/f").unwrap();
        h.write(b"12345").unwrap();
        h.close();

        let st = vfs_stat(&mt, "/f").unwrap();
        assert_eq!(st.kind, VfsEntryKind::File);
        assert_eq!(st.size, 5);
        assert_eq!(st.nlink, 1);

        let st = vfs_stat(&mt, "/mnt").unwrap();
        assert_eq!(st.kind, VfsEntryKind::Dir);
    }

    #[test]
    fn unlink_and_rmdir_through_the_vfs() {
        let mt = system();

        vfs_mkdir(&mt, "/d", 0o755).unwrap();
        vfs_create(&mt, "/d/f", 0o644).unwrap();

        assert_eq!(
            vfs_rmdir(&mt, "/d").unwrap_err(),
            KernelError::DirectoryNotEmpty
        );
        vfs_unlink(&mt, "/d/f").unwrap();
        vfs_rmdir(&mt, "/d").unwrap();

        assert_eq!(vfs_open(&mt, "/d").unwrap_err(), KernelError::NotFound);
    }

    #[test]
    fn open_handle_keeps_a_mount_busy() {
        let mt = system();

        vfs_create(&mt, "/mnt/data/f", 0o644).unwrap();
        let h = vfs_open(&mt, "/mnt/data/f").unwrap();

        assert_eq!(mt.umount("/mnt/data").unwrap_err(), KernelError::Busy);

        h.close();
        mt.umount("/mnt/data").unwrap();
        assert_eq!(mt.umount("/mnt/data").unwrap_err(), KernelError::NotFound);
    }

    #[test]
    fn dup_through_the_handle_type() {
        let mt = system();
        vfs_create(&mt, "/f", 0o644).unwrap();

        let h = vfs_open(&mt, "/f").unwrap();
        h.write(b"abc").unwrap();

        let d = h.dup().unwrap();
        vfs_unlink(&mt, "/f").unwrap();
        h.close();

        // The dup still reads the unlinked file
        d.seek(0).unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(d.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"abc");
        d.close();
    }

    #[test]
    fn stat_and_getdents_stay_inside_one_lock_window() {
        let mt = MountTable::new();
        let fs = LockCheckedFs::wrap(Ramfs::create() as Arc<dyn Filesystem>);
        mt.mount("/", fs as Arc<dyn Filesystem>).unwrap();

        vfs_mkdir(&mt, "/d", 0o755).unwrap();
        vfs_create(&mt, "/d/f", 0o644).unwrap();

        // Resolution, the transient open, the operation and the close
        // must all run under the shared lock; the checker panics on
        // any call that arrives after the lock is dropped.
        let st = vfs_stat(&mt, "/d/f").unwrap();
        assert_eq!(st.kind, VfsEntryKind::File);

        let ents = vfs_getdents(&mt, "/d").unwrap();
        assert_eq!(ents.len(), 1);
        assert_eq!(ents[0].name, "f");

        vfs_unlink(&mt, "/d/f").unwrap();
        vfs_rmdir(&mt, "/d").unwrap();
    }

    #[test]
    fn errors_propagate_through_wrappers() {
        let mt = system();

        assert_eq!(vfs_open(&mt, "/nope").unwrap_err(), KernelError::NotFound);
        assert_eq!(vfs_unlink(&mt, "/nope").unwrap_err(), KernelError::NotFound);
        assert_eq!(
            vfs_mkdir(&mt, "/mnt", 0o755).unwrap_err(),
            KernelError::AlreadyExists
        );

        vfs_create(&mt, "/f", 0o644).unwrap();
        assert_eq!(
            vfs_getdents(&mt, "/f").unwrap_err(),
            KernelError::NotDirectory
        );
    }
}
