//! Mount table
//!
//! Maps path prefixes to filesystem instances. Lookup picks the
//! longest matching mountpoint and returns the path remainder relative
//! to it, always absolute: the remainder starts at the final matched
//! slash, or is "/" when the match consumed the whole input.
//!
//! Retention is ownership-explicit: `get_retained_fs_at` hands out an
//! `Arc` clone, and dropping it is the release. `umount` refuses to
//! remove a filesystem that still has outside references.

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::RwLock;

use super::vfs::Filesystem;
use crate::{KernelError, KernelResult};

struct Mountpoint {
    /// Mount path, normalized with a trailing slash
    path: String,
    fs: Arc<dyn Filesystem>,
}

/// The system's mount table
pub struct MountTable {
    mounts: RwLock<Vec<Mountpoint>>,
}

impl MountTable {
    /// Create an empty mount table
    pub const fn new() -> Self {
        Self {
            mounts: RwLock::new(Vec::new()),
        }
    }

    /// Mount a filesystem at an absolute path
    pub fn mount(&self, path: &str, fs: Arc<dyn Filesystem>) -> KernelResult<()> {
        assert!(path.starts_with('/'), "mount path must be absolute");
        let norm = normalize(path);

        let mut mounts = self.mounts.write();
        if mounts.iter().any(|m| m.path == norm) {
            return Err(KernelError::AlreadyExists);
        }

        crate::printkln!("vfs: mounted {}", norm);
        mounts.push(Mountpoint { path: norm, fs });
        Ok(())
    }

    /// Unmount the filesystem at a path
    ///
    /// Fails with Busy while anything outside the table still retains
    /// the filesystem.
    pub fn umount(&self, path: &str) -> KernelResult<()> {
        let norm = normalize(path);

        let mut mounts = self.mounts.write();
        let pos = mounts
            .iter()
            .position(|m| m.path == norm)
            .ok_or(KernelError::NotFound)?;

        // The table's own Arc is the only reference allowed to remain
        if Arc::strong_count(&mounts[pos].fs) > 1 {
            return Err(KernelError::Busy);
        }

        mounts.remove(pos);
        crate::printkln!("vfs: unmounted {}", norm);
        Ok(())
    }

    /// Number of active mounts
    pub fn mount_count(&self) -> usize {
        self.mounts.read().len()
    }

    /// Find the filesystem responsible for `path`
    ///
    /// Returns a retained filesystem reference and the remainder of
    /// the path relative to its mountpoint. None when nothing matches
    /// (an empty table, or no "/" mount covering the path).
    pub fn get_retained_fs_at<'p>(
        &self,
        path: &'p str,
    ) -> Option<(Arc<dyn Filesystem>, &'p str)> {
        assert!(path.starts_with('/'), "path must be absolute");

        let mounts = self.mounts.read();

        let mut best: Option<(&Mountpoint, usize)> = None;
        for mp in mounts.iter() {
            let match_len = mp_check_match(&mp.path, path);
            if match_len > best.map_or(0, |(_, len)| len) {
                best = Some((mp, match_len));
            }
        }

        let (mp, match_len) = best?;
        let remainder = if match_len <= path.len() {
            // Start at the final matched slash, keeping the remainder
            // absolute
            &path[match_len - 1..]
        } else {
            // The input was the mount path minus its trailing slash
            "/"
        };
        Some((mp.fs.clone(), remainder))
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(path: &str) -> String {
    if path.ends_with('/') {
        String::from(path)
    } else {
        format!("{}/", path)
    }
}

/// Match length of `path` against a mountpoint path, 0 if no match
///
/// `mount_path` carries its trailing slash, so prefix matches only
/// happen on component boundaries ("/mnt/data/" does not match
/// "/mnt/database"). The bare mount path without the slash also
/// matches.
fn mp_check_match(mount_path: &str, path: &str) -> usize {
    if path.starts_with(mount_path) || path == &mount_path[..mount_path.len() - 1] {
        mount_path.len()
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ramfs::Ramfs;

    fn table_with_two_mounts() -> (MountTable, Arc<Ramfs>, Arc<Ramfs>) {
        let mt = MountTable::new();
        let root = Ramfs::create();
        let data = Ramfs::create();
        mt.mount("/", root.clone() as Arc<dyn Filesystem>).unwrap();
        mt.mount("/mnt/data", data.clone() as Arc<dyn Filesystem>)
            .unwrap();
        (mt, root, data)
    }

    fn is_same_fs(a: &Arc<dyn Filesystem>, b: &Arc<Ramfs>) -> bool {
        Arc::ptr_eq(a, &(b.clone() as Arc<dyn Filesystem>))
    }

    #[test]
    fn longest_prefix_wins() {
        let (mt, _root, data) = table_with_two_mounts();

        let (fs, rem) = mt.get_retained_fs_at("/mnt/data/file").unwrap();
        assert!(is_same_fs(&fs, &data));
        assert_eq!(rem, "/file");
    }

    #[test]
    fn unmatched_paths_fall_to_root_mount() {
        let (mt, root, _data) = table_with_two_mounts();

        let (fs, rem) = mt.get_retained_fs_at("/etc/x").unwrap();
        assert!(is_same_fs(&fs, &root));
        assert_eq!(rem, "/etc/x");

        let (fs, rem) = mt.get_retained_fs_at("/").unwrap();
        assert!(is_same_fs(&fs, &root));
        assert_eq!(rem, "/");
    }

    #[test]
    fn exact_match_yields_root_remainder() {
        let (mt, _root, data) = table_with_two_mounts();

        let (fs, rem) = mt.get_retained_fs_at("/mnt/data").unwrap();
        assert!(is_same_fs(&fs, &data));
        assert_eq!(rem, "/");

        let (fs, rem) = mt.get_retained_fs_at("/mnt/data/").unwrap();
        assert!(is_same_fs(&fs, &data));
        assert_eq!(rem, "/");
    }

    #[test]
    fn prefix_matches_only_whole_components() {
        let (mt, root, _data) = table_with_two_mounts();

        // "/mnt/database" shares the string prefix but not the
        // component, so it belongs to the root mount
        let (fs, rem) = mt.get_retained_fs_at("/mnt/database").unwrap();
        assert!(is_same_fs(&fs, &root));
        assert_eq!(rem, "/mnt/database");
    }

    #[test]
    fn empty_table_matches_nothing() {
        let mt = MountTable::new();
        assert!(mt.get_retained_fs_at("/anything").is_none());
    }

    #[test]
    fn duplicate_mount_is_rejected() {
        let (mt, root, _data) = table_with_two_mounts();
        let err = mt
            .mount("/mnt/data/", root as Arc<dyn Filesystem>)
            .unwrap_err();
        assert_eq!(err, KernelError::AlreadyExists);
    }

    #[test]
    fn umount_busy_while_retained() {
        let (mt, _root, data) = table_with_two_mounts();

        let (held, _rem) = mt.get_retained_fs_at("/mnt/data/f").unwrap();
        drop(data); // test helper's own clone does not count
        assert_eq!(mt.umount("/mnt/data").unwrap_err(), KernelError::Busy);

        drop(held);
        mt.umount("/mnt/data").unwrap();
        assert_eq!(mt.mount_count(), 1);
    }

    #[test]
    fn umount_of_unknown_path_fails() {
        let (mt, _root, _data) = table_with_two_mounts();
        assert_eq!(mt.umount("/nope").unwrap_err(), KernelError::NotFound);
    }
}
