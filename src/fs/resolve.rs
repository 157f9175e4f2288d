//! Path resolution
//!
//! Walks a path component by component through a filesystem's
//! `get_entry`, carrying along the directory each entry was found in.
//! Paths must be caller-normalized: absolute, no consecutive slashes.
//! At most one trailing slash is allowed and is meaningful:
//!
//! - A miss on a non-final component fails with NotFound.
//! - A miss on the final component fails with NotFound too, unless the
//!   path has a trailing slash: then resolution succeeds with a
//!   "not found" terminal (inode None), which is what create-style
//!   callers use to learn the parent directory and the new name.
//! - A trailing slash on an existing non-directory fails with
//!   NotDirectory.

use alloc::string::String;

use super::vfs::{Filesystem, ResolvedPath, VfsEntryKind};
use crate::{KernelError, KernelResult};

/// Resolve an absolute path within one filesystem
pub fn vfs_resolve<F: Filesystem + ?Sized>(fs: &F, path: &str) -> KernelResult<ResolvedPath> {
    assert!(path.starts_with('/'), "path must be absolute");
    assert!(!path.contains("//"), "path must be normalized");

    let root = fs.get_entry(None, "");

    if path == "/" {
        return Ok(ResolvedPath {
            entry: root,
            last_comp: String::new(),
        });
    }

    let trailing_slash = path.ends_with('/');
    let body = &path[1..path.len() - usize::from(trailing_slash)];
    let comp_count = body.split('/').count();

    let mut idir = root.inode.expect("filesystem without a root");

    for (i, comp) in body.split('/').enumerate() {
        let entry = fs.get_entry(Some(idir), comp);

        if i + 1 < comp_count {
            // More path remains: the component must exist
            idir = entry.inode.ok_or(KernelError::NotFound)?;
            continue;
        }

        // Final component
        if trailing_slash {
            if entry.inode.is_some() && entry.kind != VfsEntryKind::Dir {
                return Err(KernelError::NotDirectory);
            }
            // A miss here is the not-found terminal
        } else if entry.inode.is_none() {
            return Err(KernelError::NotFound);
        }

        return Ok(ResolvedPath {
            entry,
            last_comp: String::from(comp),
        });
    }

    unreachable!("empty path body")
}
