//! Per-process page directory
//!
//! `PageDirectory` records the virtual-to-physical mappings of one
//! address space. The hardware page-table walk belongs to the
//! architecture layer; here the directory is an explicit map keyed by
//! page-aligned virtual address, which is what the rest of the kernel
//! needs to reason about mappings (and what makes the allocator
//! testable on the host).

use alloc::collections::BTreeMap;

use bitflags::bitflags;

use super::{Paddr, Vaddr, PAGE_SIZE};

bitflags! {
    /// Page mapping permission flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        /// Readable
        const READ = 1 << 0;
        /// Writable
        const WRITE = 1 << 1;
        /// Accessible from user mode
        const USER = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy)]
struct Mapping {
    paddr: Paddr,
    flags: MapFlags,
}

/// One address space's virtual-to-physical mappings
#[derive(Debug, Default)]
pub struct PageDirectory {
    mappings: BTreeMap<Vaddr, Mapping>,
}

impl PageDirectory {
    /// Create an empty page directory
    pub const fn new() -> Self {
        Self {
            mappings: BTreeMap::new(),
        }
    }

    /// Map `count` consecutive pages starting at `vaddr` to consecutive
    /// frames starting at `paddr`
    ///
    /// Both addresses must be page-aligned and none of the target pages
    /// may already be mapped (programmer error).
    pub fn map_pages(&mut self, vaddr: Vaddr, paddr: Paddr, count: usize, flags: MapFlags) {
        debug_assert_eq!(vaddr % PAGE_SIZE as u64, 0);
        debug_assert_eq!(paddr % PAGE_SIZE as u64, 0);

        for i in 0..count {
            let va = vaddr + (i * PAGE_SIZE) as u64;
            let pa = paddr + (i * PAGE_SIZE) as u64;
            let prev = self.mappings.insert(va, Mapping { paddr: pa, flags });
            debug_assert!(prev.is_none(), "page already mapped");
        }
    }

    /// Remove `count` consecutive page mappings starting at `vaddr`
    ///
    /// Every page in the range must currently be mapped.
    pub fn unmap_pages(&mut self, vaddr: Vaddr, count: usize) {
        debug_assert_eq!(vaddr % PAGE_SIZE as u64, 0);

        for i in 0..count {
            let va = vaddr + (i * PAGE_SIZE) as u64;
            let prev = self.mappings.remove(&va);
            debug_assert!(prev.is_some(), "unmapping page that is not mapped");
        }
    }

    /// Look up the frame a page is mapped to
    pub fn get_mapping(&self, vaddr: Vaddr) -> Option<Paddr> {
        self.mappings.get(&vaddr).map(|m| m.paddr)
    }

    /// Look up the flags a page is mapped with
    pub fn get_flags(&self, vaddr: Vaddr) -> Option<MapFlags> {
        self.mappings.get(&vaddr).map(|m| m.flags)
    }

    /// Number of pages currently mapped
    pub fn mapped_page_count(&self) -> usize {
        self.mappings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PG: u64 = PAGE_SIZE as u64;

    #[test]
    fn map_and_lookup() {
        let mut pdir = PageDirectory::new();
        pdir.map_pages(0x4000_0000, 0x10_0000, 3, MapFlags::READ | MapFlags::WRITE);

        assert_eq!(pdir.mapped_page_count(), 3);
        assert_eq!(pdir.get_mapping(0x4000_0000), Some(0x10_0000));
        assert_eq!(pdir.get_mapping(0x4000_0000 + PG), Some(0x10_0000 + PG));
        assert_eq!(pdir.get_mapping(0x4000_0000 + 2 * PG), Some(0x10_0000 + 2 * PG));
        assert_eq!(pdir.get_mapping(0x4000_0000 + 3 * PG), None);
    }

    #[test]
    fn unmap_removes_range() {
        let mut pdir = PageDirectory::new();
        pdir.map_pages(0x1000, 0x8000, 4, MapFlags::READ);
        pdir.unmap_pages(0x1000, 4);

        assert_eq!(pdir.mapped_page_count(), 0);
        assert_eq!(pdir.get_mapping(0x1000), None);
    }

    #[test]
    fn flags_are_recorded() {
        let mut pdir = PageDirectory::new();
        let flags = MapFlags::READ | MapFlags::USER;
        pdir.map_pages(0x2000, 0x3000, 1, flags);

        assert_eq!(pdir.get_flags(0x2000), Some(flags));
    }

    #[test]
    #[should_panic]
    fn double_map_panics() {
        let mut pdir = PageDirectory::new();
        pdir.map_pages(0x1000, 0x8000, 2, MapFlags::READ);
        pdir.map_pages(0x1000 + PG, 0x9000, 1, MapFlags::READ);
    }
}
