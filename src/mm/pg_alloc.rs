//! Virtual memory allocator
//!
//! Maps a contiguous virtual range onto physical frames with a greedy
//! strategy: 32-frame blocks while 32 or more pages remain, then
//! 8-frame blocks, then single frames. Contiguous virtual memory is
//! backed by as few physical blocks as the pool's fragmentation
//! allows.
//!
//! Frames are freed at the granularity they were allocated at, so
//! teardown walks the same block structure: 8-frame frees for every
//! full group of 8 (a 32-frame block is four such groups), singles for
//! the tail.

use super::pageframe::{PageframeAllocator, FRAMES_PER_BLOCK, FRAMES_PER_LARGE_BLOCK};
use super::paging::{MapFlags, PageDirectory};
use super::{Vaddr, PAGE_SIZE};

/// Allocate physical frames for `page_count` pages and map them at
/// `vaddr`
///
/// All-or-nothing: on success the whole range is mapped; on failure
/// nothing is, any partial progress having been rolled back. Returns
/// whether the allocation succeeded.
///
/// `vaddr` must be page-aligned and the target range unmapped.
pub fn pg_alloc_and_map(
    pfa: &PageframeAllocator,
    pdir: &mut PageDirectory,
    vaddr: Vaddr,
    page_count: usize,
) -> bool {
    debug_assert_eq!(vaddr % PAGE_SIZE as u64, 0);

    // Fast fail when the pool cannot possibly satisfy the request.
    // This precheck also guarantees the single-frame loop below cannot
    // fail: we hold exclusive access to the directory and nothing else
    // drains the pool underneath us.
    if pfa.get_free_pg_count() < page_count {
        return false;
    }

    let flags = MapFlags::READ | MapFlags::WRITE;
    let mut mapped = 0usize;

    while page_count - mapped >= FRAMES_PER_LARGE_BLOCK {
        match pfa.alloc_32_pageframes() {
            Some(block) => {
                pdir.map_pages(
                    vaddr + (mapped * PAGE_SIZE) as u64,
                    block,
                    FRAMES_PER_LARGE_BLOCK,
                    flags,
                );
                mapped += FRAMES_PER_LARGE_BLOCK;
            }
            // No aligned 32-run left; fall through to 8-frame blocks
            None => break,
        }
    }

    while page_count - mapped >= FRAMES_PER_BLOCK {
        match pfa.alloc_8_pageframes() {
            Some(block) => {
                pdir.map_pages(
                    vaddr + (mapped * PAGE_SIZE) as u64,
                    block,
                    FRAMES_PER_BLOCK,
                    flags,
                );
                mapped += FRAMES_PER_BLOCK;
            }
            None => {
                // An 8-frame block cannot be freed as singles, so the
                // remainder cannot be downgraded to single-frame
                // allocations. Unwind everything instead.
                crate::printk!(
                    "pg_alloc: no 8-frame block for {} pages, rolling back\n",
                    page_count
                );
                pg_free_and_unmap(pfa, pdir, vaddr, mapped);
                return false;
            }
        }
    }

    while mapped < page_count {
        // Cannot fail: singles have no alignment requirement and the
        // precheck counted enough free frames.
        let frame = pfa
            .alloc_pageframe()
            .expect("pageframe pool drained after precheck");
        pdir.map_pages(vaddr + (mapped * PAGE_SIZE) as u64, frame, 1, flags);
        mapped += 1;
    }

    true
}

/// Unmap `page_count` pages at `vaddr` and free their frames
///
/// The range must have been produced by [`pg_alloc_and_map`] with the
/// same `vaddr` and `page_count`, so the frame blocks sit where the
/// greedy allocation placed them.
pub fn pg_free_and_unmap(
    pfa: &PageframeAllocator,
    pdir: &mut PageDirectory,
    vaddr: Vaddr,
    page_count: usize,
) {
    debug_assert_eq!(vaddr % PAGE_SIZE as u64, 0);

    let mut freed = 0usize;

    while page_count - freed >= FRAMES_PER_BLOCK {
        let va = vaddr + (freed * PAGE_SIZE) as u64;
        let frame = pdir.get_mapping(va).expect("unmapped page in freed range");
        pfa.free_8_pageframes(frame);
        freed += FRAMES_PER_BLOCK;
    }

    while freed < page_count {
        let va = vaddr + (freed * PAGE_SIZE) as u64;
        let frame = pdir.get_mapping(va).expect("unmapped page in freed range");
        pfa.free_pageframe(frame);
        freed += 1;
    }

    if page_count > 0 {
        pdir.unmap_pages(vaddr, page_count);
    }
}
