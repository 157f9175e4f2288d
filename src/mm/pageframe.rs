//! Physical pageframe allocator
//!
//! Bitmap-based allocator for physical memory frames. Besides single
//! frames it hands out contiguous, naturally aligned blocks of 8 and
//! 32 frames so the virtual-memory allocator can map large ranges with
//! few blocks.
//!
//! Frees must match the allocating granularity: a block allocated with
//! `alloc_8_pageframes` comes back through `free_8_pageframes` (a
//! 32-frame block may also come back as four 8-frame frees, which is
//! how ranges are torn down). Violations are programmer errors and are
//! caught by debug assertions, not reported.

use alloc::vec::Vec;

use spin::Mutex;

use super::{Paddr, PAGE_SIZE};

/// Frames per small block
pub const FRAMES_PER_BLOCK: usize = 8;

/// Frames per large block
pub const FRAMES_PER_LARGE_BLOCK: usize = 32;

/// Bitmap pageframe allocator
///
/// Each bit represents one 4KB frame (1 = free, 0 = used). Interior
/// mutability via a spinlock so the allocator can live in a static and
/// be shared by reference.
pub struct PageframeAllocator {
    inner: Mutex<PageframeAllocatorInner>,
}

struct PageframeAllocatorInner {
    /// Bitmap of free frames (1 = free, 0 = used)
    bitmap: Vec<u64>,
    /// Base physical address
    base: Paddr,
    /// Total number of frames
    total_frames: usize,
    /// Next hint for free frame search
    next_free: usize,
}

impl PageframeAllocator {
    /// Create a new uninitialized allocator
    ///
    /// No frames are usable until `init` is called.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(PageframeAllocatorInner {
                bitmap: Vec::new(),
                base: 0,
                total_frames: 0,
                next_free: 0,
            }),
        }
    }

    /// Initialize with a memory region
    ///
    /// The region from `base` to `base + size` becomes available for
    /// allocation. `base` must be page-aligned.
    pub fn init(&self, base: Paddr, size: u64) {
        debug_assert_eq!(base % PAGE_SIZE as u64, 0);

        let mut inner = self.inner.lock();
        inner.base = base;
        inner.total_frames = size as usize / PAGE_SIZE;
        inner.next_free = 0;

        let num_words = inner.total_frames.div_ceil(64);
        inner.bitmap.clear();
        inner.bitmap.resize(num_words, 0);

        // Mark all frames as free
        let full_words = inner.total_frames / 64;
        for i in 0..full_words {
            inner.bitmap[i] = !0u64; // All 1s = all free
        }

        // Handle remaining bits; out-of-range bits stay 0 so counting
        // set bits always gives the free frame count
        let remaining = inner.total_frames % 64;
        if remaining > 0 {
            inner.bitmap[full_words] = (1u64 << remaining) - 1;
        }
    }

    /// Allocate a single physical frame
    pub fn alloc_pageframe(&self) -> Option<Paddr> {
        let mut inner = self.inner.lock();

        let num_words = inner.total_frames.div_ceil(64);
        if num_words == 0 {
            return None;
        }

        // Search starting from hint
        for offset in 0..num_words {
            let word_idx = (inner.next_free / 64 + offset) % num_words;
            let word = inner.bitmap[word_idx];

            if word != 0 {
                let bit = word.trailing_zeros() as usize;
                let frame = word_idx * 64 + bit;

                if frame < inner.total_frames {
                    // Mark as used
                    inner.bitmap[word_idx] &= !(1u64 << bit);
                    inner.next_free = frame + 1;

                    return Some(inner.base + (frame as u64 * PAGE_SIZE as u64));
                }
            }
        }

        None
    }

    /// Allocate a contiguous, 8-frame-aligned block of 8 frames
    pub fn alloc_8_pageframes(&self) -> Option<Paddr> {
        self.alloc_block(FRAMES_PER_BLOCK)
    }

    /// Allocate a contiguous, 32-frame-aligned block of 32 frames
    pub fn alloc_32_pageframes(&self) -> Option<Paddr> {
        self.alloc_block(FRAMES_PER_LARGE_BLOCK)
    }

    /// Free a single physical frame
    pub fn free_pageframe(&self, frame: Paddr) {
        self.free_block_at(frame, 1)
    }

    /// Free an 8-frame block allocated with `alloc_8_pageframes`
    pub fn free_8_pageframes(&self, frame: Paddr) {
        self.free_block_at(frame, FRAMES_PER_BLOCK)
    }

    /// Free a 32-frame block allocated with `alloc_32_pageframes`
    pub fn free_32_pageframes(&self, frame: Paddr) {
        self.free_block_at(frame, FRAMES_PER_LARGE_BLOCK)
    }

    /// Allocate `block_frames` consecutive frames at a `block_frames`
    /// boundary
    ///
    /// Block sizes divide 64, so a candidate block never straddles a
    /// bitmap word: the scan checks an aligned mask inside each word.
    fn alloc_block(&self, block_frames: usize) -> Option<Paddr> {
        debug_assert!(64 % block_frames == 0);

        let mut inner = self.inner.lock();

        let num_words = inner.total_frames.div_ceil(64);
        let mask_base = (1u64 << block_frames) - 1;

        for word_idx in 0..num_words {
            let word = inner.bitmap[word_idx];
            if word == 0 {
                continue;
            }

            let mut shift = 0;
            while shift < 64 {
                let mask = mask_base << shift;
                if word & mask == mask {
                    let frame = word_idx * 64 + shift;
                    if frame + block_frames <= inner.total_frames {
                        inner.bitmap[word_idx] &= !mask;
                        inner.next_free = frame + block_frames;
                        return Some(inner.base + (frame as u64 * PAGE_SIZE as u64));
                    }
                }
                shift += block_frames;
            }
        }

        None
    }

    fn free_block_at(&self, frame: Paddr, block_frames: usize) {
        let mut inner = self.inner.lock();

        debug_assert!(frame >= inner.base);
        let frame_idx = ((frame - inner.base) / PAGE_SIZE as u64) as usize;

        // Granularity contract: the address must sit on a block
        // boundary and every frame in it must currently be allocated
        debug_assert!(frame_idx % block_frames == 0);
        debug_assert!(frame_idx + block_frames <= inner.total_frames);

        let word_idx = frame_idx / 64;
        let mask = ((1u64 << block_frames) - 1) << (frame_idx % 64);
        debug_assert_eq!(
            inner.bitmap[word_idx] & mask,
            0,
            "freeing frames that are not allocated"
        );

        inner.bitmap[word_idx] |= mask;

        // Update hint
        if frame_idx < inner.next_free {
            inner.next_free = frame_idx;
        }
    }

    /// Get number of free frames
    pub fn get_free_pg_count(&self) -> usize {
        let inner = self.inner.lock();

        let mut free = 0usize;
        for word in &inner.bitmap {
            free += word.count_ones() as usize;
        }
        free
    }

    /// Get total number of frames under management
    pub fn get_total_pg_count(&self) -> usize {
        self.inner.lock().total_frames
    }

    /// Get memory statistics
    pub fn stats(&self) -> MemoryStats {
        let inner = self.inner.lock();

        let mut free_frames = 0usize;
        for word in &inner.bitmap {
            free_frames += word.count_ones() as usize;
        }

        MemoryStats {
            total_bytes: (inner.total_frames as u64) * (PAGE_SIZE as u64),
            free_bytes: (free_frames as u64) * (PAGE_SIZE as u64),
        }
    }
}

impl Default for PageframeAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Memory statistics from the pageframe allocator
#[derive(Debug, Clone, Copy)]
pub struct MemoryStats {
    /// Total memory in bytes
    pub total_bytes: u64,
    /// Free memory in bytes
    pub free_bytes: u64,
}
