//! Memory management
//!
//! Three layers, lowest first:
//! - [`pageframe`]: physical frame accounting (bitmap allocator with
//!   1/8/32-frame granularities)
//! - [`paging`]: per-process virtual-to-physical mappings
//! - [`pg_alloc`]: the greedy allocator that ties the two together,
//!   mapping contiguous virtual ranges onto whatever physical blocks
//!   are available

pub mod pageframe;
pub mod paging;
pub mod pg_alloc;

/// Page/frame size (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Physical address
pub type Paddr = u64;

/// Virtual address
pub type Vaddr = u64;
