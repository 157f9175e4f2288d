//! exo-core: core subsystems of the exo kernel
//!
//! This crate carries the machine-independent heart of the kernel:
//!
//! - `mm`: physical pageframe allocation (1/8/32-frame granularities),
//!   per-process page directories, and the greedy virtual-memory
//!   allocator that maps contiguous virtual ranges onto whatever
//!   physical blocks it can find.
//! - `task`: the task/process data model and the scheduler state
//!   machine (ready queue, sleep list, tick accounting, preemption
//!   gating, pid allocation).
//! - `fs`: an in-memory filesystem (ramfs), the filesystem trait the
//!   VFS dispatches through, the mount table with longest-prefix
//!   lookup, and component-by-component path resolution.
//! - `printk`: ring-buffered kernel logging with an attachable console
//!   sink.
//!
//! The architecture layer lives outside this crate: register frames
//! come in through the [`task::ArchContext`] trait, page directories
//! are explicit maps rather than hardware page tables, and the console
//! is a registered sink function. That keeps every subsystem here
//! testable on the host with plain `cargo test`.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod error;
pub mod fs;
pub mod mm;
pub mod printk;
pub mod task;

pub use error::{KernelError, KernelResult};
