//! Task management
//!
//! Data model for processes and the tasks (threads) that run inside
//! them. A process owns the address space, the working directory and
//! the open-handle table; every task holds the per-thread scheduling
//! and context state. Threads of one process share it through the
//! process refcount: the process goes away with its last task.

pub mod sched;

use alloc::string::String;

use crate::fs::vfs::FileHandle;
use crate::mm::paging::PageDirectory;
use crate::mm::Vaddr;
use crate::{KernelError, KernelResult};

/// Process ID type
pub type Pid = u64;

/// Thread ID type
///
/// Tids and pids draw from the same number space; a process's first
/// task has tid == pid.
pub type Tid = u64;

/// Exclusive upper bound for pid/tid allocation
pub const MAX_PID: u64 = 32768;

/// Open-handle slots per process
pub const MAX_HANDLES: usize = 16;

/// Scheduling state of a task
///
/// A task is always in exactly one state, and the state decides which
/// scheduler structure (if any) references it: Runnable tasks sit in
/// the ready queue, Sleeping tasks in the sleep list, the Running task
/// is `current`, and a Zombie is in none of them, holding only its
/// exit status until reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Ready to run, waiting in the ready queue
    Runnable,
    /// Currently executing
    Running,
    /// Blocked until its wait descriptor fires
    Sleeping,
    /// Exited; exit status retained until reaped
    Zombie,
}

/// What a sleeping task is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitObj {
    /// Not waiting on anything
    None,
    /// Wake when the scheduler clock reaches this jiffy
    Timer {
        /// Absolute wake-up time in jiffies
        wake_at_jiffy: u64,
    },
    /// Wake when the object with this id is signalled
    Object {
        /// Opaque wait-object id
        id: u64,
    },
}

/// Saved register state, supplied by the architecture layer
///
/// The scheduler stores and clones contexts but never looks inside
/// them; the real register frame type lives with the arch code. The
/// unit impl serves arch-less hosts and tests.
pub trait ArchContext: Default + Clone {}

impl ArchContext for () {}

/// One schedulable thread
#[derive(Debug)]
pub struct Task<C: ArchContext> {
    /// Thread id
    pub tid: Tid,
    /// Process this task belongs to
    pub owning_process_pid: Pid,
    /// Scheduling state
    pub state: TaskState,
    /// Exit status, meaningful once state is Zombie
    pub exit_status: u8,
    /// Is the task currently executing in kernel mode?
    pub running_in_kernel: bool,
    /// Ticks consumed from the current time slot
    pub time_slot_ticks: u32,
    /// Lifetime tick count
    pub total_ticks: u64,
    /// Lifetime ticks spent in kernel mode
    pub total_kernel_ticks: u64,
    /// Top of this task's kernel stack
    pub kernel_stack: Vaddr,
    /// Wait descriptor while Sleeping
    pub wobj: WaitObj,
    /// Trap-saved user context
    pub regs: C,
    /// Saved context for kernel-mode preemption, if any
    pub kernel_state_regs: Option<C>,
}

impl<C: ArchContext> Task<C> {
    /// Create a new Runnable task
    pub fn new(tid: Tid, owning_process_pid: Pid, kernel_stack: Vaddr) -> Self {
        Self {
            tid,
            owning_process_pid,
            state: TaskState::Runnable,
            exit_status: 0,
            running_in_kernel: false,
            time_slot_ticks: 0,
            total_ticks: 0,
            total_kernel_ticks: 0,
            kernel_stack,
            wobj: WaitObj::None,
            regs: C::default(),
            kernel_state_regs: None,
        }
    }
}

/// Per-process state shared by all of the process's tasks
#[derive(Debug)]
pub struct Process {
    /// Number of live tasks in this process
    pub ref_count: u32,
    /// Parent process id
    pub parent_pid: Pid,
    /// Address space
    pub pdir: PageDirectory,
    /// Current working directory
    pub cwd: String,
    /// Open-handle table, indexed by handle slot
    handles: [Option<FileHandle>; MAX_HANDLES],
}

impl Process {
    /// Create a process with one task and an empty handle table
    pub fn new(parent_pid: Pid, pdir: PageDirectory) -> Self {
        Self {
            ref_count: 1,
            parent_pid,
            pdir,
            cwd: String::from("/"),
            handles: core::array::from_fn(|_| None),
        }
    }

    /// Install a handle in the lowest free slot
    pub fn add_handle(&mut self, handle: FileHandle) -> KernelResult<usize> {
        for (slot, entry) in self.handles.iter_mut().enumerate() {
            if entry.is_none() {
                *entry = Some(handle);
                return Ok(slot);
            }
        }
        Err(KernelError::ProcessFileLimit)
    }

    /// Look up the handle in a slot
    pub fn get_handle(&self, slot: usize) -> KernelResult<&FileHandle> {
        self.handles
            .get(slot)
            .and_then(|h| h.as_ref())
            .ok_or(KernelError::BadHandle)
    }

    /// Remove and return the handle in a slot
    pub fn take_handle(&mut self, slot: usize) -> KernelResult<FileHandle> {
        self.handles
            .get_mut(slot)
            .and_then(|h| h.take())
            .ok_or(KernelError::BadHandle)
    }

    /// Number of occupied handle slots
    pub fn open_handle_count(&self) -> usize {
        self.handles.iter().filter(|h| h.is_some()).count()
    }
}
