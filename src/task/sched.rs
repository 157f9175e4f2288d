//! Round-robin scheduler
//!
//! All scheduler state lives in one [`Scheduler`] value: the task
//! table, the process table, the ready queue, the sleep list, the
//! clock and the preemption gate. The caller (the trap layer) wraps it
//! in a lock and drives it from the timer interrupt and the syscall
//! paths.
//!
//! `schedule()` picks the next task and returns its tid; the actual
//! register switch is the architecture layer's business. Task 0 is the
//! kernel idle task, installed at init, never sleeping and never
//! freed, so there is always something to switch to.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

use super::{ArchContext, Pid, Process, Task, TaskState, Tid, WaitObj, MAX_PID};
use crate::mm::paging::PageDirectory;
use crate::mm::Vaddr;
use crate::{KernelError, KernelResult};

/// Ticks a task may run before `need_reschedule` reports true
pub const TIME_SLOT_TICKS: u32 = 5;

/// Scheduler state
pub struct Scheduler<C: ArchContext> {
    /// All tasks by tid
    tasks: BTreeMap<Tid, Task<C>>,
    /// All processes by pid
    processes: BTreeMap<Pid, Process>,
    /// Ready queue, round-robin order
    run_queue: VecDeque<Tid>,
    /// Tasks waiting on a wait descriptor
    sleep_list: Vec<Tid>,
    /// Currently executing task
    current: Tid,
    /// Scheduler clock, advanced by `account_ticks`
    jiffies: u64,
    /// Preemption-disable nesting depth (0 = preemptible)
    disable_preemption_count: u32,
    /// Search hint for pid allocation
    next_pid: Pid,
}

impl<C: ArchContext> Scheduler<C> {
    /// Create the scheduler with task 0, the kernel idle task, running
    pub fn init(kernel_pdir: PageDirectory) -> Self {
        let mut tasks = BTreeMap::new();
        let mut kernel_task: Task<C> = Task::new(0, 0, 0);
        kernel_task.state = TaskState::Running;
        kernel_task.running_in_kernel = true;
        tasks.insert(0, kernel_task);

        let mut processes = BTreeMap::new();
        processes.insert(0, Process::new(0, kernel_pdir));

        crate::printkln!("sched: task 0 online");

        Self {
            tasks,
            processes,
            run_queue: VecDeque::new(),
            sleep_list: Vec::new(),
            current: 0,
            jiffies: 0,
            disable_preemption_count: 0,
            next_pid: 1,
        }
    }

    /// Tid of the running task
    pub fn current(&self) -> Tid {
        self.current
    }

    /// Current scheduler clock
    pub fn jiffies(&self) -> u64 {
        self.jiffies
    }

    /// Look up a task
    pub fn get_task(&self, tid: Tid) -> Option<&Task<C>> {
        self.tasks.get(&tid)
    }

    /// Look up a task mutably
    pub fn get_task_mut(&mut self, tid: Tid) -> Option<&mut Task<C>> {
        self.tasks.get_mut(&tid)
    }

    /// Look up a process
    pub fn get_process(&self, pid: Pid) -> Option<&Process> {
        self.processes.get(&pid)
    }

    /// Look up a process mutably
    pub fn get_process_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.processes.get_mut(&pid)
    }

    /// Number of live tasks (task 0 included)
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    // =========================================================================
    // Pid allocation and process/task lifecycle
    // =========================================================================

    /// Allocate an unused pid/tid
    ///
    /// Searches [1, MAX_PID) starting at the hint, wrapping around.
    /// Pid 0 is the kernel's and is never handed out.
    pub fn create_new_pid(&mut self) -> KernelResult<Pid> {
        for _ in 1..MAX_PID {
            let candidate = self.next_pid;
            self.next_pid += 1;
            if self.next_pid >= MAX_PID {
                self.next_pid = 1;
            }
            if !self.tasks.contains_key(&candidate) && !self.processes.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(KernelError::OutOfMemory)
    }

    /// Create a process and its first task
    ///
    /// The task's tid equals the new pid. It starts Runnable but is not
    /// queued; call `add_task` once it is ready to run.
    pub fn allocate_new_process(
        &mut self,
        parent_pid: Pid,
        kernel_stack: Vaddr,
        pdir: PageDirectory,
    ) -> KernelResult<Tid> {
        let pid = self.create_new_pid()?;
        self.processes.insert(pid, Process::new(parent_pid, pdir));
        self.tasks.insert(pid, Task::new(pid, pid, kernel_stack));
        Ok(pid)
    }

    /// Create an additional task in an existing process
    pub fn allocate_new_thread(&mut self, pid: Pid, kernel_stack: Vaddr) -> KernelResult<Tid> {
        let tid = self.create_new_pid()?;
        let proc = self
            .processes
            .get_mut(&pid)
            .ok_or(KernelError::NoProcess)?;
        proc.ref_count += 1;
        self.tasks.insert(tid, Task::new(tid, pid, kernel_stack));
        Ok(tid)
    }

    /// Reap a task, returning its exit status
    ///
    /// The task must be a Zombie, or Runnable but never queued (an
    /// aborted spawn). Drops the owning process's refcount and destroys
    /// the process with its last task.
    pub fn free_task(&mut self, tid: Tid) -> KernelResult<u8> {
        assert_ne!(tid, 0, "cannot free the kernel task");

        let task = self.tasks.get(&tid).ok_or(KernelError::NoProcess)?;
        match task.state {
            TaskState::Zombie => {}
            TaskState::Runnable => {
                assert!(
                    !self.run_queue.contains(&tid),
                    "freeing a queued runnable task"
                );
            }
            _ => panic!("freeing a live task"),
        }

        let task = self.tasks.remove(&tid).ok_or(KernelError::NoProcess)?;
        let pid = task.owning_process_pid;

        let proc = self
            .processes
            .get_mut(&pid)
            .expect("task without a process");
        proc.ref_count -= 1;
        if proc.ref_count == 0 {
            self.processes.remove(&pid);
        }

        Ok(task.exit_status)
    }

    // =========================================================================
    // State transitions and queue membership
    // =========================================================================

    /// Enqueue a Runnable task on the ready queue
    pub fn add_task(&mut self, tid: Tid) {
        let task = self.tasks.get(&tid).expect("no such task");
        assert_eq!(task.state, TaskState::Runnable);
        debug_assert!(!self.run_queue.contains(&tid));
        self.run_queue.push_back(tid);
    }

    /// Remove a task from the ready queue
    pub fn remove_task(&mut self, tid: Tid) {
        if let Some(pos) = self.run_queue.iter().position(|&t| t == tid) {
            self.run_queue.remove(pos);
        }
    }

    /// Move a task to a new state, updating queue membership
    ///
    /// Only the legal transitions are accepted; anything else is a
    /// scheduler bug and panics:
    ///
    /// Runnable -> Running, Running -> Runnable, Running -> Sleeping,
    /// Sleeping -> Runnable, Running -> Zombie.
    pub fn task_change_state(&mut self, tid: Tid, new_state: TaskState) {
        let old_state = self.tasks.get(&tid).expect("no such task").state;

        match (old_state, new_state) {
            (TaskState::Runnable, TaskState::Running) => {
                self.remove_task(tid);
            }
            (TaskState::Running, TaskState::Runnable) => {
                self.run_queue.push_back(tid);
            }
            (TaskState::Running, TaskState::Sleeping) => {
                self.sleep_list.push(tid);
            }
            (TaskState::Sleeping, TaskState::Runnable) => {
                if let Some(pos) = self.sleep_list.iter().position(|&t| t == tid) {
                    self.sleep_list.remove(pos);
                }
                self.run_queue.push_back(tid);
            }
            (TaskState::Running, TaskState::Zombie) => {}
            (old, new) => panic!("invalid task state transition {:?} -> {:?}", old, new),
        }

        if let Some(task) = self.tasks.get_mut(&tid) {
            task.state = new_state;
        }
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Pick the next task to run and return its tid
    ///
    /// The running task, if still Running, goes to the back of the
    /// ready queue. Task 0 guarantees the queue is never empty when a
    /// switch is needed.
    pub fn schedule(&mut self) -> Tid {
        let cur = self.current;
        if self.tasks.get(&cur).map(|t| t.state) == Some(TaskState::Running) {
            self.task_change_state(cur, TaskState::Runnable);
        }

        let next = *self.run_queue.front().expect("run queue empty");
        self.task_change_state(next, TaskState::Running);

        let task = self.tasks.get_mut(&next).expect("no such task");
        task.time_slot_ticks = 0;
        self.current = next;
        next
    }

    /// Voluntarily give up the CPU
    pub fn kernel_yield(&mut self) -> Tid {
        self.schedule()
    }

    /// Put the current task to sleep for `ticks` jiffies
    ///
    /// Returns the tid to switch to. Task 0 must never sleep.
    pub fn kernel_sleep(&mut self, ticks: u64) -> Tid {
        let cur = self.current;
        assert_ne!(cur, 0, "kernel task cannot sleep");

        self.set_task_to_wake_after(cur, ticks);
        self.task_change_state(cur, TaskState::Sleeping);
        self.schedule()
    }

    /// Terminate the current task with an exit status
    ///
    /// The task becomes a Zombie retaining `status` until reaped with
    /// `free_task`. Returns the tid to switch to.
    pub fn task_exit(&mut self, status: u8) -> Tid {
        let cur = self.current;
        assert_ne!(cur, 0, "kernel task cannot exit");

        let task = self.tasks.get_mut(&cur).expect("no such task");
        task.exit_status = status;
        self.task_change_state(cur, TaskState::Zombie);
        self.schedule()
    }

    // =========================================================================
    // Timers and the tick path
    // =========================================================================

    /// Arm a wake-up timer on a task
    pub fn set_task_to_wake_after(&mut self, tid: Tid, ticks: u64) {
        let wake_at_jiffy = self.jiffies + ticks;
        let task = self.tasks.get_mut(&tid).expect("no such task");
        task.wobj = WaitObj::Timer { wake_at_jiffy };
    }

    /// Disarm a task's wake-up timer
    pub fn cancel_timer(&mut self, tid: Tid) {
        let task = self.tasks.get_mut(&tid).expect("no such task");
        task.wobj = WaitObj::None;
    }

    /// Wake sleeping tasks whose timers have expired
    pub fn wake_up_expired(&mut self) {
        let now = self.jiffies;
        let expired: Vec<Tid> = self
            .sleep_list
            .iter()
            .copied()
            .filter(|tid| match self.tasks.get(tid).map(|t| t.wobj) {
                Some(WaitObj::Timer { wake_at_jiffy }) => wake_at_jiffy <= now,
                _ => false,
            })
            .collect();

        for tid in expired {
            self.cancel_timer(tid);
            self.task_change_state(tid, TaskState::Runnable);
        }
    }

    /// Advance the clock by one tick and charge it to the running task
    ///
    /// Called from the timer interrupt. Also wakes expired sleepers.
    pub fn account_ticks(&mut self) {
        self.jiffies += 1;

        let cur = self.current;
        let task = self.tasks.get_mut(&cur).expect("no such task");
        task.time_slot_ticks += 1;
        task.total_ticks += 1;
        if task.running_in_kernel {
            task.total_kernel_ticks += 1;
        }

        self.wake_up_expired();
    }

    /// Has the running task used up its time slot?
    ///
    /// Always false while preemption is disabled.
    pub fn need_reschedule(&self) -> bool {
        if !self.is_preemption_enabled() {
            return false;
        }
        match self.tasks.get(&self.current) {
            Some(task) => task.time_slot_ticks >= TIME_SLOT_TICKS,
            None => false,
        }
    }

    // =========================================================================
    // Preemption gate
    // =========================================================================

    /// Enter a no-preemption region (nests)
    pub fn disable_preemption(&mut self) {
        self.disable_preemption_count += 1;
    }

    /// Leave a no-preemption region
    pub fn enable_preemption(&mut self) {
        assert!(
            self.disable_preemption_count > 0,
            "unbalanced enable_preemption"
        );
        self.disable_preemption_count -= 1;
    }

    /// Is the scheduler allowed to preempt?
    pub fn is_preemption_enabled(&self) -> bool {
        self.disable_preemption_count == 0
    }

    // =========================================================================
    // Context save
    // =========================================================================

    /// Record the trap-saved register state of the running task
    ///
    /// Kernel-mode traps save to the task's kernel context slot, user
    /// traps to its user context.
    pub fn save_current_task_state(&mut self, regs: &C) {
        let cur = self.current;
        let task = self.tasks.get_mut(&cur).expect("no such task");
        if task.running_in_kernel {
            task.kernel_state_regs = Some(regs.clone());
        } else {
            task.regs = regs.clone();
        }
    }
}
