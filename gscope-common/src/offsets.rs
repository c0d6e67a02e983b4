//! # Target Layout Configuration
//!
//! Field offsets and base addresses for one build of the monitored runtime.
//! Resolved offline, pushed into the probe object as the `OFFSETS` global
//! before any probe attaches, and never validated beyond the bounds checks of
//! each traversal.

/// Field offsets (bytes) and base addresses (absolute) in the monitored process
///
/// Go runtime names are given for each field: Task = `g`, ThreadBinding = `m`,
/// ExecutionContext = `p`, scheduler record = `schedt`, waiter = `sudog`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OffsetConfig {
    // ------------------------------------------------------------------------
    // Task (g)
    // ------------------------------------------------------------------------
    /// `g.goid`
    pub task_id: u64,
    /// `g.startpc`
    pub task_start_pc: u64,
    /// `g.m`
    pub task_thread: u64,
    /// `g.schedlink`
    pub task_sched_link: u64,

    // ------------------------------------------------------------------------
    // ThreadBinding (m)
    // ------------------------------------------------------------------------
    /// `m.id`
    pub thread_id: u64,
    /// `m.p`
    pub thread_context: u64,

    // ------------------------------------------------------------------------
    // ExecutionContext (p)
    // ------------------------------------------------------------------------
    /// `p.id` (int32)
    pub ctx_id: u64,
    /// `p.runqhead` (uint32)
    pub ctx_runq_head: u64,
    /// `p.runqtail` (uint32)
    pub ctx_runq_tail: u64,
    /// `p.runq` (inline array of task pointers)
    pub ctx_runq: u64,
    /// `p.runnext`
    pub ctx_run_next: u64,
    /// `p.m`
    pub ctx_thread: u64,

    // ------------------------------------------------------------------------
    // Scheduler record (schedt)
    // ------------------------------------------------------------------------
    /// `schedt.runq.head`
    pub sched_runq_head: u64,
    /// `schedt.runqsize` (int32)
    pub sched_runq_size: u64,

    // ------------------------------------------------------------------------
    // Semaphore table (semtable / semaRoot / sudog)
    // ------------------------------------------------------------------------
    /// Distance between two table slots (`semaRoot` plus cache-line padding)
    pub sema_root_stride: u64,
    /// `semaRoot.treap`
    pub sema_root_treap: u64,
    /// `sudog.g`
    pub waiter_task: u64,
    /// `sudog.elem`
    pub waiter_addr: u64,
    /// `sudog.prev` (left child inside the treap)
    pub waiter_left: u64,
    /// `sudog.next` (right child inside the treap)
    pub waiter_right: u64,
    /// `sudog.waitlink`
    pub waiter_wait_link: u64,

    // ------------------------------------------------------------------------
    // Base addresses
    // ------------------------------------------------------------------------
    /// `runtime.sched`
    pub sched_addr: u64,
    /// `runtime.allp` (slice header: pointer, length, capacity)
    pub contexts_slice_addr: u64,
    /// `runtime.semtable`
    pub semtable_addr: u64,
    /// `runtime.waitReasonStrings`
    pub wait_reasons_addr: u64,
}

impl OffsetConfig {
    /// All-zero configuration, used as the placeholder value of the probe global
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            task_id: 0,
            task_start_pc: 0,
            task_thread: 0,
            task_sched_link: 0,
            thread_id: 0,
            thread_context: 0,
            ctx_id: 0,
            ctx_runq_head: 0,
            ctx_runq_tail: 0,
            ctx_runq: 0,
            ctx_run_next: 0,
            ctx_thread: 0,
            sched_runq_head: 0,
            sched_runq_size: 0,
            sema_root_stride: 0,
            sema_root_treap: 0,
            waiter_task: 0,
            waiter_addr: 0,
            waiter_left: 0,
            waiter_right: 0,
            waiter_wait_link: 0,
            sched_addr: 0,
            contexts_slice_addr: 0,
            semtable_addr: 0,
            wait_reasons_addr: 0,
        }
    }
}

/// Register values captured at the instrumentation point
///
/// The monitored runtime uses a register ABI: the first integer arguments are
/// in `rax`, `rbx`, `rcx`, and the current task pointer lives in `r14`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GoRegs {
    pub param1: u64,
    pub param2: u64,
    pub param3: u64,
    /// Current task (`g`) pointer
    pub task: u64,
    pub pc: u64,
    pub sp: u64,
    pub fp: u64,
}

/// Offset of the length word inside a slice or string header
pub const SLICE_LEN_OFFSET: u64 = 8;

/// Size of a pointer in the monitored process
pub const PTR_SIZE: u64 = 8;
