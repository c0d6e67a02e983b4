//! # Wire Event Layouts
//!
//! Fixed binary layouts written into the `EVENTS` ring buffer by the probes
//! and decoded by userspace (see [`crate::wire`]).
//!
//! Every event starts with a `u64` tag even though the tag would fit in a
//! byte: the producer and any out-of-process reader then agree on the offset
//! of every following field no matter what their default alignment rules are.
//! All fields are 8-byte integers (or byte arrays sized in multiples of 8), so
//! none of these `#[repr(C)]` structs contain padding.

use core::mem::size_of;

// ============================================================================
// Event Tags
// ============================================================================

/// A task was created (`runtime.newproc` entry)
pub const EVENT_TASK_CREATED: u64 = 0;

/// A user-instrumented delay point was hit
pub const EVENT_DELAY: u64 = 1;

/// One entry of a local run-queue snapshot
///
/// When `entry_idx == tail` the entry holds the `runNext` slot and is the
/// last event of that snapshot.
pub const EVENT_LOCAL_RUNQ_ENTRY: u64 = 2;

/// A context stole work from another context's local run queue
pub const EVENT_RUNQ_STEAL: u64 = 3;

// Tag 4 is reserved.

/// One entry of a global run-queue snapshot (or its terminator)
pub const EVENT_GLOBAL_RUNQ_ENTRY: u64 = 5;

/// One waiter of a semaphore-table snapshot (or its terminator)
pub const EVENT_SEMA_WAITER: u64 = 6;

/// A thread entered the scheduler (`runtime.schedule`)
pub const EVENT_DISPATCHED: u64 = 7;

/// A runnable task was picked for execution (`runtime.execute`)
pub const EVENT_FOUND_RUNNABLE: u64 = 8;

/// A task parked (`runtime.gopark`)
pub const EVENT_PARKED: u64 = 9;

/// A task was made runnable (`runtime.ready`)
pub const EVENT_WOKEN: u64 = 10;

/// Local run-queue entry reported after a wake-up (`runtime.goready` return)
pub const EVENT_WOKEN_RUNQ_ENTRY: u64 = 11;

/// Maximum number of frames captured by the unwinder
pub const MAX_STACK_TRACE_DEPTH: usize = 8;

/// Wait-reason strings are truncated to this many bytes (NUL included)
pub const WAIT_REASON_MAX_LEN: usize = 40;

/// Thread or context id used when the binding is absent
pub const NO_ID: i64 = -1;

// ============================================================================
// Wire Trait
// ============================================================================

/// A fixed-layout event that can be written into the ring channel
///
/// The tag lives in the event's own `etype` field, since one layout can
/// travel under several tags ([`LocalRunqEvent`]).
pub trait WireEvent: Copy {
    /// Raw bytes of the event, exactly as they travel through the channel
    fn as_bytes(&self) -> &[u8] {
        // SAFETY: implementors are `#[repr(C)]`, `Copy`, and padding-free
        // (checked by the size assertions below), so every byte is initialized.
        #[allow(unsafe_code)]
        unsafe {
            core::slice::from_raw_parts((self as *const Self).cast::<u8>(), size_of::<Self>())
        }
    }
}

// ============================================================================
// Shared Fields
// ============================================================================

/// A task reference as seen in a queue
///
/// A zero `pc` marks an empty slot (for example a nil `runNext`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunqEntry {
    /// Start pc of the task
    pub pc: u64,
    /// Task id (`g.goid`)
    pub task_id: u64,
}

impl RunqEntry {
    pub const EMPTY: Self = Self { pc: 0, task_id: 0 };

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pc == 0
    }
}

/// A task parked on a semaphore address
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SemaWaiter {
    pub task_id: u64,
    /// Address the task waits on (opaque token for readers)
    pub addr: u64,
}

// ============================================================================
// Events
// ============================================================================

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskCreatedEvent {
    pub etype: u64,
    /// Entry pc of the function the new task will run
    pub pc: u64,
    pub creator_task_id: u64,
    pub thread_id: i64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DelayEvent {
    pub etype: u64,
    pub pc: u64,
    pub task_id: u64,
    pub thread_id: i64,
}

/// Local run-queue entry
///
/// Shared by [`EVENT_LOCAL_RUNQ_ENTRY`] and [`EVENT_WOKEN_RUNQ_ENTRY`]; every
/// event repeats `head`/`tail` so the reader can tell when the queue changed
/// under the walk.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalRunqEvent {
    pub etype: u64,
    pub ctx_id: i64,
    pub head: u64,
    pub tail: u64,
    pub entry_idx: u64,
    pub entry: RunqEntry,
    /// [`NO_ID`] when the context is not bound to a thread
    pub thread_id: i64,
    /// Id of the thread reporting several queues at once, [`NO_ID`] otherwise
    pub grouping_thread_id: i64,
}

impl LocalRunqEvent {
    /// Whether this entry closes its snapshot (it carries `runNext`)
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.entry_idx == self.tail
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunqStealEvent {
    pub etype: u64,
    pub thread_id: i64,
    pub stealing_ctx_id: i64,
    pub stolen_ctx_id: i64,
}

/// Global run-queue entry
///
/// The terminator has `entry_idx == size` and an empty entry, whatever the
/// walk actually managed to visit.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlobalRunqEvent {
    pub etype: u64,
    /// Queue size read from the scheduler record
    pub size: i64,
    /// Chunk this entry was visited in (0-based)
    pub chunk: u64,
    pub entry_idx: u64,
    pub entry: RunqEntry,
}

impl GlobalRunqEvent {
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        i64::try_from(self.entry_idx).is_ok_and(|idx| idx == self.size) && self.entry.is_empty()
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SemaWaiterEvent {
    pub etype: u64,
    /// Snapshot version shared by every event of one table walk
    pub version: u64,
    pub waiter: SemaWaiter,
    /// 1 on the final event of a snapshot, 0 otherwise
    pub is_terminator: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchedEvent {
    pub etype: u64,
    pub thread_id: i64,
    /// Program counters, callee first
    pub callstack: [u64; MAX_STACK_TRACE_DEPTH],
    /// Number of valid frames; negative when unwinding failed
    pub depth: i64,
    pub ctx_id: i64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FoundRunnableEvent {
    pub etype: u64,
    pub thread_id: i64,
    pub found: RunqEntry,
    /// Return address of the probed call (tells `schedule` apart from other callers)
    pub caller_pc: u64,
    pub ctx_id: i64,
    /// Number of local run-queue snapshots that follow, grouped by `thread_id`
    pub ctx_count: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParkedEvent {
    pub etype: u64,
    pub thread_id: i64,
    pub parked: RunqEntry,
    /// NUL-terminated, empty for unknown reason codes
    pub wait_reason: [u8; WAIT_REASON_MAX_LEN],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WokenEvent {
    pub etype: u64,
    pub thread_id: i64,
    pub task_id: u64,
}

macro_rules! wire_event {
    ($ty:ty, $size:expr) => {
        impl WireEvent for $ty {}
        const _: () = assert!(size_of::<$ty>() == $size);
    };
}

wire_event!(TaskCreatedEvent, 32);
wire_event!(DelayEvent, 32);
wire_event!(LocalRunqEvent, 72);
wire_event!(RunqStealEvent, 32);
wire_event!(GlobalRunqEvent, 48);
wire_event!(SemaWaiterEvent, 40);
wire_event!(DispatchedEvent, 96);
wire_event!(FoundRunnableEvent, 56);
wire_event!(ParkedEvent, 72);
wire_event!(WokenEvent, 24);
