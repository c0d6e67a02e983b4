//! Reassembled records, one per scheduler observation
//!
//! Single-event observations map one to one; run-queue and semaphore
//! snapshots arrive as many events and become one record once complete.
//! Records serialize as JSON objects tagged with `"kind"`.

use crate::domain::{ContextId, Pc, TaskId, ThreadId};
use gscope_common::event::RunqEntry;
use serde::Serialize;

/// A task sitting in a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueuedTask {
    pub task: TaskId,
    pub pc: Pc,
}

impl QueuedTask {
    /// `None` for an empty slot (zero pc)
    #[must_use]
    pub fn from_entry(entry: &RunqEntry) -> Option<Self> {
        if entry.is_empty() {
            None
        } else {
            Some(Self { task: TaskId(entry.task_id), pc: Pc(entry.pc) })
        }
    }
}

/// One context's local run queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalSnapshot {
    pub ctx: ContextId,
    /// Thread bound to the context when it was walked
    pub thread: ThreadId,
    pub head: u64,
    pub tail: u64,
    /// Occupied slots, head first
    pub queue: Vec<QueuedTask>,
    pub run_next: Option<QueuedTask>,
    /// False when entries were missing or came from more than one walk
    pub consistent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalSnapshot {
    /// Queue length read from the scheduler record
    pub size: i64,
    pub entries: Vec<QueuedTask>,
    /// Fewer than `size` entries arrived
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SemaWaiter {
    pub task: TaskId,
    /// Address waited on, an opaque token
    pub addr: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SemaSnapshot {
    pub version: u64,
    pub waiters: Vec<SemaWaiter>,
}

/// A task picked for execution, with every context's queue at that moment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FoundRunnable {
    pub thread: ThreadId,
    pub ctx: ContextId,
    pub found: Option<QueuedTask>,
    pub caller_pc: Pc,
    /// Contexts announced by the probe
    pub ctx_count: u64,
    pub contexts: Vec<LocalSnapshot>,
    /// Every announced context snapshot arrived
    pub complete: bool,
}

/// A task made runnable, with the waking thread's queue right after
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Woken {
    pub thread: ThreadId,
    pub task: TaskId,
    pub runq: Option<LocalSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    TaskCreated { thread: ThreadId, creator: TaskId, pc: Pc },
    Delay { thread: ThreadId, task: TaskId, pc: Pc },
    RunqSteal { thread: ThreadId, stealing: ContextId, stolen: ContextId },
    Dispatched { thread: ThreadId, ctx: ContextId, callstack: Vec<Pc>, unwind_failed: bool },
    Parked { thread: ThreadId, task: TaskId, pc: Pc, wait_reason: String },
    LocalRunq(LocalSnapshot),
    GlobalRunq(GlobalSnapshot),
    SemaTable(SemaSnapshot),
    FoundRunnable(FoundRunnable),
    Woken(Woken),
}

impl Record {
    /// The `"kind"` value this record serializes with
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Record::TaskCreated { .. } => "task_created",
            Record::Delay { .. } => "delay",
            Record::RunqSteal { .. } => "runq_steal",
            Record::Dispatched { .. } => "dispatched",
            Record::Parked { .. } => "parked",
            Record::LocalRunq(_) => "local_runq",
            Record::GlobalRunq(_) => "global_runq",
            Record::SemaTable(_) => "sema_table",
            Record::FoundRunnable(_) => "found_runnable",
            Record::Woken(_) => "woken",
        }
    }
}
