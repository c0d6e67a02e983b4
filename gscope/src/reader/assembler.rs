//! # Snapshot Reassembly
//!
//! Probes fire on every core at once and stream multi-entry snapshots one
//! event at a time, so events of different snapshots interleave. Ordering is
//! only guaranteed per producer; everything here relies on the sentinels the
//! probes put in the stream:
//!
//! - local queues: every entry repeats `head`/`tail`; `entry_idx == tail`
//!   closes the walk. Keyed by (tag, grouping thread, context).
//! - global queue: `entry_idx == 0` opens a walk, the terminator
//!   (`entry_idx == size`, empty entry) closes it. Entries carry no producer
//!   id: when two walks of the same size interleave, an entry of one lands in
//!   the other's snapshot wherever its index fits. Only index and size
//!   mismatches are detected.
//! - semaphore table: every event carries the walk's version; the terminator
//!   closes that version and supersedes all older ones, so waiters of an older
//!   walk never leak into a newer snapshot.
//! - `FoundRunnable` announces how many grouped local snapshots follow;
//!   `Woken` is closed by the waking thread's `WokenRunq` snapshot.

use std::collections::{BTreeMap, HashMap};

use gscope_common::event::{
    DispatchedEvent, FoundRunnableEvent, GlobalRunqEvent, LocalRunqEvent, ParkedEvent,
    SemaWaiterEvent, EVENT_WOKEN_RUNQ_ENTRY, NO_ID,
};
use gscope_common::{Event, WaitReason};
use log::debug;

use super::records::{
    FoundRunnable, GlobalSnapshot, LocalSnapshot, QueuedTask, Record, SemaSnapshot, SemaWaiter,
    Woken,
};
use crate::domain::{ContextId, Pc, TaskId, ThreadId};

/// Semaphore snapshots kept open at once; the oldest goes first
pub const MAX_PENDING_SEMA_VERSIONS: usize = 32;

/// Anomalies seen while reassembling
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AssemblerStats {
    pub events: u64,
    pub records: u64,
    /// Local walks restarted or never closed
    pub abandoned_local: u64,
    /// Local snapshots assembled from mismatched or missing entries
    pub inconsistent_local: u64,
    pub truncated_global: u64,
    /// Semaphore walks dropped because a newer one completed first
    pub superseded_sema: u64,
    /// Semaphore events of an already superseded version
    pub stale_sema: u64,
    pub incomplete_found: u64,
    /// Continuation events with no open snapshot
    pub orphaned: u64,
}

type LocalKey = (u64, i64, i64);

struct PendingLocal {
    snapshot: LocalSnapshot,
    next_idx: u64,
}

struct PendingGlobal {
    snapshot: GlobalSnapshot,
    next_idx: u64,
}

fn next_u32_index(idx: u64) -> u64 {
    // Queue indices are free-running u32 counters
    (idx + 1) & u64::from(u32::MAX)
}

#[derive(Default)]
pub struct SnapshotAssembler {
    locals: HashMap<LocalKey, PendingLocal>,
    global: Option<PendingGlobal>,
    sema: BTreeMap<u64, Vec<SemaWaiter>>,
    last_sema_version: Option<u64>,
    found: HashMap<i64, FoundRunnable>,
    woken: HashMap<i64, Woken>,
    stats: AssemblerStats,
}

impl SnapshotAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    /// Feed one decoded event, returning the records it completed
    pub fn push(&mut self, event: Event) -> Vec<Record> {
        self.stats.events += 1;
        let mut out = Vec::new();

        match event {
            Event::TaskCreated(e) => out.push(Record::TaskCreated {
                thread: ThreadId(e.thread_id),
                creator: TaskId(e.creator_task_id),
                pc: Pc(e.pc),
            }),
            Event::Delay(e) => out.push(Record::Delay {
                thread: ThreadId(e.thread_id),
                task: TaskId(e.task_id),
                pc: Pc(e.pc),
            }),
            Event::RunqSteal(e) => out.push(Record::RunqSteal {
                thread: ThreadId(e.thread_id),
                stealing: ContextId(e.stealing_ctx_id),
                stolen: ContextId(e.stolen_ctx_id),
            }),
            Event::Dispatched(e) => out.push(dispatched(&e)),
            Event::Parked(e) => out.push(parked(&e)),
            Event::LocalRunq(e) | Event::WokenRunq(e) => {
                if let Some(snapshot) = self.push_local(&e) {
                    self.route_local(&e, snapshot, &mut out);
                }
            }
            Event::GlobalRunq(e) => self.push_global(&e, &mut out),
            Event::SemaWaiter(e) => self.push_sema(&e, &mut out),
            Event::FoundRunnable(e) => self.push_found(&e, &mut out),
            Event::Woken(e) => {
                let record =
                    Woken { thread: ThreadId(e.thread_id), task: TaskId(e.task_id), runq: None };
                if let Some(prev) = self.woken.insert(e.thread_id, record) {
                    out.push(Record::Woken(prev));
                }
            }
        }

        self.stats.records += out.len() as u64;
        out
    }

    /// Flush everything still open: partial groups and queues are reported as
    /// such, partial local walks and semaphore versions are dropped
    pub fn finish(&mut self) -> Vec<Record> {
        let mut out = Vec::new();

        self.stats.abandoned_local += self.locals.len() as u64;
        self.locals.clear();
        self.stats.superseded_sema += self.sema.len() as u64;
        self.sema.clear();

        if let Some(pending) = self.global.take() {
            self.stats.truncated_global += 1;
            out.push(Record::GlobalRunq(GlobalSnapshot { truncated: true, ..pending.snapshot }));
        }
        for (_, found) in self.found.drain() {
            self.stats.incomplete_found += 1;
            out.push(Record::FoundRunnable(found));
        }
        out.extend(self.woken.drain().map(|(_, woken)| Record::Woken(woken)));

        self.stats.records += out.len() as u64;
        out
    }

    // ------------------------------------------------------------------------
    // Local queues
    // ------------------------------------------------------------------------

    /// Returns the snapshot when `e` closes it
    fn push_local(&mut self, e: &LocalRunqEvent) -> Option<LocalSnapshot> {
        let key = (e.etype, e.grouping_thread_id, e.ctx_id);

        if e.entry_idx == e.head {
            let fresh = PendingLocal {
                snapshot: LocalSnapshot {
                    ctx: ContextId(e.ctx_id),
                    thread: ThreadId(e.thread_id),
                    head: e.head,
                    tail: e.tail,
                    queue: Vec::new(),
                    run_next: None,
                    consistent: true,
                },
                next_idx: e.head,
            };
            if self.locals.insert(key, fresh).is_some() {
                debug!("local walk of P{} restarted before it closed", e.ctx_id);
                self.stats.abandoned_local += 1;
            }
        }

        let Some(pending) = self.locals.get_mut(&key) else {
            self.stats.orphaned += 1;
            return None;
        };

        let snap = &mut pending.snapshot;
        if e.head != snap.head || e.tail != snap.tail || e.entry_idx != pending.next_idx {
            snap.consistent = false;
        }
        pending.next_idx = next_u32_index(e.entry_idx);

        if !e.is_last() {
            if let Some(task) = QueuedTask::from_entry(&e.entry) {
                snap.queue.push(task);
            }
            return None;
        }

        let mut snapshot = self.locals.remove(&key)?.snapshot;
        snapshot.run_next = QueuedTask::from_entry(&e.entry);
        if !snapshot.consistent {
            self.stats.inconsistent_local += 1;
        }
        Some(snapshot)
    }

    fn route_local(&mut self, e: &LocalRunqEvent, snapshot: LocalSnapshot, out: &mut Vec<Record>) {
        if e.etype == EVENT_WOKEN_RUNQ_ENTRY {
            match self.woken.remove(&e.grouping_thread_id) {
                Some(mut woken) => {
                    woken.runq = Some(snapshot);
                    out.push(Record::Woken(woken));
                }
                None => out.push(Record::LocalRunq(snapshot)),
            }
            return;
        }

        if e.grouping_thread_id != NO_ID {
            if let Some(found) = self.found.get_mut(&e.grouping_thread_id) {
                found.contexts.push(snapshot);
                if found.contexts.len() as u64 >= found.ctx_count {
                    if let Some(mut found) = self.found.remove(&e.grouping_thread_id) {
                        found.complete = true;
                        out.push(Record::FoundRunnable(found));
                    }
                }
                return;
            }
        }

        out.push(Record::LocalRunq(snapshot));
    }

    // ------------------------------------------------------------------------
    // Global queue
    // ------------------------------------------------------------------------

    fn push_global(&mut self, e: &GlobalRunqEvent, out: &mut Vec<Record>) {
        if e.is_terminator() {
            let mut snapshot = match self.global.take() {
                Some(pending) if pending.snapshot.size == e.size => pending.snapshot,
                Some(pending) => {
                    self.close_truncated_global(pending, out);
                    GlobalSnapshot { size: e.size, entries: Vec::new(), truncated: false }
                }
                None => GlobalSnapshot { size: e.size, entries: Vec::new(), truncated: false },
            };
            if snapshot.truncated
                || i64::try_from(snapshot.entries.len()).map_or(true, |n| n != e.size)
            {
                snapshot.truncated = true;
                self.stats.truncated_global += 1;
            }
            out.push(Record::GlobalRunq(snapshot));
            return;
        }

        if e.entry_idx == 0 {
            if let Some(pending) = self.global.take() {
                self.close_truncated_global(pending, out);
            }
            self.global = Some(PendingGlobal {
                snapshot: GlobalSnapshot { size: e.size, entries: Vec::new(), truncated: false },
                next_idx: 0,
            });
        }

        let Some(pending) = self.global.as_mut() else {
            self.stats.orphaned += 1;
            return;
        };
        if e.entry_idx != pending.next_idx || e.size != pending.snapshot.size {
            pending.snapshot.truncated = true;
        }
        pending.next_idx = e.entry_idx + 1;
        if let Some(task) = QueuedTask::from_entry(&e.entry) {
            pending.snapshot.entries.push(task);
        }
    }

    fn close_truncated_global(&mut self, pending: PendingGlobal, out: &mut Vec<Record>) {
        self.stats.truncated_global += 1;
        out.push(Record::GlobalRunq(GlobalSnapshot { truncated: true, ..pending.snapshot }));
    }

    // ------------------------------------------------------------------------
    // Semaphore table
    // ------------------------------------------------------------------------

    fn push_sema(&mut self, e: &SemaWaiterEvent, out: &mut Vec<Record>) {
        if self.last_sema_version.is_some_and(|last| e.version <= last) {
            self.stats.stale_sema += 1;
            return;
        }

        if e.is_terminator == 0 {
            self.sema.entry(e.version).or_default().push(SemaWaiter {
                task: TaskId(e.waiter.task_id),
                addr: e.waiter.addr,
            });
            if self.sema.len() > MAX_PENDING_SEMA_VERSIONS {
                self.sema.pop_first();
                self.stats.superseded_sema += 1;
            }
            return;
        }

        let waiters = self.sema.remove(&e.version).unwrap_or_default();
        let newer = self.sema.split_off(&e.version);
        self.stats.superseded_sema += self.sema.len() as u64;
        self.sema = newer;
        self.last_sema_version = Some(e.version);

        out.push(Record::SemaTable(SemaSnapshot { version: e.version, waiters }));
    }

    // ------------------------------------------------------------------------
    // Grouped records
    // ------------------------------------------------------------------------

    fn push_found(&mut self, e: &FoundRunnableEvent, out: &mut Vec<Record>) {
        let record = FoundRunnable {
            thread: ThreadId(e.thread_id),
            ctx: ContextId(e.ctx_id),
            found: QueuedTask::from_entry(&e.found),
            caller_pc: Pc(e.caller_pc),
            ctx_count: e.ctx_count,
            contexts: Vec::new(),
            complete: e.ctx_count == 0,
        };

        if let Some(prev) = self.found.remove(&e.thread_id) {
            self.stats.incomplete_found += 1;
            out.push(Record::FoundRunnable(prev));
        }
        if record.complete {
            out.push(Record::FoundRunnable(record));
        } else {
            self.found.insert(e.thread_id, record);
        }
    }
}

fn dispatched(e: &DispatchedEvent) -> Record {
    let unwind_failed = e.depth < 0;
    let frames: Vec<Pc> = if unwind_failed {
        e.callstack.iter().take_while(|&&pc| pc != 0).map(|&pc| Pc(pc)).collect()
    } else {
        let depth = usize::try_from(e.depth).unwrap_or(0).min(e.callstack.len());
        e.callstack[..depth].iter().map(|&pc| Pc(pc)).collect()
    };
    Record::Dispatched {
        thread: ThreadId(e.thread_id),
        ctx: ContextId(e.ctx_id),
        callstack: frames,
        unwind_failed,
    }
}

fn parked(e: &ParkedEvent) -> Record {
    Record::Parked {
        thread: ThreadId(e.thread_id),
        task: TaskId(e.parked.task_id),
        pc: Pc(e.parked.pc),
        wait_reason: WaitReason { bytes: e.wait_reason }.as_str().to_string(),
    }
}
