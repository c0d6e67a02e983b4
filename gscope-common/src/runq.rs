//! Local run-queue snapshot
//!
//! A context's queue is a fixed ring of task pointers indexed by free-running
//! `u32` head/tail counters. The walk reads both counters once and then visits
//! `head..=tail`, the last index standing for the `runNext` slot. Head and tail
//! travel with every entry so the reader can detect that the owner mutated the
//! queue mid-walk.

use core::ops::ControlFlow;

use crate::bounded::BoundedLoop;
use crate::channel::{Emitter, EventSink};
use crate::error::ProbeError;
use crate::event::LocalRunqEvent;
use crate::memory::MemoryReader;
use crate::offsets::PTR_SIZE;
use crate::target::Target;

/// Slots in a context's local queue (`len(p.runq)`)
pub const LOCAL_RUNQ_CAPACITY: u32 = 256;

/// Emit one event per entry of `ctx`'s local queue plus its `runNext` slot
///
/// Returns the number of entries walked.
///
/// # Errors
/// - [`ProbeError::ReadFault`] if head or tail cannot be read
/// - [`ProbeError::BoundExceeded`] if `tail - head` exceeds the capacity; nothing is emitted
pub fn snapshot_local_runq<R: MemoryReader, L: BoundedLoop, S: EventSink>(
    target: &Target<'_, R>,
    loops: &L,
    ctx: u64,
    etype: u64,
    grouping_thread_id: i64,
    out: &mut Emitter<'_, S>,
) -> Result<u32, ProbeError> {
    let off = target.offsets;
    let head = target.reader.read_u32(ctx + off.ctx_runq_head)?;
    let tail = target.reader.read_u32(ctx + off.ctx_runq_tail)?;

    let dist = tail.wrapping_sub(head);
    if dist > LOCAL_RUNQ_CAPACITY {
        return Err(ProbeError::BoundExceeded);
    }

    let ctx_id = target.ctx_id(ctx);
    let thread_id = target.thread_id(target.ctx_thread(ctx));
    let runq_base = ctx + off.ctx_runq;

    let mut walked = 0;
    loops.run(LOCAL_RUNQ_CAPACITY + 1, |k| {
        if k > dist {
            return ControlFlow::Break(());
        }
        let idx = head.wrapping_add(k);
        let task = if idx == tail {
            target.reader.read_ptr(ctx + off.ctx_run_next)
        } else {
            let slot = u64::from(idx % LOCAL_RUNQ_CAPACITY);
            target.reader.read_ptr(runq_base + slot * PTR_SIZE)
        };

        out.emit(&LocalRunqEvent {
            etype,
            ctx_id,
            head: u64::from(head),
            tail: u64::from(tail),
            entry_idx: u64::from(idx),
            entry: target.task_entry(task),
            thread_id,
            grouping_thread_id,
        });
        walked += 1;
        ControlFlow::Continue(())
    });

    Ok(walked)
}
