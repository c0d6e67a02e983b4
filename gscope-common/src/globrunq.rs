//! Global run-queue snapshot
//!
//! The global queue is an unbounded singly-linked chain threaded through each
//! task's `schedlink`. The walk visits it in fixed-size chunks so the nested
//! loop stays provably bounded, and the scheduler's `runqsize` counter decides
//! how far to go.
//!
//! Entries carry no producer id: two walks that report the same `size` can
//! interleave on the channel and still look like one unbroken index sequence
//! to the reader.

use core::ops::ControlFlow;

use crate::bounded::BoundedLoop;
use crate::channel::{Emitter, EventSink};
use crate::error::ProbeError;
use crate::event::{GlobalRunqEvent, RunqEntry, EVENT_GLOBAL_RUNQ_ENTRY};
use crate::memory::MemoryReader;
use crate::target::Target;

/// Nodes visited per chunk
pub const GLOBAL_RUNQ_CHUNK_LEN: u32 = 16;

/// Chunks visited per snapshot
pub const GLOBAL_RUNQ_MAX_CHUNKS: u32 = 16;

/// Largest queue size the walk accepts
pub const GLOBAL_RUNQ_MAX_SIZE: i32 = (GLOBAL_RUNQ_CHUNK_LEN * GLOBAL_RUNQ_MAX_CHUNKS) as i32;

/// Emit the global queue followed by a terminator at index `size`
///
/// Returns the number of entries visited (terminator excluded).
///
/// # Errors
/// - [`ProbeError::ReadFault`] if the head pointer or the size cannot be read
/// - [`ProbeError::BoundExceeded`] if the size is negative or above [`GLOBAL_RUNQ_MAX_SIZE`]
pub fn snapshot_global_runq<R: MemoryReader, L: BoundedLoop, S: EventSink>(
    target: &Target<'_, R>,
    loops: &L,
    out: &mut Emitter<'_, S>,
) -> Result<u32, ProbeError> {
    let off = target.offsets;
    let mut node = target.reader.read_u64(off.sched_addr + off.sched_runq_head)?;
    let size = target.reader.read_i32(off.sched_addr + off.sched_runq_size)?;
    if !(0..=GLOBAL_RUNQ_MAX_SIZE).contains(&size) {
        return Err(ProbeError::BoundExceeded);
    }
    // Checked non-negative above.
    let remaining = size.unsigned_abs();

    let mut idx = 0u32;
    let mut chunk = 0u32;
    loops.run(GLOBAL_RUNQ_MAX_CHUNKS, |current| {
        chunk = current;
        for _ in 0..GLOBAL_RUNQ_CHUNK_LEN {
            if node == 0 || idx >= remaining {
                return ControlFlow::Break(());
            }
            out.emit(&GlobalRunqEvent {
                etype: EVENT_GLOBAL_RUNQ_ENTRY,
                size: i64::from(size),
                chunk: u64::from(current),
                entry_idx: u64::from(idx),
                entry: target.task_entry(node),
            });
            node = target.reader.read_ptr(node + off.task_sched_link);
            idx += 1;
        }
        chunk = current + 1;
        ControlFlow::Continue(())
    });

    out.emit(&GlobalRunqEvent {
        etype: EVENT_GLOBAL_RUNQ_ENTRY,
        size: i64::from(size),
        chunk: u64::from(chunk),
        entry_idx: u64::from(remaining),
        entry: RunqEntry::EMPTY,
    });

    Ok(idx)
}
