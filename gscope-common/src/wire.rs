//! # Wire Decoder
//!
//! Turns one ring-buffer record back into a typed [`Event`]. Records arrive
//! with no alignment guarantee, so every field is copied out by byte offset
//! instead of casting the buffer.

use core::fmt;
use core::mem::size_of;

use crate::event::{
    DelayEvent, DispatchedEvent, FoundRunnableEvent, GlobalRunqEvent, LocalRunqEvent,
    ParkedEvent, RunqEntry, RunqStealEvent, SemaWaiter, SemaWaiterEvent, TaskCreatedEvent,
    WokenEvent, EVENT_DELAY, EVENT_DISPATCHED, EVENT_FOUND_RUNNABLE, EVENT_GLOBAL_RUNQ_ENTRY,
    EVENT_LOCAL_RUNQ_ENTRY, EVENT_PARKED, EVENT_RUNQ_STEAL, EVENT_SEMA_WAITER,
    EVENT_TASK_CREATED, EVENT_WOKEN, EVENT_WOKEN_RUNQ_ENTRY, MAX_STACK_TRACE_DEPTH,
    WAIT_REASON_MAX_LEN,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    TaskCreated(TaskCreatedEvent),
    Delay(DelayEvent),
    LocalRunq(LocalRunqEvent),
    RunqSteal(RunqStealEvent),
    GlobalRunq(GlobalRunqEvent),
    SemaWaiter(SemaWaiterEvent),
    Dispatched(DispatchedEvent),
    FoundRunnable(FoundRunnableEvent),
    Parked(ParkedEvent),
    Woken(WokenEvent),
    WokenRunq(LocalRunqEvent),
}

impl Event {
    #[must_use]
    pub fn tag(&self) -> u64 {
        match self {
            Event::TaskCreated(e) => e.etype,
            Event::Delay(e) => e.etype,
            Event::LocalRunq(e) | Event::WokenRunq(e) => e.etype,
            Event::RunqSteal(e) => e.etype,
            Event::GlobalRunq(e) => e.etype,
            Event::SemaWaiter(e) => e.etype,
            Event::Dispatched(e) => e.etype,
            Event::FoundRunnable(e) => e.etype,
            Event::Parked(e) => e.etype,
            Event::Woken(e) => e.etype,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Record shorter than the layout its tag names
    Truncated { expected: usize, actual: usize },
    UnknownTag(u64),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { expected, actual } => {
                write!(f, "record truncated: expected {expected} bytes, got {actual}")
            }
            DecodeError::UnknownTag(tag) => write!(f, "unknown event tag {tag}"),
        }
    }
}

impl core::error::Error for DecodeError {}

/// Sequential field reader over a length-checked record
struct Fields<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    /// Checks that `buf` holds at least a `T`
    fn new<T>(buf: &'a [u8]) -> Result<Self, DecodeError> {
        let expected = size_of::<T>();
        if buf.len() < expected {
            return Err(DecodeError::Truncated { expected, actual: buf.len() });
        }
        Ok(Self { buf, pos: 0 })
    }

    fn bytes<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        if let Some(src) = self.buf.get(self.pos..self.pos + N) {
            out.copy_from_slice(src);
        }
        self.pos += N;
        out
    }

    fn u64(&mut self) -> u64 {
        u64::from_ne_bytes(self.bytes())
    }

    fn i64(&mut self) -> i64 {
        i64::from_ne_bytes(self.bytes())
    }

    fn entry(&mut self) -> RunqEntry {
        RunqEntry { pc: self.u64(), task_id: self.u64() }
    }
}

fn local_runq(buf: &[u8]) -> Result<LocalRunqEvent, DecodeError> {
    let mut f = Fields::new::<LocalRunqEvent>(buf)?;
    Ok(LocalRunqEvent {
        etype: f.u64(),
        ctx_id: f.i64(),
        head: f.u64(),
        tail: f.u64(),
        entry_idx: f.u64(),
        entry: f.entry(),
        thread_id: f.i64(),
        grouping_thread_id: f.i64(),
    })
}

/// Decode one ring record
///
/// Trailing bytes beyond the tagged layout are ignored.
///
/// # Errors
/// [`DecodeError`] on an unknown tag or a short record.
pub fn decode(buf: &[u8]) -> Result<Event, DecodeError> {
    let tag = Fields::new::<u64>(buf)?.u64();

    let event = match tag {
        EVENT_TASK_CREATED => {
            let mut f = Fields::new::<TaskCreatedEvent>(buf)?;
            Event::TaskCreated(TaskCreatedEvent {
                etype: f.u64(),
                pc: f.u64(),
                creator_task_id: f.u64(),
                thread_id: f.i64(),
            })
        }
        EVENT_DELAY => {
            let mut f = Fields::new::<DelayEvent>(buf)?;
            Event::Delay(DelayEvent {
                etype: f.u64(),
                pc: f.u64(),
                task_id: f.u64(),
                thread_id: f.i64(),
            })
        }
        EVENT_LOCAL_RUNQ_ENTRY => Event::LocalRunq(local_runq(buf)?),
        EVENT_WOKEN_RUNQ_ENTRY => Event::WokenRunq(local_runq(buf)?),
        EVENT_RUNQ_STEAL => {
            let mut f = Fields::new::<RunqStealEvent>(buf)?;
            Event::RunqSteal(RunqStealEvent {
                etype: f.u64(),
                thread_id: f.i64(),
                stealing_ctx_id: f.i64(),
                stolen_ctx_id: f.i64(),
            })
        }
        EVENT_GLOBAL_RUNQ_ENTRY => {
            let mut f = Fields::new::<GlobalRunqEvent>(buf)?;
            Event::GlobalRunq(GlobalRunqEvent {
                etype: f.u64(),
                size: f.i64(),
                chunk: f.u64(),
                entry_idx: f.u64(),
                entry: f.entry(),
            })
        }
        EVENT_SEMA_WAITER => {
            let mut f = Fields::new::<SemaWaiterEvent>(buf)?;
            Event::SemaWaiter(SemaWaiterEvent {
                etype: f.u64(),
                version: f.u64(),
                waiter: SemaWaiter { task_id: f.u64(), addr: f.u64() },
                is_terminator: f.u64(),
            })
        }
        EVENT_DISPATCHED => {
            let mut f = Fields::new::<DispatchedEvent>(buf)?;
            let etype = f.u64();
            let thread_id = f.i64();
            let mut callstack = [0u64; MAX_STACK_TRACE_DEPTH];
            for pc in &mut callstack {
                *pc = f.u64();
            }
            Event::Dispatched(DispatchedEvent {
                etype,
                thread_id,
                callstack,
                depth: f.i64(),
                ctx_id: f.i64(),
            })
        }
        EVENT_FOUND_RUNNABLE => {
            let mut f = Fields::new::<FoundRunnableEvent>(buf)?;
            Event::FoundRunnable(FoundRunnableEvent {
                etype: f.u64(),
                thread_id: f.i64(),
                found: f.entry(),
                caller_pc: f.u64(),
                ctx_id: f.i64(),
                ctx_count: f.u64(),
            })
        }
        EVENT_PARKED => {
            let mut f = Fields::new::<ParkedEvent>(buf)?;
            Event::Parked(ParkedEvent {
                etype: f.u64(),
                thread_id: f.i64(),
                parked: f.entry(),
                wait_reason: f.bytes::<WAIT_REASON_MAX_LEN>(),
            })
        }
        EVENT_WOKEN => {
            let mut f = Fields::new::<WokenEvent>(buf)?;
            Event::Woken(WokenEvent { etype: f.u64(), thread_id: f.i64(), task_id: f.u64() })
        }
        other => return Err(DecodeError::UnknownTag(other)),
    };
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{WireEvent, NO_ID};

    /// Copy `bytes` to an odd offset so no field is naturally aligned
    fn unaligned(bytes: &[u8]) -> Vec<u8> {
        let mut buf = vec![0xAAu8; bytes.len() + 1];
        buf[1..].copy_from_slice(bytes);
        buf
    }

    fn assert_decodes<E: WireEvent>(event: &E, expected: Event) {
        assert_eq!(decode(event.as_bytes()), Ok(expected));
        let buf = unaligned(event.as_bytes());
        assert_eq!(decode(&buf[1..]), Ok(expected));
    }

    #[test]
    fn test_dispatched_survives_unaligned_buffer() {
        let ev = DispatchedEvent {
            etype: EVENT_DISPATCHED,
            thread_id: 12,
            callstack: [1, 2, 3, 0xdead_beef, 0, 0, 0, u64::MAX],
            depth: -1,
            ctx_id: NO_ID,
        };
        assert_decodes(&ev, Event::Dispatched(ev));
    }

    #[test]
    fn test_parked_keeps_reason_bytes() {
        let mut wait_reason = [0u8; WAIT_REASON_MAX_LEN];
        wait_reason[..6].copy_from_slice(b"select");
        let ev = ParkedEvent {
            etype: EVENT_PARKED,
            thread_id: 3,
            parked: RunqEntry { pc: 0x40_1000, task_id: 17 },
            wait_reason,
        };
        assert_decodes(&ev, Event::Parked(ev));
    }

    #[test]
    fn test_local_layout_is_shared_by_two_tags() {
        let mut ev = LocalRunqEvent {
            etype: EVENT_LOCAL_RUNQ_ENTRY,
            ctx_id: 1,
            head: u64::from(u32::MAX),
            tail: 2,
            entry_idx: 2,
            entry: RunqEntry::EMPTY,
            thread_id: NO_ID,
            grouping_thread_id: 5,
        };
        assert_decodes(&ev, Event::LocalRunq(ev));
        ev.etype = EVENT_WOKEN_RUNQ_ENTRY;
        assert_decodes(&ev, Event::WokenRunq(ev));
    }

    #[test]
    fn test_remaining_layouts() {
        let sema = SemaWaiterEvent {
            etype: EVENT_SEMA_WAITER,
            version: 9,
            waiter: SemaWaiter { task_id: 4, addr: 0xc000_0100 },
            is_terminator: 0,
        };
        assert_decodes(&sema, Event::SemaWaiter(sema));

        let global = GlobalRunqEvent {
            etype: EVENT_GLOBAL_RUNQ_ENTRY,
            size: 3,
            chunk: 0,
            entry_idx: 3,
            entry: RunqEntry::EMPTY,
        };
        assert_decodes(&global, Event::GlobalRunq(global));

        let found = FoundRunnableEvent {
            etype: EVENT_FOUND_RUNNABLE,
            thread_id: 2,
            found: RunqEntry { pc: 7, task_id: 8 },
            caller_pc: 0x40_0000,
            ctx_id: 1,
            ctx_count: 4,
        };
        assert_decodes(&found, Event::FoundRunnable(found));

        let steal = RunqStealEvent { etype: EVENT_RUNQ_STEAL, thread_id: 1, stealing_ctx_id: 0, stolen_ctx_id: 3 };
        assert_decodes(&steal, Event::RunqSteal(steal));
    }

    #[test]
    fn test_short_record_is_truncated() {
        let ev = WokenEvent { etype: EVENT_WOKEN, thread_id: 1, task_id: 2 };
        let bytes = ev.as_bytes();
        assert_eq!(
            decode(&bytes[..20]),
            Err(DecodeError::Truncated { expected: 24, actual: 20 })
        );
        assert_eq!(decode(&[1, 2]), Err(DecodeError::Truncated { expected: 8, actual: 2 }));
    }

    #[test]
    fn test_reserved_tag_is_unknown() {
        assert_eq!(decode(&4u64.to_ne_bytes()), Err(DecodeError::UnknownTag(4)));
    }
}
