//! # Capture Probes
//!
//! What each instrumentation point reads and emits, independent of how the
//! probe was triggered. The sandbox builds a [`Probe`] from the uprobe
//! registers and hands it BPF-backed reader, sink, delay and loop
//! implementations; tests hand it an in-memory image.

use core::ops::ControlFlow;
use core::sync::atomic::AtomicU64;

use crate::bounded::BoundedLoop;
use crate::channel::{Emitter, EventSink};
use crate::error::ProbeError;
use crate::event::{
    DelayEvent, DispatchedEvent, FoundRunnableEvent, ParkedEvent, RunqStealEvent,
    TaskCreatedEvent, WokenEvent, EVENT_DELAY, EVENT_DISPATCHED, EVENT_FOUND_RUNNABLE,
    EVENT_LOCAL_RUNQ_ENTRY, EVENT_PARKED, EVENT_RUNQ_STEAL, EVENT_TASK_CREATED, EVENT_WOKEN,
    EVENT_WOKEN_RUNQ_ENTRY, NO_ID,
};
use crate::globrunq::snapshot_global_runq;
use crate::memory::MemoryReader;
use crate::offsets::{GoRegs, OffsetConfig, PTR_SIZE, SLICE_LEN_OFFSET};
use crate::runq::snapshot_local_runq;
use crate::semtable::{snapshot_semtable, TreapStack};
use crate::target::Target;
use crate::unwind::{unwind_stack, FuncTable};
use crate::waitreason::{WaitReason, WaitReasonTable};

/// Largest `allp` the found-runnable probe will snapshot
pub const MAX_EXECUTION_CONTEXTS: u32 = 64;

/// Configured stall of the triggering thread
pub trait InjectDelay {
    fn inject(&mut self);
}

impl InjectDelay for () {
    fn inject(&mut self) {}
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProbeStats {
    pub emitted: u32,
    pub dropped: u32,
    /// The parked task's reason code had no entry in the table
    pub unknown_wait_reason: bool,
}

/// One probe invocation
pub struct Probe<'a, R: MemoryReader, S: EventSink, D: InjectDelay, L: BoundedLoop> {
    target: Target<'a, R>,
    regs: GoRegs,
    out: Emitter<'a, S>,
    delay: D,
    loops: L,
    unknown_wait_reason: bool,
}

impl<'a, R: MemoryReader, S: EventSink, D: InjectDelay, L: BoundedLoop> Probe<'a, R, S, D, L> {
    pub fn new(
        reader: R,
        offsets: &'a OffsetConfig,
        regs: GoRegs,
        sink: &'a mut S,
        delay: D,
        loops: L,
    ) -> Self {
        Self {
            target: Target::new(reader, offsets),
            regs,
            out: Emitter::new(sink),
            delay,
            loops,
            unknown_wait_reason: false,
        }
    }

    #[must_use]
    pub fn stats(&self) -> ProbeStats {
        ProbeStats {
            emitted: self.out.emitted(),
            dropped: self.out.dropped(),
            unknown_wait_reason: self.unknown_wait_reason,
        }
    }

    fn current_thread_id(&self) -> i64 {
        self.target.task_thread_id(self.regs.task)
    }

    /// Context bound to the current thread, null if none
    fn current_ctx(&self) -> u64 {
        self.target.task_context(self.regs.task)
    }

    /// Id of the current thread's context ([`NO_ID`] if none)
    pub fn current_ctx_id(&self) -> i64 {
        self.target.ctx_id(self.current_ctx())
    }

    /// `runtime.newproc(fn *funcval)` entry
    pub fn task_created(&mut self) -> Result<(), ProbeError> {
        let fn_pc = self.target.reader.read_ptr(self.regs.param1);
        self.out.emit(&TaskCreatedEvent {
            etype: EVENT_TASK_CREATED,
            pc: fn_pc,
            creator_task_id: self.target.task_id(self.regs.task),
            thread_id: self.current_thread_id(),
        });
        self.delay.inject();
        Ok(())
    }

    /// User-selected delay point
    pub fn delay_point(&mut self) -> Result<(), ProbeError> {
        self.out.emit(&DelayEvent {
            etype: EVENT_DELAY,
            pc: self.regs.pc,
            task_id: self.target.task_id(self.regs.task),
            thread_id: self.current_thread_id(),
        });
        self.delay.inject();
        Ok(())
    }

    /// Snapshot of the current context's local queue (after `newproc`)
    ///
    /// # Errors
    /// [`ProbeError::ReadFault`] when the thread has no context, otherwise as
    /// [`snapshot_local_runq`].
    pub fn local_runq_status(&mut self) -> Result<(), ProbeError> {
        self.current_runq(EVENT_LOCAL_RUNQ_ENTRY, NO_ID)
    }

    /// Snapshot of the current context's local queue after a wake-up,
    /// grouped under the current thread so it can be paired with its
    /// [`WokenEvent`]
    ///
    /// # Errors
    /// As [`Probe::local_runq_status`].
    pub fn woken_runq_status(&mut self) -> Result<(), ProbeError> {
        let grouping = self.current_thread_id();
        self.current_runq(EVENT_WOKEN_RUNQ_ENTRY, grouping)
    }

    fn current_runq(&mut self, etype: u64, grouping: i64) -> Result<(), ProbeError> {
        let ctx = self.current_ctx();
        if ctx == 0 {
            return Err(ProbeError::ReadFault);
        }
        snapshot_local_runq(&self.target, &self.loops, ctx, etype, grouping, &mut self.out)?;
        Ok(())
    }

    /// # Errors
    /// As [`snapshot_global_runq`].
    pub fn global_runq_status(&mut self) -> Result<(), ProbeError> {
        snapshot_global_runq(&self.target, &self.loops, &mut self.out)?;
        Ok(())
    }

    /// `runtime.runqsteal(pp, p2 *p, ...)` entry
    pub fn runq_steal(&mut self) -> Result<(), ProbeError> {
        self.out.emit(&RunqStealEvent {
            etype: EVENT_RUNQ_STEAL,
            thread_id: self.current_thread_id(),
            stealing_ctx_id: self.target.ctx_id(self.regs.param1),
            stolen_ctx_id: self.target.ctx_id(self.regs.param2),
        });
        Ok(())
    }

    /// `runtime.schedule` entry
    ///
    /// The event is emitted even when unwinding fails (depth `-1`).
    ///
    /// # Errors
    /// [`ProbeError::UnwindFailure`] after emission when a pc was not covered
    /// by the function table.
    pub fn dispatched<T: FuncTable + ?Sized>(&mut self, functab: &T) -> Result<(), ProbeError> {
        let stack = unwind_stack(&self.target.reader, functab, self.regs.pc, self.regs.fp);
        self.out.emit(&DispatchedEvent {
            etype: EVENT_DISPATCHED,
            thread_id: self.current_thread_id(),
            callstack: stack.pcs,
            depth: stack.depth,
            ctx_id: self.current_ctx_id(),
        });
        self.delay.inject();
        if stack.depth < 0 {
            return Err(ProbeError::UnwindFailure);
        }
        Ok(())
    }

    /// `runtime.execute(gp *g, ...)` entry, followed by a snapshot of every context
    ///
    /// # Errors
    /// - [`ProbeError::ReadFault`] when the context slice header is unreadable
    /// - [`ProbeError::BoundExceeded`] when there are more than
    ///   [`MAX_EXECUTION_CONTEXTS`] contexts; nothing is emitted
    /// - the first error of the per-context snapshots, after all were attempted
    pub fn found_runnable(&mut self) -> Result<(), ProbeError> {
        self.delay.inject();

        let off = self.target.offsets;
        let allp = self.target.reader.read_ptr(off.contexts_slice_addr);
        let count = self.target.reader.read_i64(off.contexts_slice_addr + SLICE_LEN_OFFSET)?;
        if !(0..=i64::from(MAX_EXECUTION_CONTEXTS)).contains(&count) {
            return Err(ProbeError::BoundExceeded);
        }
        let thread_id = self.current_thread_id();

        self.out.emit(&FoundRunnableEvent {
            etype: EVENT_FOUND_RUNNABLE,
            thread_id,
            found: self.target.task_entry(self.regs.param1),
            caller_pc: self.target.reader.read_ptr(self.regs.sp),
            ctx_id: self.current_ctx_id(),
            ctx_count: count.unsigned_abs(),
        });

        let target = &self.target;
        let loops = &self.loops;
        let out = &mut self.out;
        let mut first_err = None;
        loops.run(MAX_EXECUTION_CONTEXTS, |i| {
            if i64::from(i) >= count {
                return ControlFlow::Break(());
            }
            let ctx = target.reader.read_ptr(allp + u64::from(i) * PTR_SIZE);
            let res = if ctx == 0 {
                Err(ProbeError::ReadFault)
            } else {
                snapshot_local_runq(target, loops, ctx, EVENT_LOCAL_RUNQ_ENTRY, thread_id, out)
            };
            if let Err(err) = res {
                first_err.get_or_insert(err);
            }
            ControlFlow::Continue(())
        });

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// `runtime.gopark(unlockf, lock, reason, ...)` entry
    ///
    /// Unknown reason codes travel as an empty string and are flagged in
    /// [`ProbeStats::unknown_wait_reason`].
    pub fn parked<W: WaitReasonTable + ?Sized>(&mut self, reasons: &W) -> Result<(), ProbeError> {
        // waitReason is a uint8
        let code = (self.regs.param3 & 0xff) as u32;
        let reason = reasons.reason(code).unwrap_or_else(|| {
            self.unknown_wait_reason = true;
            WaitReason::EMPTY
        });

        self.delay.inject();
        self.out.emit(&ParkedEvent {
            etype: EVENT_PARKED,
            thread_id: self.current_thread_id(),
            parked: self.target.task_entry(self.regs.task),
            wait_reason: reason.bytes,
        });
        Ok(())
    }

    /// `runtime.ready(gp *g, ...)` entry
    pub fn woken(&mut self) -> Result<(), ProbeError> {
        self.out.emit(&WokenEvent {
            etype: EVENT_WOKEN,
            thread_id: self.current_thread_id(),
            task_id: self.target.task_id(self.regs.param1),
        });
        self.delay.inject();
        Ok(())
    }

    /// Versioned snapshot of the semaphore wait table
    ///
    /// `stack` is the current context's scratch slot.
    ///
    /// # Errors
    /// As [`snapshot_semtable`].
    pub fn semtable_status(
        &mut self,
        version_counter: &AtomicU64,
        stack: &mut TreapStack,
    ) -> Result<u64, ProbeError> {
        snapshot_semtable(&self.target, &self.loops, version_counter, stack, &mut self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded::PlainLoop;
    use crate::event::{LocalRunqEvent, WAIT_REASON_MAX_LEN};
    use crate::runq::LOCAL_RUNQ_CAPACITY;
    use crate::testutil::{
        test_offsets, CountingLoop, FakeMemory, RecordingSink, CONTEXTS_SLICE_ADDR,
    };
    use crate::unwind::{FuncInfo, FUNC_FLAG_TOP_FRAME};
    use crate::wire::Event;

    const TASK: u64 = 0x1_0000;
    const THREAD: u64 = 0x2_0000;
    const CTX: u64 = 0x3_0000;
    const ALLP: u64 = 0x5_0000;

    #[derive(Default)]
    struct CountingDelay(u32);

    impl InjectDelay for &mut CountingDelay {
        fn inject(&mut self) {
            self.0 += 1;
        }
    }

    /// Current task 9 on thread 4 bound to context 2
    fn image() -> (FakeMemory, OffsetConfig) {
        let off = test_offsets();
        let mut mem = FakeMemory::new();
        mem.add_task(&off, TASK, 9, 0x40_0100, THREAD);
        mem.add_thread(&off, THREAD, 4, CTX);
        mem.add_context(&off, CTX, 2, 0, 1, THREAD);
        (mem, off)
    }

    fn regs() -> GoRegs {
        GoRegs { task: TASK, ..GoRegs::default() }
    }

    fn new_probe<'a>(
        mem: &'a FakeMemory,
        off: &'a OffsetConfig,
        regs: GoRegs,
        sink: &'a mut RecordingSink,
    ) -> Probe<'a, &'a FakeMemory, RecordingSink, (), PlainLoop> {
        Probe::new(mem, off, regs, sink, (), PlainLoop)
    }

    #[test]
    fn test_task_created_reads_funcval() {
        let (mut mem, off) = image();
        mem.write_u64(0x6_0000, 0x40_5555);
        let mut sink = RecordingSink::new();
        let mut probe =
            new_probe(&mem, &off, GoRegs { param1: 0x6_0000, ..regs() }, &mut sink);
        probe.task_created().expect("probe");
        assert_eq!(probe.stats().emitted, 1);

        assert_eq!(
            sink.decoded(),
            vec![Event::TaskCreated(TaskCreatedEvent {
                etype: EVENT_TASK_CREATED,
                pc: 0x40_5555,
                creator_task_id: 9,
                thread_id: 4,
            })]
        );
    }

    #[test]
    fn test_delay_point_emits_then_delays() {
        let (mem, off) = image();
        let mut sink = RecordingSink::new();
        let mut delay = CountingDelay::default();
        let regs = GoRegs { pc: 0x40_9000, ..regs() };
        let mut probe = Probe::new(&mem, &off, regs, &mut sink, &mut delay, PlainLoop);
        probe.delay_point().expect("probe");
        drop(probe);
        assert_eq!(delay.0, 1);
        match sink.decoded().as_slice() {
            [Event::Delay(ev)] => {
                assert_eq!(ev.pc, 0x40_9000);
                assert_eq!(ev.task_id, 9);
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn test_task_created_and_woken_delay_after_emitting() {
        let (mut mem, off) = image();
        mem.add_task(&off, 0x7_0000, 33, 0, 0);
        let mut sink = RecordingSink::new();
        let mut delay = CountingDelay::default();

        let regs = GoRegs { param1: 0x7_0000, ..regs() };
        let mut probe = Probe::new(&mem, &off, regs, &mut sink, &mut delay, PlainLoop);
        probe.task_created().expect("probe");
        probe.woken().expect("probe");
        assert_eq!(probe.stats().emitted, 2);
        drop(probe);
        assert_eq!(delay.0, 2);
    }

    #[test]
    fn test_woken_runq_status_is_grouped_by_current_thread() {
        let (mem, off) = image();
        let mut sink = RecordingSink::new();
        let mut probe = new_probe(&mem, &off, regs(), &mut sink);
        probe.woken_runq_status().expect("probe");

        let events = sink.decoded();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(
            e,
            Event::WokenRunq(LocalRunqEvent { grouping_thread_id: 4, ctx_id: 2, .. })
        )));
    }

    #[test]
    fn test_runq_status_without_context_faults() {
        let (mut mem, off) = image();
        mem.write_u64(THREAD + off.thread_context, 0);
        let mut sink = RecordingSink::new();
        let mut probe = new_probe(&mem, &off, regs(), &mut sink);
        assert_eq!(probe.local_runq_status(), Err(ProbeError::ReadFault));
        assert_eq!(probe.current_ctx_id(), NO_ID);
    }

    #[test]
    fn test_runq_steal_reports_both_contexts() {
        let (mut mem, off) = image();
        mem.add_context(&off, 0x4_0000, 7, 0, 0, 0);
        let mut sink = RecordingSink::new();
        let mut probe =
            new_probe(&mem, &off, GoRegs { param1: CTX, param2: 0x4_0000, ..regs() }, &mut sink);
        probe.runq_steal().expect("probe");

        match sink.decoded().as_slice() {
            [Event::RunqSteal(ev)] => {
                assert_eq!((ev.thread_id, ev.stealing_ctx_id, ev.stolen_ctx_id), (4, 2, 7));
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn test_dispatched_emits_even_when_unwind_fails() {
        let (mut mem, off) = image();
        mem.write_u64(0x8000, 0);
        mem.write_u64(0x8008, 0x40_0010);
        let functab = [
            FuncInfo::new(0x40_0000, 0, FUNC_FLAG_TOP_FRAME),
            FuncInfo::new(0x40_1000, 0, 0),
            FuncInfo::new(0x40_2000, 0, 0),
        ];

        let mut sink = RecordingSink::new();
        let mut probe =
            new_probe(&mem, &off, GoRegs { pc: 0x40_1004, fp: 0x8000, ..regs() }, &mut sink);
        probe.dispatched(functab.as_slice()).expect("probe");
        let mut probe = new_probe(&mem, &off, GoRegs { pc: 0x10, ..regs() }, &mut sink);
        assert_eq!(probe.dispatched(functab.as_slice()), Err(ProbeError::UnwindFailure));

        match sink.decoded().as_slice() {
            [Event::Dispatched(ok), Event::Dispatched(failed)] => {
                assert_eq!(ok.depth, 2);
                assert_eq!(&ok.callstack[..2], &[0x40_1004, 0x40_0010]);
                assert_eq!(ok.ctx_id, 2);
                assert_eq!(failed.depth, -1);
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    fn add_allp(mem: &mut FakeMemory, contexts: &[u64]) {
        mem.write_u64(CONTEXTS_SLICE_ADDR, ALLP);
        mem.write_i64(CONTEXTS_SLICE_ADDR + 8, contexts.len() as i64);
        for (i, ctx) in contexts.iter().enumerate() {
            mem.write_u64(ALLP + i as u64 * 8, *ctx);
        }
    }

    #[test]
    fn test_found_runnable_snapshots_every_context() {
        let (mut mem, off) = image();
        mem.add_context(&off, 0x4_0000, 3, 4, 6, 0);
        add_allp(&mut mem, &[CTX, 0x4_0000]);
        mem.add_task(&off, 0x7_0000, 21, 0x40_7000, 0);
        mem.write_u64(0x9000, 0x40_abcd);

        let mut sink = RecordingSink::new();
        let mut probe =
            new_probe(&mem, &off, GoRegs { param1: 0x7_0000, sp: 0x9000, ..regs() }, &mut sink);
        probe.found_runnable().expect("probe");

        let events = sink.decoded();
        match &events[0] {
            Event::FoundRunnable(ev) => {
                assert_eq!(ev.found.task_id, 21);
                assert_eq!(ev.caller_pc, 0x40_abcd);
                assert_eq!(ev.ctx_count, 2);
                assert_eq!(ev.thread_id, 4);
            }
            other => panic!("unexpected event {other:?}"),
        }
        // 2 entries for context 2, 3 for context 3
        assert_eq!(events.len(), 1 + 2 + 3);
        assert!(events[1..].iter().all(|e| matches!(
            e,
            Event::LocalRunq(LocalRunqEvent { grouping_thread_id: 4, .. })
        )));
    }

    #[test]
    fn test_found_runnable_iterates_through_loop_runner() {
        let (mut mem, off) = image();
        mem.add_context(&off, 0x4_0000, 3, 4, 6, 0);
        add_allp(&mut mem, &[CTX, 0x4_0000]);
        let mut sink = RecordingSink::new();
        let loops = CountingLoop::default();
        let mut probe = Probe::new(&mem, &off, regs(), &mut sink, (), &loops);
        probe.found_runnable().expect("probe");
        assert_eq!(probe.stats().emitted, 1 + 2 + 3);
        drop(probe);

        let per_context = LOCAL_RUNQ_CAPACITY + 1;
        assert_eq!(loops.bounds(), vec![MAX_EXECUTION_CONTEXTS, per_context, per_context]);
    }

    #[test]
    fn test_found_runnable_rejects_too_many_contexts() {
        let (mut mem, off) = image();
        let contexts = vec![CTX; MAX_EXECUTION_CONTEXTS as usize + 1];
        add_allp(&mut mem, &contexts);
        let mut sink = RecordingSink::new();
        let mut probe = new_probe(&mem, &off, regs(), &mut sink);
        assert_eq!(probe.found_runnable(), Err(ProbeError::BoundExceeded));
        assert!(sink.records.is_empty());
    }

    #[test]
    fn test_parked_unknown_reason_is_empty_and_flagged() {
        let (mem, off) = image();
        let reasons = [WaitReason::from_text(""), WaitReason::from_text("chan send")];

        let mut sink = RecordingSink::new();
        let mut probe = new_probe(&mem, &off, GoRegs { param3: 1, ..regs() }, &mut sink);
        probe.parked(reasons.as_slice()).expect("probe");
        assert!(!probe.stats().unknown_wait_reason);
        let mut probe = new_probe(&mem, &off, GoRegs { param3: 200, ..regs() }, &mut sink);
        probe.parked(reasons.as_slice()).expect("probe");
        assert!(probe.stats().unknown_wait_reason);

        match sink.decoded().as_slice() {
            [Event::Parked(known), Event::Parked(unknown)] => {
                assert_eq!(known.parked.task_id, 9);
                assert_eq!(&known.wait_reason[..9], b"chan send");
                assert_eq!(unknown.wait_reason, [0; WAIT_REASON_MAX_LEN]);
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn test_woken_reports_woken_task() {
        let (mut mem, off) = image();
        mem.add_task(&off, 0x7_0000, 33, 0, 0);
        let mut sink = RecordingSink::new();
        let mut probe = new_probe(&mem, &off, GoRegs { param1: 0x7_0000, ..regs() }, &mut sink);
        probe.woken().expect("probe");
        assert_eq!(
            sink.decoded(),
            vec![Event::Woken(WokenEvent { etype: EVENT_WOKEN, thread_id: 4, task_id: 33 })]
        );
    }
}
