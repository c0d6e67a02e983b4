//! # eBPF Scheduler Probes
//!
//! Uprobes attached inside the Go runtime of the monitored process. Each
//! program builds a [`Probe`] over BPF-helper backed reader, sink and delay
//! and runs one operation from `gscope_common::probes`.
//!
//! ## Maps (Shared with Userspace)
//!
//! - `EVENTS` - Ring buffer (256KB) for the event stream
//! - `FUNCTAB` - Function table for the unwinder (loaded from `.gopclntab`)
//! - `WAIT_REASONS` - Wait-reason strings by code
//! - `SEMTABLE_STACKS` - Treap-walk scratch stack per execution context
//! - `EVENT_OUTPUT_FAILED`, `PROBE_ERRORS`, `UNKNOWN_WAIT_REASONS` - Diagnostic counters
//!
//! ## Globals (set with `EbpfLoader::set_global`)
//!
//! - `OFFSETS` - [`OffsetConfig`] of the monitored build
//! - `FUNCTAB_LEN` - Valid entries in `FUNCTAB`
//! - `DELAY_NS` - Fault-injection stall, 0 to disable
//!
//! ## Build
//!
//! ```bash
//! cargo xtask build-ebpf --release
//! ```

#![no_std]
#![no_main]
#![allow(unused_unsafe)]

use core::ops::ControlFlow;
use core::sync::atomic::AtomicU64;

use aya_ebpf::{
    cty::c_void,
    helpers::{bpf_ktime_get_ns, bpf_loop, bpf_probe_read_user_buf},
    macros::{map, uprobe},
    maps::{Array, HashMap, RingBuf},
    programs::ProbeContext,
};
use aya_log_ebpf::{debug, warn};
use gscope_common::{
    delay::{Clock, DelayState, MAX_LOOP_ITERS},
    event::WireEvent,
    semtable::TreapStack,
    unwind::FUNCTAB_MAX_ENTRIES,
    waitreason::NUM_WAIT_REASONS,
    BoundedLoop, ChannelExhausted, EventSink, FuncInfo, FuncTable, GoRegs, InjectDelay, MemoryReader,
    OffsetConfig, Probe, ProbeError, ReadFault, WaitReason, WaitReasonTable,
};

// ============================================================================
// eBPF Maps
// ============================================================================

/// Event stream to userspace, drained with `ring_buf.next()`
#[map]
static EVENTS: RingBuf = RingBuf::with_byte_size(256 * 1024, 0);

/// Function table sorted by entry pc; only the first `FUNCTAB_LEN` entries are valid
#[map]
static FUNCTAB: Array<FuncInfo> = Array::with_max_entries(FUNCTAB_MAX_ENTRIES, 0);

/// Wait-reason string by reason code
#[map]
static WAIT_REASONS: Array<WaitReason> = Array::with_max_entries(NUM_WAIT_REASONS, 0);

/// Context id → auxiliary stack of the semaphore-table walk
///
/// Too large for the 512-byte program stack. Two walks on the same context
/// at once would share the slot.
#[map]
static SEMTABLE_STACKS: HashMap<i64, TreapStack> = HashMap::with_max_entries(256, 0);

// ============================================================================
// Debug Counters
// ============================================================================

/// Ring buffer reservations that failed (channel full)
#[map]
static EVENT_OUTPUT_FAILED: HashMap<u32, u64> = HashMap::with_max_entries(1, 0);

/// Probe failures by [`ProbeError::code`]
#[map]
static PROBE_ERRORS: HashMap<u32, u64> = HashMap::with_max_entries(8, 0);

/// Parked events whose reason code had no string
#[map]
static UNKNOWN_WAIT_REASONS: HashMap<u32, u64> = HashMap::with_max_entries(1, 0);

// ============================================================================
// Globals
// ============================================================================

#[no_mangle]
static mut OFFSETS: OffsetConfig = OffsetConfig::zeroed();

#[no_mangle]
static FUNCTAB_LEN: u32 = 0;

#[no_mangle]
static DELAY_NS: u64 = 0;

/// Semaphore-table snapshot version, incremented once per walk
static SEMTABLE_VERSION: AtomicU64 = AtomicU64::new(0);

#[no_mangle]
#[link_section = "license"]
static LICENSE: [u8; 4] = *b"GPL\0";

fn offsets() -> &'static OffsetConfig {
    // Written only by the loader, before any program runs.
    unsafe { &*core::ptr::addr_of!(OFFSETS) }
}

fn functab_len() -> u32 {
    unsafe { core::ptr::read_volatile(&FUNCTAB_LEN) }
}

fn delay_ns() -> u64 {
    unsafe { core::ptr::read_volatile(&DELAY_NS) }
}

fn bump(counter: &HashMap<u32, u64>, key: u32) {
    unsafe {
        let current = counter.get(&key).copied().unwrap_or(0);
        let _ = counter.insert(&key, &(current + 1), 0);
    }
}

// ============================================================================
// Helper-backed implementations
// ============================================================================

struct UserMemory;

impl MemoryReader for UserMemory {
    fn read_bytes(&self, addr: u64, dst: &mut [u8]) -> Result<(), ReadFault> {
        unsafe { bpf_probe_read_user_buf(addr as *const u8, dst) }.map_err(|_| ReadFault)
    }
}

struct RingSink;

impl EventSink for RingSink {
    fn output<E: WireEvent>(&mut self, event: &E) -> Result<(), ChannelExhausted> {
        unsafe { EVENTS.output(event, 0) }.map_err(|_| {
            bump(&EVENT_OUTPUT_FAILED, 0);
            ChannelExhausted
        })
    }
}

struct FuncTabMap;

impl FuncTable for FuncTabMap {
    fn len(&self) -> u32 {
        functab_len()
    }

    fn entry(&self, idx: u32) -> Option<FuncInfo> {
        FUNCTAB.get(idx).copied()
    }
}

struct WaitReasonMap;

impl WaitReasonTable for WaitReasonMap {
    fn reason(&self, code: u32) -> Option<WaitReason> {
        if code >= NUM_WAIT_REASONS {
            return None;
        }
        WAIT_REASONS.get(code).copied()
    }
}

struct KtimeClock;

impl Clock for KtimeClock {
    fn now_ns(&self) -> u64 {
        unsafe { bpf_ktime_get_ns() }
    }
}

/// Busy-wait built from two nested `bpf_loop`s of [`MAX_LOOP_ITERS`] each
struct BpfDelay<'c> {
    ctx: &'c ProbeContext,
    delay_ns: u64,
}

extern "C" fn delay_inner(_index: u64, state: *mut c_void) -> i64 {
    let state = unsafe { &mut *state.cast::<DelayState>() };
    i64::from(state.poll(&KtimeClock))
}

extern "C" fn delay_outer(_index: u64, state: *mut c_void) -> i64 {
    unsafe { bpf_loop(MAX_LOOP_ITERS, delay_inner as *mut c_void, state, 0) };
    let state = unsafe { &*state.cast::<DelayState>() };
    i64::from(state.done)
}

impl InjectDelay for BpfDelay<'_> {
    fn inject(&mut self) {
        if self.delay_ns == 0 {
            return;
        }
        let mut state = DelayState::start(&KtimeClock, self.delay_ns);
        let state_ptr = core::ptr::addr_of_mut!(state).cast::<c_void>();
        unsafe { bpf_loop(MAX_LOOP_ITERS, delay_outer as *mut c_void, state_ptr, 0) };
        if !state.done {
            debug!(self.ctx, "returning before delay duration is met");
        }
    }
}

/// Loop whose body runs as a `bpf_loop` callback
///
/// The callback context is the body closure itself, living on the caller's
/// stack; each closure type gets its own callback.
struct BpfLoop;

extern "C" fn loop_body<F: FnMut(u32) -> ControlFlow<()>>(index: u64, ctx: *mut c_void) -> i64 {
    let body = unsafe { &mut *ctx.cast::<F>() };
    let index = u32::try_from(index).unwrap_or(u32::MAX);
    i64::from(body(index).is_break())
}

impl BoundedLoop for BpfLoop {
    fn run<F: FnMut(u32) -> ControlFlow<()>>(&self, count: u32, mut body: F) {
        let ctx = core::ptr::addr_of_mut!(body).cast::<c_void>();
        unsafe { bpf_loop(count, loop_body::<F> as *mut c_void, ctx, 0) };
    }
}

// ============================================================================
// Program plumbing
// ============================================================================

type BpfProbe<'a, 'c> = Probe<'a, UserMemory, RingSink, BpfDelay<'c>, BpfLoop>;

fn regs(ctx: &ProbeContext) -> GoRegs {
    let regs = unsafe { &*ctx.regs };
    GoRegs {
        param1: regs.rax,
        param2: regs.rbx,
        param3: regs.rcx,
        task: regs.r14,
        pc: regs.rip,
        sp: regs.rsp,
        fp: regs.rbp,
    }
}

/// Run one probe operation and account for its outcome
fn run<F>(ctx: &ProbeContext, name: &str, op: F) -> u32
where
    F: FnOnce(&mut BpfProbe<'_, '_>) -> Result<(), ProbeError>,
{
    let mut sink = RingSink;
    let delay = BpfDelay { ctx, delay_ns: delay_ns() };
    let mut probe = Probe::new(UserMemory, offsets(), regs(ctx), &mut sink, delay, BpfLoop);
    let result = op(&mut probe);

    let stats = probe.stats();
    if stats.unknown_wait_reason {
        bump(&UNKNOWN_WAIT_REASONS, 0);
        warn!(ctx, "{}: unknown wait reason code", name);
    }
    if stats.dropped > 0 {
        warn!(ctx, "{}: dropped {} events", name, stats.dropped);
    }

    match result {
        Ok(()) => 0,
        Err(err) => {
            bump(&PROBE_ERRORS, err.code());
            warn!(ctx, "{}: {}", name, err.name());
            err.code()
        }
    }
}

// ============================================================================
// Programs
// ============================================================================

/// `runtime.newproc` entry
#[uprobe]
pub fn task_created(ctx: ProbeContext) -> u32 {
    run(&ctx, "task_created", |probe| probe.task_created())
}

/// User-selected delay points
#[uprobe]
pub fn delay_point(ctx: ProbeContext) -> u32 {
    run(&ctx, "delay_point", |probe| probe.delay_point())
}

/// `runtime.newproc` returns
#[uprobe]
pub fn local_runq_status(ctx: ProbeContext) -> u32 {
    run(&ctx, "local_runq_status", |probe| probe.local_runq_status())
}

/// `runtime.goready` returns
#[uprobe]
pub fn woken_runq_status(ctx: ProbeContext) -> u32 {
    run(&ctx, "woken_runq_status", |probe| probe.woken_runq_status())
}

/// `runtime.findRunnable` entry
#[uprobe]
pub fn global_runq_status(ctx: ProbeContext) -> u32 {
    run(&ctx, "global_runq_status", |probe| probe.global_runq_status())
}

/// `runtime.runqsteal` entry
#[uprobe]
pub fn runq_steal(ctx: ProbeContext) -> u32 {
    run(&ctx, "runq_steal", |probe| probe.runq_steal())
}

/// `runtime.schedule` entry
#[uprobe]
pub fn dispatched(ctx: ProbeContext) -> u32 {
    run(&ctx, "dispatched", |probe| probe.dispatched(&FuncTabMap))
}

/// `runtime.execute` entry
#[uprobe]
pub fn found_runnable(ctx: ProbeContext) -> u32 {
    run(&ctx, "found_runnable", |probe| probe.found_runnable())
}

/// `runtime.gopark` entry
#[uprobe]
pub fn parked(ctx: ProbeContext) -> u32 {
    run(&ctx, "parked", |probe| probe.parked(&WaitReasonMap))
}

/// `runtime.ready` entry
#[uprobe]
pub fn woken(ctx: ProbeContext) -> u32 {
    run(&ctx, "woken", |probe| probe.woken())
}

/// `runtime.semrelease1` entry
#[uprobe]
pub fn semtable_status(ctx: ProbeContext) -> u32 {
    run(&ctx, "semtable_status", |probe| {
        let stack = treap_stack(probe.current_ctx_id()).ok_or(ProbeError::ScratchUnavailable)?;
        probe.semtable_status(&SEMTABLE_VERSION, stack).map(|_| ())
    })
}

/// Scratch stack of a context, created on first use
fn treap_stack(ctx_id: i64) -> Option<&'static mut TreapStack> {
    if let Some(ptr) = SEMTABLE_STACKS.get_ptr_mut(&ctx_id) {
        return Some(unsafe { &mut *ptr });
    }
    SEMTABLE_STACKS.insert(&ctx_id, &TreapStack::zeroed(), 0).ok()?;
    SEMTABLE_STACKS.get_ptr_mut(&ctx_id).map(|ptr| unsafe { &mut *ptr })
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
