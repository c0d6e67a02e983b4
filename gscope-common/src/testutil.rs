//! In-memory process image and recording sink for the traversal tests

use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::ControlFlow;

use crate::bounded::{BoundedLoop, PlainLoop};
use crate::channel::{ChannelExhausted, EventSink};
use crate::event::WireEvent;
use crate::memory::{MemoryReader, ReadFault};
use crate::offsets::OffsetConfig;
use crate::wire::{decode, Event};

pub const SCHED_ADDR: u64 = 0x10_0000;
pub const CONTEXTS_SLICE_ADDR: u64 = 0x20_0000;
pub const SEMTABLE_ADDR: u64 = 0x30_0000;
pub const WAIT_REASONS_ADDR: u64 = 0x40_0000;

pub fn test_offsets() -> OffsetConfig {
    OffsetConfig {
        task_id: 8,
        task_start_pc: 16,
        task_thread: 24,
        task_sched_link: 32,
        thread_id: 8,
        thread_context: 16,
        ctx_id: 0,
        ctx_runq_head: 8,
        ctx_runq_tail: 12,
        ctx_runq: 16,
        ctx_run_next: 16 + 256 * 8,
        ctx_thread: 16 + 256 * 8 + 8,
        sched_runq_head: 0,
        sched_runq_size: 16,
        sema_root_stride: 64,
        sema_root_treap: 8,
        waiter_task: 0,
        waiter_addr: 8,
        waiter_left: 16,
        waiter_right: 24,
        waiter_wait_link: 32,
        sched_addr: SCHED_ADDR,
        contexts_slice_addr: CONTEXTS_SLICE_ADDR,
        semtable_addr: SEMTABLE_ADDR,
        wait_reasons_addr: WAIT_REASONS_ADDR,
    }
}

/// Sparse byte-addressed memory; unwritten bytes fault
#[derive(Default)]
pub struct FakeMemory {
    bytes: HashMap<u64, u8>,
}

impl FakeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            self.bytes.insert(addr + i as u64, *b);
        }
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) {
        self.write_bytes(addr, &value.to_ne_bytes());
    }

    pub fn write_i64(&mut self, addr: u64, value: i64) {
        self.write_bytes(addr, &value.to_ne_bytes());
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) {
        self.write_bytes(addr, &value.to_ne_bytes());
    }

    pub fn write_i32(&mut self, addr: u64, value: i32) {
        self.write_bytes(addr, &value.to_ne_bytes());
    }

    /// Lay out a task record
    pub fn add_task(&mut self, off: &OffsetConfig, addr: u64, id: u64, pc: u64, thread: u64) {
        self.write_u64(addr + off.task_id, id);
        self.write_u64(addr + off.task_start_pc, pc);
        self.write_u64(addr + off.task_thread, thread);
        self.write_u64(addr + off.task_sched_link, 0);
    }

    /// Lay out a thread binding record
    pub fn add_thread(&mut self, off: &OffsetConfig, addr: u64, id: i64, ctx: u64) {
        self.write_i64(addr + off.thread_id, id);
        self.write_u64(addr + off.thread_context, ctx);
    }

    /// Lay out an execution context with an all-null run queue
    pub fn add_context(
        &mut self,
        off: &OffsetConfig,
        addr: u64,
        id: i32,
        head: u32,
        tail: u32,
        thread: u64,
    ) {
        self.write_i32(addr + off.ctx_id, id);
        self.write_u32(addr + off.ctx_runq_head, head);
        self.write_u32(addr + off.ctx_runq_tail, tail);
        for slot in 0..256u64 {
            self.write_u64(addr + off.ctx_runq + slot * 8, 0);
        }
        self.write_u64(addr + off.ctx_run_next, 0);
        self.write_u64(addr + off.ctx_thread, thread);
    }

    pub fn set_runq_slot(&mut self, off: &OffsetConfig, ctx: u64, slot: u64, task: u64) {
        self.write_u64(ctx + off.ctx_runq + slot * 8, task);
    }

    pub fn set_run_next(&mut self, off: &OffsetConfig, ctx: u64, task: u64) {
        self.write_u64(ctx + off.ctx_run_next, task);
    }
}

impl MemoryReader for FakeMemory {
    fn read_bytes(&self, addr: u64, dst: &mut [u8]) -> Result<(), ReadFault> {
        for (i, b) in dst.iter_mut().enumerate() {
            *b = *self.bytes.get(&(addr + i as u64)).ok_or(ReadFault)?;
        }
        Ok(())
    }
}

/// Sink that keeps every event's bytes, optionally with a record budget
#[derive(Default)]
pub struct RecordingSink {
    pub records: Vec<Vec<u8>>,
    pub capacity: Option<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { records: Vec::new(), capacity: Some(capacity) }
    }

    pub fn decoded(&self) -> Vec<Event> {
        self.records.iter().map(|r| decode(r).expect("recorded event decodes")).collect()
    }
}

impl EventSink for RecordingSink {
    fn output<E: WireEvent>(&mut self, event: &E) -> Result<(), ChannelExhausted> {
        if self.capacity.is_some_and(|cap| self.records.len() >= cap) {
            return Err(ChannelExhausted);
        }
        self.records.push(event.as_bytes().to_vec());
        Ok(())
    }
}

/// Plain loop that remembers the bound of every loop it ran, outermost first
#[derive(Default)]
pub struct CountingLoop {
    bounds: RefCell<Vec<u32>>,
}

impl CountingLoop {
    pub fn bounds(&self) -> Vec<u32> {
        self.bounds.borrow().clone()
    }
}

impl BoundedLoop for CountingLoop {
    fn run<F: FnMut(u32) -> ControlFlow<()>>(&self, count: u32, body: F) {
        self.bounds.borrow_mut().push(count);
        PlainLoop.run(count, body);
    }
}
