//! Typed accessors for the monitored runtime's records
//!
//! Everything here zero-fills (or returns [`NO_ID`]) on a failed read: a
//! probe would rather report a partially blank record than nothing.

use crate::event::{RunqEntry, NO_ID};
use crate::memory::MemoryReader;
use crate::offsets::OffsetConfig;

/// Memory reader paired with the layout of the build it reads
pub struct Target<'a, R: MemoryReader> {
    pub reader: R,
    pub offsets: &'a OffsetConfig,
}

impl<'a, R: MemoryReader> Target<'a, R> {
    pub fn new(reader: R, offsets: &'a OffsetConfig) -> Self {
        Self { reader, offsets }
    }

    /// `(pc, id)` of a task; the empty entry for a null task
    pub fn task_entry(&self, task: u64) -> RunqEntry {
        if task == 0 {
            return RunqEntry::EMPTY;
        }
        RunqEntry {
            pc: self.reader.read_u64(task + self.offsets.task_start_pc).unwrap_or(0),
            task_id: self.reader.read_u64(task + self.offsets.task_id).unwrap_or(0),
        }
    }

    pub fn task_id(&self, task: u64) -> u64 {
        if task == 0 {
            return 0;
        }
        self.reader.read_u64(task + self.offsets.task_id).unwrap_or(0)
    }

    /// Thread binding the task runs on (null if none)
    pub fn task_thread(&self, task: u64) -> u64 {
        if task == 0 {
            return 0;
        }
        self.reader.read_ptr(task + self.offsets.task_thread)
    }

    pub fn thread_id(&self, thread: u64) -> i64 {
        if thread == 0 {
            return NO_ID;
        }
        self.reader.read_i64(thread + self.offsets.thread_id).unwrap_or(NO_ID)
    }

    /// Execution context bound to a thread (null if none)
    pub fn thread_context(&self, thread: u64) -> u64 {
        if thread == 0 {
            return 0;
        }
        self.reader.read_ptr(thread + self.offsets.thread_context)
    }

    pub fn ctx_id(&self, ctx: u64) -> i64 {
        if ctx == 0 {
            return NO_ID;
        }
        self.reader.read_i32(ctx + self.offsets.ctx_id).map_or(NO_ID, i64::from)
    }

    pub fn ctx_thread(&self, ctx: u64) -> u64 {
        if ctx == 0 {
            return 0;
        }
        self.reader.read_ptr(ctx + self.offsets.ctx_thread)
    }

    /// Id of the thread the task runs on
    pub fn task_thread_id(&self, task: u64) -> i64 {
        self.thread_id(self.task_thread(task))
    }

    /// Execution context of the thread the task runs on (null if none)
    pub fn task_context(&self, task: u64) -> u64 {
        self.thread_context(self.task_thread(task))
    }
}
