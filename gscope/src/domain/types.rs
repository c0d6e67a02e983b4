//! Newtypes for identifiers that travel through the event stream
//!
//! The probes report ids of the monitored runtime's threads (`m.id`),
//! execution contexts (`p.id`) and tasks (`g.goid`). Thread and context ids
//! use `-1` for "not bound"; the display form shows that as `-`.

use gscope_common::event::NO_ID;
use serde::Serialize;
use std::fmt;

/// Process ID (PID) of the monitored process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Pid(pub i32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

/// Runtime thread binding id (`m.id`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ThreadId(pub i64);

impl ThreadId {
    pub const NONE: Self = Self(NO_ID);

    #[must_use]
    pub fn is_none(self) -> bool {
        self.0 == NO_ID
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "M-")
        } else {
            write!(f, "M{}", self.0)
        }
    }
}

/// Execution context id (`p.id`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ContextId(pub i64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == NO_ID {
            write!(f, "P-")
        } else {
            write!(f, "P{}", self.0)
        }
    }
}

/// Task id (`g.goid`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G{}", self.0)
    }
}

/// Program counter in the monitored binary, kept opaque
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Pc(pub u64);

impl fmt::Display for Pc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbound_ids_display_as_dash() {
        assert_eq!(ThreadId::NONE.to_string(), "M-");
        assert_eq!(ThreadId(3).to_string(), "M3");
        assert_eq!(ContextId(-1).to_string(), "P-");
        assert_eq!(ContextId(0).to_string(), "P0");
    }

    #[test]
    fn test_task_and_pc_display() {
        assert_eq!(TaskId(42).to_string(), "G42");
        assert_eq!(Pc(0x40_1000).to_string(), "0x401000");
        assert_eq!(Pid(7).to_string(), "PID:7");
    }
}
