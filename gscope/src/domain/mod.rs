//! Domain model for gscope
//!
//! Newtypes for the identifiers that appear in the event stream, and the
//! structured errors of the userspace side.

pub mod errors;
pub mod types;

pub use types::{ContextId, Pc, Pid, TaskId, ThreadId};

pub use errors::{ConfigError, ExportError, ScopeError};
