//! Userspace end of the event stream
//!
//! ```text
//! ring buffer → wire::decode → SnapshotAssembler → display / JSON lines
//! ```

pub mod assembler;
pub mod event_display;
pub mod export;
pub mod records;

pub use assembler::{AssemblerStats, SnapshotAssembler};
pub use export::JsonLinesExporter;
pub use records::Record;
