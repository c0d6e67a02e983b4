//! # gscope - eBPF introspection of the Go scheduler
//!
//! gscope attaches uprobes inside the runtime of a live, unmodified Go process
//! and streams scheduler state: task creation, local and global run queues,
//! work stealing, dispatch with call stacks, park/wake transitions and the
//! semaphore wait table.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Monitored Go process                        │
//! │   runtime.newproc / schedule / execute / gopark / ready ... │
//! └───────────────────────┬─────────────────────────────────────┘
//!                         │ uprobes
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              eBPF programs (gscope-ebpf)                    │
//! │  bounded walks over runq / global queue / semtable / stack  │
//! └───────────────────────┬─────────────────────────────────────┘
//!                         │ EVENTS ring buffer
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  gscope (this crate)                        │
//! │   decode ──▶ SnapshotAssembler ──▶ display / JSON lines     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`config`]: offsets file, resolved into the probes' `OffsetConfig`
//! - [`side_tables`]: function table and wait reasons read from the binary
//! - [`profiling`]: eBPF loading, attach plan, probe diagnostics
//! - [`reader`]: snapshot reassembly, display and export
//! - [`preflight`], [`process_lookup`], [`cli`], [`domain`]
//!
//! ## Typical Usage
//!
//! ```bash
//! sudo ./gscope my-server --offsets go1.22-amd64.json
//! sudo ./gscope --pid 1234 --offsets o.json --probes plan.json --export events.jsonl
//! ```

pub mod cli;
pub mod config;
pub mod domain;
pub mod preflight;
pub mod process_lookup;
pub mod profiling;
pub mod reader;
pub mod side_tables;
