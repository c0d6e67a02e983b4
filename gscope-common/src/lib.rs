//! # Shared Core (eBPF ↔ Userspace)
//!
//! Everything the scheduler probes do, written once and compiled twice: into
//! the eBPF object (with BPF-helper backed [`MemoryReader`] and [`EventSink`])
//! and into userspace, where the same code decodes events, parses side tables
//! and runs under test against an in-memory process image.
//!
//! ## Key Types
//!
//! - [`OffsetConfig`] - field offsets and base addresses of the monitored build
//! - [`Target`] - memory reader plus offsets, with typed record accessors
//! - [`Probe`] - what each instrumentation point reads and emits
//! - [`Event`] / [`decode`] - the wire protocol
//!
//! ## Traversals
//!
//! Every loop has a compile-time bound, and the long ones iterate through a
//! [`BoundedLoop`]. In the probe object that is a `bpf_loop` callback, so the
//! verifier checks each loop body once rather than per iteration:
//!
//! - [`runq::snapshot_local_runq`] - circular local queue plus `runNext`
//! - [`globrunq::snapshot_global_runq`] - linked global queue, in chunks
//! - [`semtable::snapshot_semtable`] - treap table, explicit stack, versioned
//! - [`unwind::unwind_stack`] - frame-pointer walk over the function table

#![cfg_attr(not(test), no_std)]

pub mod bounded;
pub mod channel;
pub mod delay;
pub mod error;
pub mod event;
pub mod globrunq;
pub mod memory;
pub mod offsets;
pub mod probes;
pub mod runq;
pub mod semtable;
pub mod target;
pub mod unwind;
pub mod waitreason;
pub mod wire;

#[cfg(test)]
pub(crate) mod testutil;

pub use bounded::{BoundedLoop, PlainLoop};
pub use channel::{ChannelExhausted, Emitter, EventSink};
pub use error::ProbeError;
pub use memory::{MemoryReader, ReadFault};
pub use offsets::{GoRegs, OffsetConfig};
pub use probes::{InjectDelay, Probe, ProbeStats};
pub use target::Target;
pub use unwind::{FuncInfo, FuncTable};
pub use waitreason::{WaitReason, WaitReasonTable};
pub use wire::{decode, DecodeError, Event};

// Userspace-only: these types cross into maps and globals
#[cfg(feature = "user")]
#[allow(unsafe_code)]
mod pod {
    use super::{FuncInfo, OffsetConfig, WaitReason};

    // SAFETY: `#[repr(C)]`, plain integers and byte arrays, no padding.
    unsafe impl aya::Pod for OffsetConfig {}
    // SAFETY: `#[repr(C)]`; the trailing padding is an explicit field.
    unsafe impl aya::Pod for FuncInfo {}
    // SAFETY: `#[repr(C)]` byte array.
    unsafe impl aya::Pod for WaitReason {}
}
