//! eBPF side of the pipeline
//!
//! - Attach plan (which program on which symbol, resolved to offsets)
//! - eBPF program loading, side-table population and attachment
//! - Probe counters printed at exit

pub mod diagnostics;
pub mod ebpf_setup;
pub mod probe_plan;

pub use diagnostics::print_probe_diagnostics;
pub use ebpf_setup::{
    attach_plan, init_ebpf_logger, load_ebpf_program, populate_side_tables, AttachSummary,
};
pub use probe_plan::{AttachAt, ProbePlan, ProbeSpec, ResolvedPlan, ResolvedProbe};
