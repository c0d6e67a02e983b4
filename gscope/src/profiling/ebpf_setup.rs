//! # eBPF Program Loading and Attachment
//!
//! Loads the probe object with the target's [`OffsetConfig`] and tuning
//! globals baked in, fills the side-table maps, and attaches the uprobes of a
//! [`ResolvedPlan`].
//!
//! ## Functions
//!
//! - [`load_ebpf_program()`] - Load eBPF bytecode with globals set
//! - [`populate_side_tables()`] - Write `FUNCTAB` and `WAIT_REASONS`
//! - [`attach_plan()`] - Load each planned program once, attach it per offset

use anyhow::{Context, Result};
use aya::{include_bytes_aligned, maps::Array, programs::UProbe, Ebpf, EbpfLoader};
use aya_log::EbpfLogger;
use gscope_common::{FuncInfo, OffsetConfig, WaitReason};
use log::{info, warn};
use std::collections::HashMap;

use crate::domain::ScopeError;
use crate::profiling::probe_plan::ResolvedPlan;

/// Load the eBPF program binary
///
/// Always uses the release build because debug builds pull in formatting
/// code that's incompatible with BPF. The release build uses LTO to
/// eliminate dead code.
///
/// # Errors
/// Returns an error if the verifier or the loader rejects the object
pub fn load_ebpf_program(offsets: &OffsetConfig, functab_len: u32, delay_ns: u64) -> Result<Ebpf> {
    let bpf = EbpfLoader::new()
        .set_global("OFFSETS", offsets, true)
        .set_global("FUNCTAB_LEN", &functab_len, true)
        .set_global("DELAY_NS", &delay_ns, true)
        .load(include_bytes_aligned!("../../../target/bpfel-unknown-none/release/gscope"))
        .map_err(|e| ScopeError::EbpfLoadFailed(e.to_string()))?;
    Ok(bpf)
}

/// Initialize eBPF logger
pub fn init_ebpf_logger(bpf: &mut Ebpf) {
    if let Err(e) = EbpfLogger::init(bpf) {
        warn!("Failed to initialize eBPF logger: {e}");
    }
}

/// Write the function table and wait-reason strings into their array maps
///
/// # Errors
/// Returns an error if a map is missing or an update fails
pub fn populate_side_tables(
    bpf: &mut Ebpf,
    functab: &[FuncInfo],
    wait_reasons: &[WaitReason],
) -> Result<()> {
    let mut map: Array<_, FuncInfo> = Array::try_from(
        bpf.map_mut("FUNCTAB").ok_or_else(|| ScopeError::MapNotFound("FUNCTAB".into()))?,
    )?;
    for (idx, func) in (0u32..).zip(functab) {
        map.set(idx, func, 0).with_context(|| format!("FUNCTAB[{idx}]"))?;
    }
    info!("✓ Loaded {} function table entries", functab.len());

    let mut map: Array<_, WaitReason> = Array::try_from(
        bpf.map_mut("WAIT_REASONS").ok_or_else(|| ScopeError::MapNotFound("WAIT_REASONS".into()))?,
    )?;
    for (code, reason) in (0u32..).zip(wait_reasons) {
        map.set(code, reason, 0).with_context(|| format!("WAIT_REASONS[{code}]"))?;
    }
    info!("✓ Loaded {} wait reasons", wait_reasons.len());

    Ok(())
}

/// Outcome of [`attach_plan`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AttachSummary {
    pub attached: usize,
    pub failed: usize,
    /// Plan entries whose offsets were not found
    pub unresolved: usize,
}

/// Attach every probe of `plan` to `target_path`, filtered to `pid`
///
/// A program the verifier rejects, or a probe point that fails to attach, is
/// logged and counted; the others still go ahead.
///
/// # Errors
/// Returns an error if a planned program is missing from the object
pub fn attach_plan(
    bpf: &mut Ebpf,
    plan: &ResolvedPlan,
    target_path: &str,
    pid: Option<i32>,
) -> Result<AttachSummary> {
    let mut summary = AttachSummary { unresolved: plan.unresolved, ..AttachSummary::default() };
    let mut loaded: HashMap<&str, bool> = HashMap::new();

    for probe in &plan.probes {
        let program: &mut UProbe = bpf
            .program_mut(&probe.program)
            .ok_or_else(|| ScopeError::ProgramNotFound(probe.program.clone()))?
            .try_into()?;

        let usable = *loaded.entry(probe.program.as_str()).or_insert_with(|| {
            match program.load() {
                Ok(()) => true,
                Err(e) => {
                    warn!("⚠️  {}: {}", probe.program, ScopeError::EbpfLoadFailed(e.to_string()));
                    false
                }
            }
        });
        if !usable {
            summary.failed += probe.offsets.len();
            continue;
        }

        for &offset in &probe.offsets {
            match program.attach(Some(probe.symbol.as_str()), offset, target_path, pid) {
                Ok(_) => {
                    info!("✓ Attached uprobe: {} → {}+{offset:#x}", probe.program, probe.symbol);
                    summary.attached += 1;
                }
                Err(e) => {
                    let err = ScopeError::ProbeAttachFailed {
                        probe: probe.program.clone(),
                        symbol: probe.symbol.clone(),
                        offset,
                        binary: target_path.to_string(),
                        error: e.to_string(),
                    };
                    warn!("⚠️  {err}");
                    summary.failed += 1;
                }
            }
        }
    }

    Ok(summary)
}
