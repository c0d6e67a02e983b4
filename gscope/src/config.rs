//! # Offsets File
//!
//! Field offsets of one build of the monitored runtime, grouped by the Go
//! record they belong to:
//!
//! ```json
//! {
//!   "g":      { "goid": 152, "startpc": 280, "m": 48, "schedlink": 160 },
//!   "m":      { "id": 216, "p": 208 },
//!   "p":      { "id": 0, "runqhead": 400, "runqtail": 404, "runq": 408,
//!               "runnext": 2456, "m": 48 },
//!   "schedt": { "runq_head": 96, "runqsize": 112 },
//!   "sema":   { "root_stride": 64, "root_treap": 0, "sudog_g": 0,
//!               "sudog_elem": 24, "sudog_prev": 16, "sudog_next": 8,
//!               "sudog_waitlink": 64 },
//!   "addresses": { "sched": "0x5a8e40" }
//! }
//! ```
//!
//! Base addresses are optional; the missing ones are looked up in the target's
//! symbol table (see [`SymbolLookup`]).

use crate::domain::ConfigError;
use gscope_common::OffsetConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

pub const SCHED_SYMBOL: &str = "runtime.sched";
pub const ALLP_SYMBOL: &str = "runtime.allp";
pub const SEMTABLE_SYMBOL: &str = "runtime.semtable";
pub const WAIT_REASONS_SYMBOL: &str = "runtime.waitReasonStrings";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskOffsets {
    pub goid: u64,
    pub startpc: u64,
    pub m: u64,
    pub schedlink: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThreadOffsets {
    pub id: u64,
    pub p: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextOffsets {
    pub id: u64,
    pub runqhead: u64,
    pub runqtail: u64,
    pub runq: u64,
    pub runnext: u64,
    pub m: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedOffsets {
    pub runq_head: u64,
    pub runqsize: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SemaOffsets {
    pub root_stride: u64,
    pub root_treap: u64,
    pub sudog_g: u64,
    pub sudog_elem: u64,
    pub sudog_prev: u64,
    pub sudog_next: u64,
    pub sudog_waitlink: u64,
}

/// An address written either as a JSON number or as a `"0x..."` string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Address {
    Number(u64),
    Text(String),
}

impl Address {
    /// # Errors
    /// [`ConfigError::InvalidAddress`] when the text is not decimal or `0x` hex.
    pub fn value(&self) -> Result<u64, ConfigError> {
        match self {
            Address::Number(n) => Ok(*n),
            Address::Text(s) => {
                let s = s.trim();
                let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => s.parse(),
                };
                parsed.map_err(|_| ConfigError::InvalidAddress(s.to_string()))
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Addresses {
    pub sched: Option<Address>,
    pub allp: Option<Address>,
    pub semtable: Option<Address>,
    pub wait_reason_strings: Option<Address>,
}

/// Parsed offsets file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OffsetsFile {
    pub g: TaskOffsets,
    pub m: ThreadOffsets,
    pub p: ContextOffsets,
    pub schedt: SchedOffsets,
    pub sema: SemaOffsets,
    #[serde(default)]
    pub addresses: Addresses,
}

/// Symbol name → address in the monitored binary
pub trait SymbolLookup {
    fn symbol_address(&self, name: &str) -> Option<u64>;
}

impl SymbolLookup for HashMap<String, u64> {
    fn symbol_address(&self, name: &str) -> Option<u64> {
        self.get(name).copied()
    }
}

/// Read and parse an offsets file
///
/// # Errors
/// [`ConfigError::Read`] or [`ConfigError::Parse`].
pub fn load_offsets(path: &Path) -> Result<OffsetsFile, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
    Ok(serde_json::from_str(&text)?)
}

fn address_or_symbol(
    given: Option<&Address>,
    symbol: &str,
    symbols: &impl SymbolLookup,
) -> Result<u64, ConfigError> {
    match given {
        Some(addr) => addr.value(),
        None => symbols
            .symbol_address(symbol)
            .ok_or_else(|| ConfigError::MissingAddress(symbol.to_string())),
    }
}

impl OffsetsFile {
    /// Build the probe-side configuration, filling base addresses from `symbols`
    ///
    /// # Errors
    /// [`ConfigError::MissingAddress`] when an address is neither given nor
    /// found in the symbol table.
    pub fn resolve(&self, symbols: &impl SymbolLookup) -> Result<OffsetConfig, ConfigError> {
        let a = &self.addresses;
        Ok(OffsetConfig {
            task_id: self.g.goid,
            task_start_pc: self.g.startpc,
            task_thread: self.g.m,
            task_sched_link: self.g.schedlink,
            thread_id: self.m.id,
            thread_context: self.m.p,
            ctx_id: self.p.id,
            ctx_runq_head: self.p.runqhead,
            ctx_runq_tail: self.p.runqtail,
            ctx_runq: self.p.runq,
            ctx_run_next: self.p.runnext,
            ctx_thread: self.p.m,
            sched_runq_head: self.schedt.runq_head,
            sched_runq_size: self.schedt.runqsize,
            sema_root_stride: self.sema.root_stride,
            sema_root_treap: self.sema.root_treap,
            waiter_task: self.sema.sudog_g,
            waiter_addr: self.sema.sudog_elem,
            waiter_left: self.sema.sudog_prev,
            waiter_right: self.sema.sudog_next,
            waiter_wait_link: self.sema.sudog_waitlink,
            sched_addr: address_or_symbol(a.sched.as_ref(), SCHED_SYMBOL, symbols)?,
            contexts_slice_addr: address_or_symbol(a.allp.as_ref(), ALLP_SYMBOL, symbols)?,
            semtable_addr: address_or_symbol(a.semtable.as_ref(), SEMTABLE_SYMBOL, symbols)?,
            wait_reasons_addr: address_or_symbol(
                a.wait_reason_strings.as_ref(),
                WAIT_REASONS_SYMBOL,
                symbols,
            )?,
        })
    }
}
