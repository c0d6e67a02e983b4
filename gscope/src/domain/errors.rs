//! Structured error types for gscope
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::Pid;
use gscope_common::DecodeError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScopeError {
    #[error("Failed to load eBPF program: {0}")]
    EbpfLoadFailed(String),

    #[error("Process {0} not found")]
    ProcessNotFound(Pid),

    #[error("Failed to attach {probe} to {symbol}+{offset:#x} in {binary}: {error}")]
    ProbeAttachFailed { probe: String, symbol: String, offset: u64, binary: String, error: String },

    #[error("eBPF program {0} not found in the probe object")]
    ProgramNotFound(String),

    #[error("eBPF map {0} not found in the probe object")]
    MapNotFound(String),

    #[error("{binary} has no {section} section")]
    MissingSection { binary: String, section: String },

    #[error("Malformed .gopclntab: {0}")]
    MalformedPclntab(String),

    #[error("Function {0} not found in the binary's function table")]
    SymbolNotFound(String),

    #[error("Function {symbol} is {len} bytes, too large to disassemble")]
    FunctionTooLarge { symbol: String, len: u64 },

    #[error("Machine code of {0} is not in the binary's sections")]
    CodeUnavailable(String),

    #[error("Cannot decode instruction in {symbol} at +{offset:#x}")]
    Disassembly { symbol: String, offset: u64 },

    #[error("Wait-reason table unreadable at {0:#x}")]
    WaitReasonsUnreadable(u64),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Object(#[from] object::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No address given for {0} and the symbol is not in the binary")]
    MissingAddress(String),

    #[error("Invalid address {0:?}")]
    InvalidAddress(String),

    #[error("Invalid probe plan: {0}")]
    InvalidPlan(String),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Export writer stopped")]
    WriterGone,

    #[error("Export writer thread panicked")]
    WriterPanicked,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_error_display() {
        let err = ScopeError::ProcessNotFound(Pid(1234));
        assert_eq!(err.to_string(), "Process PID:1234 not found");
    }

    #[test]
    fn test_probe_attach_error() {
        let err = ScopeError::ProbeAttachFailed {
            probe: "parked".to_string(),
            symbol: "runtime.gopark".to_string(),
            offset: 0x14,
            binary: "/usr/bin/my-app".to_string(),
            error: "symbol not found".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("parked"));
        assert!(msg.contains("runtime.gopark+0x14"));
        assert!(msg.contains("/usr/bin/my-app"));
    }

    #[test]
    fn test_decode_error_converts() {
        let err: ScopeError = DecodeError::UnknownTag(4).into();
        assert_eq!(err.to_string(), "unknown event tag 4");
    }
}
