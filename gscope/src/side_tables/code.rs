//! # Attach Offsets
//!
//! Where inside a function a uprobe should go. Entry probes sit past Go's
//! stack-split check: a probe at byte 0 fires a second time when the stack
//! grows and the function restarts. Return probes go on every `ret`. Delay
//! points cover the start of every source line of a package's functions.

use crate::domain::ScopeError;
use crate::side_tables::disasm::{prologue_end, return_offsets};
use crate::side_tables::elf_image::ElfImage;
use crate::side_tables::pclntab::{package_of, GoFunc, Pclntab};
use gscope_common::MemoryReader;
use log::debug;
use std::collections::HashMap;

/// Largest function body read for disassembly
const MAX_FUNCTION_LEN: u64 = 1 << 20;

/// Attach offset lookups, by symbol or by package
pub trait AttachOffsets {
    /// Offset just past the stack-split check, 0 when the function has none
    ///
    /// # Errors
    /// Unknown symbol, unreadable or undecodable code.
    fn entry_offset(&self, symbol: &str) -> Result<u64, ScopeError>;

    /// Offsets of every `ret` in the function
    ///
    /// # Errors
    /// Unknown symbol, unreadable or undecodable code.
    fn return_offsets(&self, symbol: &str) -> Result<Vec<u64>, ScopeError>;

    /// Delay points of every function in `package`: the entry offset, then
    /// the first instruction of each later source line. Sorted by symbol.
    ///
    /// # Errors
    /// As [`AttachOffsets::entry_offset`], plus unreadable line tables.
    fn package_offsets(&self, package: &str) -> Result<Vec<(String, Vec<u64>)>, ScopeError>;
}

/// Function table and machine code of the monitored binary
pub struct TargetCode<'a> {
    image: &'a ElfImage,
    pclntab: Pclntab<'a>,
    by_name: HashMap<&'a str, GoFunc>,
}

impl<'a> TargetCode<'a> {
    /// # Errors
    /// [`ScopeError::MalformedPclntab`] if the binary's `.gopclntab` cannot be read.
    pub fn new(image: &'a ElfImage) -> Result<Self, ScopeError> {
        let pclntab = Pclntab::parse(image.pclntab())?;
        let mut by_name = HashMap::new();
        for func in pclntab.funcs()? {
            by_name.insert(pclntab.func_name(&func)?, func);
        }
        Ok(Self { image, pclntab, by_name })
    }

    fn func(&self, symbol: &str) -> Result<&GoFunc, ScopeError> {
        self.by_name.get(symbol).ok_or_else(|| ScopeError::SymbolNotFound(symbol.to_string()))
    }

    fn code(&self, symbol: &str, func: &GoFunc) -> Result<Vec<u8>, ScopeError> {
        if func.len() > MAX_FUNCTION_LEN {
            return Err(ScopeError::FunctionTooLarge { symbol: symbol.to_string(), len: func.len() });
        }
        let mut code = vec![0u8; usize::try_from(func.len()).unwrap_or(0)];
        self.image
            .read_bytes(func.entry, &mut code)
            .map_err(|_| ScopeError::CodeUnavailable(symbol.to_string()))?;
        Ok(code)
    }
}

impl AttachOffsets for TargetCode<'_> {
    fn entry_offset(&self, symbol: &str) -> Result<u64, ScopeError> {
        let func = self.func(symbol)?;
        let offset = prologue_end(symbol, &self.code(symbol, func)?)?;
        if offset.is_none() {
            debug!("{symbol}: no stack-split check, probing at entry");
        }
        Ok(offset.unwrap_or(0))
    }

    fn return_offsets(&self, symbol: &str) -> Result<Vec<u64>, ScopeError> {
        let func = self.func(symbol)?;
        return_offsets(symbol, &self.code(symbol, func)?)
    }

    fn package_offsets(&self, package: &str) -> Result<Vec<(String, Vec<u64>)>, ScopeError> {
        let mut names: Vec<&str> =
            self.by_name.keys().copied().filter(|name| package_of(name) == package).collect();
        names.sort_unstable();

        let mut points = Vec::with_capacity(names.len());
        for name in names {
            let func = self.func(name)?;
            let mut offsets = vec![self.entry_offset(name)?];
            for offset in self.pclntab.line_offsets(func)? {
                if !offsets.contains(&offset) {
                    offsets.push(offset);
                }
            }
            points.push((name.to_string(), offsets));
        }
        Ok(points)
    }
}
