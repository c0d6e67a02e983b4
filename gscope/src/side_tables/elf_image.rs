//! The monitored binary's loadable sections, addressable like process memory
//!
//! Go executables are linked non-PIE by default, so the link-time address of
//! initialized data in the file equals its run-time address. Reading the
//! file lets userspace walk tables such as `runtime.waitReasonStrings` with
//! the same routines the probes use, without touching the live process.

use crate::config::SymbolLookup;
use crate::domain::ScopeError;
use gscope_common::{MemoryReader, ReadFault};
use object::{Object, ObjectSection, ObjectSymbol, SectionKind};
use std::collections::HashMap;
use std::path::Path;

pub const PCLNTAB_SECTION: &str = ".gopclntab";

#[derive(Debug)]
struct Section {
    addr: u64,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct ElfImage {
    /// Sorted by address
    sections: Vec<Section>,
    symbols: HashMap<String, u64>,
    pclntab: Vec<u8>,
}

impl ElfImage {
    /// Load sections, symbols and `.gopclntab` from `path`
    ///
    /// # Errors
    /// I/O or parse failures, or a binary without `.gopclntab`.
    pub fn open(path: &Path) -> Result<Self, ScopeError> {
        let file_data = std::fs::read(path)?;
        let obj = object::File::parse(&*file_data)?;

        let mut sections = Vec::new();
        let mut pclntab = None;
        for section in obj.sections() {
            if section.name().is_ok_and(|name| name == PCLNTAB_SECTION) {
                pclntab = Some(section.uncompressed_data()?.into_owned());
            }
            // Zero-filled sections have no file bytes; their contents are only known at run time
            if section.address() == 0 || section.kind() == SectionKind::UninitializedData {
                continue;
            }
            let data = section.uncompressed_data()?.into_owned();
            if !data.is_empty() {
                sections.push(Section { addr: section.address(), data });
            }
        }

        let pclntab = pclntab.ok_or_else(|| ScopeError::MissingSection {
            binary: path.display().to_string(),
            section: PCLNTAB_SECTION.to_string(),
        })?;

        let symbols = obj
            .symbols()
            .filter(|sym| sym.address() != 0)
            .filter_map(|sym| sym.name().ok().map(|name| (name.to_string(), sym.address())))
            .collect();

        Ok(Self::from_parts(sections.into_iter().map(|s| (s.addr, s.data)), symbols, pclntab))
    }

    /// Build an image from raw parts
    pub fn from_parts(
        sections: impl IntoIterator<Item = (u64, Vec<u8>)>,
        symbols: HashMap<String, u64>,
        pclntab: Vec<u8>,
    ) -> Self {
        let mut sections: Vec<Section> =
            sections.into_iter().map(|(addr, data)| Section { addr, data }).collect();
        sections.sort_by_key(|s| s.addr);
        Self { sections, symbols, pclntab }
    }

    #[must_use]
    pub fn pclntab(&self) -> &[u8] {
        &self.pclntab
    }
}

impl MemoryReader for ElfImage {
    fn read_bytes(&self, addr: u64, dst: &mut [u8]) -> Result<(), ReadFault> {
        let idx = self.sections.partition_point(|s| s.addr <= addr);
        let section = idx.checked_sub(1).and_then(|i| self.sections.get(i)).ok_or(ReadFault)?;
        let start = usize::try_from(addr - section.addr).map_err(|_| ReadFault)?;
        let src = section.data.get(start..start + dst.len()).ok_or(ReadFault)?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

impl SymbolLookup for ElfImage {
    fn symbol_address(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> ElfImage {
        ElfImage::from_parts(
            [(0x2000, vec![9; 16]), (0x1000, (0u8..32).collect())],
            [("runtime.sched".to_string(), 0x1010)].into_iter().collect(),
            Vec::new(),
        )
    }

    #[test]
    fn test_reads_inside_sections() {
        let img = image();
        assert_eq!(img.read_u32(0x1004).unwrap(), u32::from_ne_bytes([4, 5, 6, 7]));
        assert_eq!(img.read_u64(0x2008).unwrap(), u64::from_ne_bytes([9; 8]));
    }

    #[test]
    fn test_reads_outside_sections_fault() {
        let img = image();
        assert_eq!(img.read_u64(0x0ff8), Err(ReadFault));
        // Straddles the end of the first section
        assert_eq!(img.read_u64(0x101c), Err(ReadFault));
        assert_eq!(img.read_u64(0x3000), Err(ReadFault));
    }

    #[test]
    fn test_symbol_lookup() {
        let img = image();
        assert_eq!(img.symbol_address("runtime.sched"), Some(0x1010));
        assert_eq!(img.symbol_address("runtime.allp"), None);
    }
}
