//! # `.gopclntab` Reader
//!
//! The Go runtime's own symbol table, present in every Go binary (1.18+):
//!
//! ```text
//! header:  magic u32 | pad u8 | pad u8 | minLC u8 | ptrSize u8
//!          nfunc | nfiles | textStart | funcnameOffset | cuOffset
//!          | filetabOffset | pctabOffset | pclnOffset        (ptrSize each)
//! functab: at pclnOffset, nfunc + 1 pairs of (entryoff u32, funcoff u32);
//!          the extra pair's entryoff is the end of text
//! _func:   at pclnOffset + funcoff
//!          entryOff u32 | nameOff i32 | args | deferreturn | pcsp u32 (16)
//!          | pcfile u32 (20) | pcln u32 (24) | ... | flag u8 (41, 37 before Go 1.20)
//! ```
//!
//! Pc-value tables (`pcsp`, `pcfile`, `pcln`) live at `pctabOffset` and are
//! sequences of (zigzag value delta, pc delta) varint pairs starting from
//! value `-1` at the function entry.

use crate::domain::ScopeError;
use std::collections::BTreeMap;

/// Go 1.18 and 1.19
pub const PCLNTAB_MAGIC_GO118: u32 = 0xffff_fff0;
/// Go 1.20 and later
pub const PCLNTAB_MAGIC_GO120: u32 = 0xffff_fff1;

pub(crate) const HEADER_FIXED_LEN: usize = 8;
const FUNC_NAME_OFFSET: usize = 4;
const FUNC_PCSP_OFFSET: usize = 16;
const FUNC_PCFILE_OFFSET: usize = 20;
const FUNC_PCLN_OFFSET: usize = 24;

pub(crate) fn malformed(msg: impl Into<String>) -> ScopeError {
    ScopeError::MalformedPclntab(msg.into())
}

/// Little-endian reads with bounds checks
#[derive(Clone, Copy)]
struct Bytes<'a>(&'a [u8]);

impl<'a> Bytes<'a> {
    fn slice(&self, at: usize, len: usize) -> Result<&'a [u8], ScopeError> {
        at.checked_add(len)
            .and_then(|end| self.0.get(at..end))
            .ok_or_else(|| malformed(format!("{len} bytes at {at:#x} past end ({:#x})", self.0.len())))
    }

    fn u32(&self, at: usize) -> Result<u32, ScopeError> {
        let raw = self.slice(at, 4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn i32(&self, at: usize) -> Result<i32, ScopeError> {
        self.u32(at).map(|v| i32::from_le_bytes(v.to_le_bytes()))
    }

    fn u8(&self, at: usize) -> Result<u8, ScopeError> {
        self.0.get(at).copied().ok_or_else(|| malformed(format!("byte at {at:#x} past end")))
    }

    /// A `ptr_size`-wide word
    fn word(&self, at: usize, ptr_size: usize) -> Result<u64, ScopeError> {
        let raw = self.slice(at, ptr_size)?;
        let mut buf = [0u8; 8];
        buf[..ptr_size].copy_from_slice(raw);
        Ok(u64::from_le_bytes(buf))
    }

    fn offset(&self, at: usize, ptr_size: usize) -> Result<usize, ScopeError> {
        usize::try_from(self.word(at, ptr_size)?).map_err(|_| malformed("offset overflows"))
    }

    /// Unsigned LEB128, returning the value and its encoded length
    fn uvarint(&self, at: usize) -> Result<(u32, usize), ScopeError> {
        let mut value = 0u32;
        for (i, shift) in (0..35).step_by(7).enumerate() {
            let byte = self.u8(at + i)?;
            value |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok((value, i + 1));
            }
        }
        Err(malformed(format!("varint at {at:#x} too long")))
    }

    /// NUL-terminated string starting at `at`
    fn cstr(&self, at: usize) -> Result<&'a str, ScopeError> {
        let rest = self.0.get(at..).ok_or_else(|| malformed(format!("name at {at:#x} past end")))?;
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| malformed(format!("unterminated name at {at:#x}")))?;
        std::str::from_utf8(&rest[..len]).map_err(|_| malformed(format!("name at {at:#x} is not UTF-8")))
    }
}

/// One function of the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoFunc {
    pub entry: u64,
    /// Entry of the next function (or end of text)
    pub end: u64,
    pub pcsp: u32,
    pub flag: u8,
    func_off: usize,
}

impl GoFunc {
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.entry)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A run of pcs `[start, end)` sharing one table value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PcRun {
    start: u64,
    end: u64,
    value: i32,
}

/// Parsed header over the raw section bytes
pub struct Pclntab<'a> {
    data: Bytes<'a>,
    functab: Bytes<'a>,
    nfunc: usize,
    text_start: u64,
    quantum: u64,
    flag_offset: usize,
    funcname_offset: usize,
    pctab_offset: usize,
}

impl<'a> Pclntab<'a> {
    /// # Errors
    /// [`ScopeError::MalformedPclntab`] on an unknown magic, a pointer size
    /// other than 4 or 8, or a function count or offset that does not fit the
    /// section.
    pub fn parse(section: &'a [u8]) -> Result<Self, ScopeError> {
        let data = Bytes(section);

        let magic = data.u32(0)?;
        let flag_offset = match magic {
            PCLNTAB_MAGIC_GO118 => 37,
            PCLNTAB_MAGIC_GO120 => 41,
            other => return Err(malformed(format!("unsupported magic {other:#x}"))),
        };
        let quantum = u64::from(data.u8(6)?).max(1);
        let ptr_size = usize::from(data.u8(7)?);
        if ptr_size != 4 && ptr_size != 8 {
            return Err(malformed(format!("pointer size {ptr_size}")));
        }

        let header_word = |n: usize| data.offset(HEADER_FIXED_LEN + n * ptr_size, ptr_size);
        let nfunc = header_word(0)?;
        let text_start = data.word(HEADER_FIXED_LEN + 2 * ptr_size, ptr_size)?;
        let funcname_offset = header_word(3)?;
        let pctab_offset = header_word(6)?;
        let pcln_offset = header_word(7)?;

        let functab =
            Bytes(section.get(pcln_offset..).ok_or_else(|| malformed("pclnOffset past end"))?);
        let fits = nfunc
            .checked_add(1)
            .and_then(|pairs| pairs.checked_mul(8))
            .is_some_and(|len| len <= functab.0.len());
        if !fits {
            return Err(malformed(format!(
                "{nfunc} functions do not fit a {:#x}-byte functab",
                functab.0.len()
            )));
        }

        Ok(Self {
            data,
            functab,
            nfunc,
            text_start,
            quantum,
            flag_offset,
            funcname_offset,
            pctab_offset,
        })
    }

    /// Number of functions (the end-of-text pair excluded)
    #[must_use]
    pub fn len(&self) -> usize {
        self.nfunc
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nfunc == 0
    }

    fn entry_at(&self, idx: usize) -> Result<u64, ScopeError> {
        Ok(self.text_start + u64::from(self.functab.u32(idx * 8)?))
    }

    /// First pc past the last function
    ///
    /// # Errors
    /// [`ScopeError::MalformedPclntab`] if the pair is unreadable.
    pub fn text_end(&self) -> Result<u64, ScopeError> {
        self.entry_at(self.nfunc)
    }

    /// Every function, in table order
    ///
    /// # Errors
    /// [`ScopeError::MalformedPclntab`] if a `_func` record lies outside the section.
    pub fn funcs(&self) -> Result<Vec<GoFunc>, ScopeError> {
        let mut funcs = Vec::with_capacity(self.nfunc);
        for i in 0..self.nfunc {
            let func_off = self.functab.u32(i * 8 + 4)? as usize;
            funcs.push(GoFunc {
                entry: self.entry_at(i)?,
                end: self.entry_at(i + 1)?,
                pcsp: self.functab.u32(func_off + FUNC_PCSP_OFFSET)?,
                flag: self.functab.u8(func_off + self.flag_offset)?,
                func_off,
            });
        }
        Ok(funcs)
    }

    /// Fully qualified name, e.g. `main.(*Server).serve`
    ///
    /// # Errors
    /// [`ScopeError::MalformedPclntab`] if the name is out of bounds or not UTF-8.
    pub fn func_name(&self, func: &GoFunc) -> Result<&'a str, ScopeError> {
        let name_off = self.functab.i32(func.func_off + FUNC_NAME_OFFSET)?;
        let name_off = usize::try_from(name_off).map_err(|_| malformed("negative name offset"))?;
        self.data.cstr(self.funcname_offset + name_off)
    }

    /// Decode the pc-value table at `table_off` for `func`
    fn pc_runs(&self, func: &GoFunc, table_off: u32) -> Result<Vec<PcRun>, ScopeError> {
        let mut runs = Vec::new();
        if table_off == 0 {
            return Ok(runs);
        }
        let mut at = self.pctab_offset + table_off as usize;
        let mut pc = func.entry;
        let mut value = -1i32;

        while pc < func.end {
            let (value_delta, n) = self.data.uvarint(at)?;
            if value_delta == 0 && !runs.is_empty() {
                break;
            }
            at += n;
            let (pc_delta, n) = self.data.uvarint(at)?;
            at += n;

            value = value.wrapping_add(zigzag(value_delta));
            let next = pc + u64::from(pc_delta) * self.quantum;
            runs.push(PcRun { start: pc, end: next, value });
            pc = next;
        }
        Ok(runs)
    }

    /// Offsets from `func.entry` of the first instruction of every source
    /// line after the function's opening line
    ///
    /// Lines from other files (inlined callees) are skipped. The result is
    /// ordered by line number.
    ///
    /// # Errors
    /// [`ScopeError::MalformedPclntab`] if a table cannot be decoded.
    pub fn line_offsets(&self, func: &GoFunc) -> Result<Vec<u64>, ScopeError> {
        let lines = self.pc_runs(func, self.functab.u32(func.func_off + FUNC_PCLN_OFFSET)?)?;
        let files = self.pc_runs(func, self.functab.u32(func.func_off + FUNC_PCFILE_OFFSET)?)?;

        let Some(opening_line) = lines.first().map(|run| run.value) else {
            return Ok(Vec::new());
        };
        let file_at = |pc: u64| files.iter().find(|run| (run.start..run.end).contains(&pc)).map(|run| run.value);
        let opening_file = file_at(func.entry);

        let mut first_pc: BTreeMap<i32, u64> = BTreeMap::new();
        for run in &lines {
            if run.value <= opening_line || file_at(run.start) != opening_file {
                continue;
            }
            first_pc.entry(run.value).and_modify(|pc| *pc = (*pc).min(run.start)).or_insert(run.start);
        }
        Ok(first_pc.into_values().map(|pc| pc - func.entry).collect())
    }
}

fn zigzag(v: u32) -> i32 {
    let magnitude = i32::from_le_bytes((v >> 1).to_le_bytes());
    if v & 1 == 0 {
        magnitude
    } else {
        !magnitude
    }
}

/// Package a function belongs to, as `go/debug/gosym` reports it
///
/// `main.worker` → `main`, `github.com/x/y.(*T).m` → `github.com/x/y`.
/// Compiler-generated `go:` and `type:` symbols belong to none.
#[must_use]
pub fn package_of(name: &str) -> &str {
    if name.starts_with("go:") || name.starts_with("type:") {
        return "";
    }
    // Type arguments may contain dots and slashes
    let plain = name.find('[').map_or(name, |i| &name[..i]);
    let path_end = plain.rfind('/').unwrap_or(0);
    plain[path_end..].find('.').map_or("", |dot| &plain[..path_end + dot])
}


#[cfg(test)]
mod tests {
    use super::testing::{build, build_with_count, FuncSpec};
    use super::*;

    #[test]
    fn test_funcs_names_and_bounds() {
        let tab = build(
            PCLNTAB_MAGIC_GO120,
            0x40_1000,
            0x300,
            &[FuncSpec::new("runtime.newproc", 0x0), FuncSpec::new("main.worker", 0x100)],
        );
        let pcln = Pclntab::parse(&tab).unwrap();
        assert_eq!(pcln.len(), 2);
        assert_eq!(pcln.text_end().unwrap(), 0x40_1300);

        let funcs = pcln.funcs().unwrap();
        assert_eq!((funcs[0].entry, funcs[0].end), (0x40_1000, 0x40_1100));
        assert_eq!((funcs[1].entry, funcs[1].end), (0x40_1100, 0x40_1300));
        assert_eq!(funcs[1].len(), 0x200);
        assert_eq!(pcln.func_name(&funcs[0]).unwrap(), "runtime.newproc");
        assert_eq!(pcln.func_name(&funcs[1]).unwrap(), "main.worker");
    }

    #[test]
    fn test_oversized_function_count_is_malformed_not_a_panic() {
        let funcs = [FuncSpec::new("main.main", 0x0)];
        let tab = build_with_count(PCLNTAB_MAGIC_GO120, 0x1000, 0x100, &funcs, 1 << 60);
        let err = Pclntab::parse(&tab).err().expect("count past the section is rejected");
        assert!(matches!(err, ScopeError::MalformedPclntab(_)));

        let tab = build_with_count(PCLNTAB_MAGIC_GO120, 0x1000, 0x100, &funcs, u64::MAX);
        assert!(Pclntab::parse(&tab).is_err());
    }

    #[test]
    fn test_line_offsets_skip_opening_line_and_other_files() {
        let mut worker = FuncSpec::new("main.worker", 0x0);
        // Line 10 for 8 bytes, 11 for 4, 12 for 6, 11 again for 2, 40 for 4
        worker.lines = vec![(10, 8), (11, 4), (12, 6), (11, 2), (40, 4)];
        // The last 4 bytes come from an inlined callee in file 3
        worker.files = vec![(1, 20), (3, 4)];
        let tab = build(PCLNTAB_MAGIC_GO120, 0x1000, 0x40, &[worker]);

        let pcln = Pclntab::parse(&tab).unwrap();
        let funcs = pcln.funcs().unwrap();
        assert_eq!(pcln.line_offsets(&funcs[0]).unwrap(), vec![8, 12]);
    }

    #[test]
    fn test_function_without_line_table() {
        let tab = build(PCLNTAB_MAGIC_GO118, 0x1000, 0x10, &[FuncSpec::new("main.f", 0)]);
        let pcln = Pclntab::parse(&tab).unwrap();
        let funcs = pcln.funcs().unwrap();
        assert!(pcln.line_offsets(&funcs[0]).unwrap().is_empty());
    }

    #[test]
    fn test_zigzag() {
        assert_eq!(zigzag(0), 0);
        assert_eq!(zigzag(1), -1);
        assert_eq!(zigzag(2), 1);
        assert_eq!(zigzag(21), -11);
    }

    #[test]
    fn test_package_of() {
        assert_eq!(package_of("main.worker"), "main");
        assert_eq!(package_of("main.(*Server).serve"), "main");
        assert_eq!(package_of("runtime.newproc"), "runtime");
        assert_eq!(package_of("github.com/acme/app/queue.(*Q).Push"), "github.com/acme/app/queue");
        assert_eq!(package_of("main.Map[go.shape.int,example.com/x.T]"), "main");
        assert_eq!(package_of("type:.eq.main.T"), "");
        assert_eq!(package_of("nodot"), "");
    }
}
