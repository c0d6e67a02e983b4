//! # Function Table
//!
//! The unwinder needs, for every function, its entry pc and whether it is a
//! top frame (`runtime.goexit`, `runtime.mstart`, ...). Both come from the
//! [`Pclntab`]; the table handed to the probes is sorted by entry pc and closed
//! by an end-of-text entry, so pcs outside the covered range fail to unwind.

use crate::domain::ScopeError;
use crate::side_tables::pclntab::Pclntab;
use gscope_common::unwind::FUNCTAB_MAX_ENTRIES;
use gscope_common::FuncInfo;
use log::warn;

/// Parse `.gopclntab` into a function table sorted by entry pc
///
/// At most [`FUNCTAB_MAX_ENTRIES`] entries are kept, the last one marking the
/// end of the covered text. Functions above the probe map's capacity are
/// dropped with a warning, and the marker moves down to the first of them.
///
/// # Errors
/// [`ScopeError::MalformedPclntab`] as [`Pclntab::parse`] and [`Pclntab::funcs`].
pub fn parse_functab(pclntab: &[u8]) -> Result<Vec<FuncInfo>, ScopeError> {
    let tab = Pclntab::parse(pclntab)?;
    let mut funcs: Vec<FuncInfo> = tab
        .funcs()?
        .iter()
        .map(|f| FuncInfo::new(f.entry, f.pcsp, f.flag))
        .collect();
    funcs.sort_by_key(|f| f.entry_pc);

    let max_funcs = FUNCTAB_MAX_ENTRIES as usize - 1;
    let end = if funcs.len() > max_funcs {
        let cut = funcs[max_funcs].entry_pc;
        warn!(
            "Function table has {} entries, keeping the first {max_funcs}; stacks above {cut:#x} will not unwind",
            funcs.len()
        );
        funcs.truncate(max_funcs);
        cut
    } else {
        tab.text_end()?
    };
    funcs.push(FuncInfo::new(end, 0, 0));

    Ok(funcs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::side_tables::pclntab::testing::{build, FuncSpec};
    use crate::side_tables::pclntab::{PCLNTAB_MAGIC_GO118, PCLNTAB_MAGIC_GO120};
    use gscope_common::unwind::{find_func, FUNC_FLAG_TOP_FRAME};

    fn func(entry_off: u32, pcsp: u32, flag: u8) -> FuncSpec {
        FuncSpec { pcsp, flag, ..FuncSpec::new("main.f", entry_off) }
    }

    #[test]
    fn test_parse_sorts_by_entry_and_closes_with_text_end() {
        let tab = build(
            PCLNTAB_MAGIC_GO120,
            0x40_1000,
            0x300,
            &[func(0x200, 7, 0), func(0x0, 3, FUNC_FLAG_TOP_FRAME), func(0x100, 5, 0)],
        );
        let funcs = parse_functab(&tab).unwrap();

        let entries: Vec<u64> = funcs.iter().map(|f| f.entry_pc).collect();
        assert_eq!(entries, vec![0x40_1000, 0x40_1100, 0x40_1200, 0x40_1300]);
        assert!(funcs[0].is_top_frame());
        assert_eq!(funcs[0].pcsp, 3);
        assert_eq!(funcs[2].pcsp, 7);
        assert!(!funcs[1].is_top_frame());
    }

    #[test]
    fn test_pcs_past_text_end_do_not_resolve() {
        let tab = build(PCLNTAB_MAGIC_GO120, 0x40_1000, 0x200, &[func(0x0, 0, 0), func(0x100, 0, 0)]);
        let funcs = parse_functab(&tab).unwrap();
        assert_eq!(find_func(funcs.as_slice(), 0x40_11ff).map(|f| f.entry_pc), Some(0x40_1100));
        assert_eq!(find_func(funcs.as_slice(), 0x40_1200), None);
        assert_eq!(find_func(funcs.as_slice(), 0x7fff_0000), None);
    }

    #[test]
    fn test_go118_flag_offset() {
        let tab = build(PCLNTAB_MAGIC_GO118, 0x1000, 0x20, &[func(0x10, 1, FUNC_FLAG_TOP_FRAME)]);
        let funcs = parse_functab(&tab).unwrap();
        assert!(funcs[0].is_top_frame());
    }

    #[test]
    fn test_rejects_unknown_magic() {
        let tab = build(0xffff_fffb, 0x1000, 0x20, &[func(0x10, 1, 0)]);
        let err = parse_functab(&tab).unwrap_err();
        assert!(err.to_string().contains("unsupported magic"));
    }

    #[test]
    fn test_rejects_truncated_table() {
        let tab = build(PCLNTAB_MAGIC_GO120, 0x1000, 0x30, &[func(0x10, 1, 0), func(0x20, 2, 0)]);
        assert!(parse_functab(&tab[..tab.len() - 60]).is_err());
        assert!(parse_functab(&tab[..6]).is_err());
    }

    #[test]
    fn test_caps_entry_count() {
        let specs: Vec<FuncSpec> = (0..FUNCTAB_MAX_ENTRIES + 10).map(|i| func(i * 16, 0, 0)).collect();
        let tab = build(PCLNTAB_MAGIC_GO120, 0, (FUNCTAB_MAX_ENTRIES + 10) * 16, &specs);
        let parsed = parse_functab(&tab).unwrap();
        assert_eq!(parsed.len(), FUNCTAB_MAX_ENTRIES as usize);
        // The marker sits on the first dropped function
        assert_eq!(parsed.last().unwrap().entry_pc, u64::from(FUNCTAB_MAX_ENTRIES - 1) * 16);
        assert_eq!(find_func(parsed.as_slice(), u64::from(FUNCTAB_MAX_ENTRIES) * 16), None);
    }
}
