//! # Call-Stack Unwinder
//!
//! Frame-pointer walk decorated by the function table loaded from the target's
//! `.gopclntab`. Each pc is looked up with a bounded binary search; a function
//! flagged as a top frame (goroutine entry, `mstart`, ...) ends the walk.
//!
//! As in the runtime's own functab, the last entry is not a function but the
//! end of text: pcs at or past it belong to no function.

use crate::event::MAX_STACK_TRACE_DEPTH;
use crate::memory::MemoryReader;
use crate::offsets::PTR_SIZE;

/// `abi.FuncFlagTopFrame`
pub const FUNC_FLAG_TOP_FRAME: u8 = 1;

/// Capacity of the function-table map
pub const FUNCTAB_MAX_ENTRIES: u32 = 8192;

/// Enough halvings to search [`FUNCTAB_MAX_ENTRIES`] entries
const FUNCTAB_SEARCH_STEPS: u32 = 14;

/// One function-table entry
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FuncInfo {
    pub entry_pc: u64,
    /// Offset of the function's pc/sp-delta table
    pub pcsp: u32,
    pub flag: u8,
    pub _padding: [u8; 3],
}

impl FuncInfo {
    #[must_use]
    pub fn new(entry_pc: u64, pcsp: u32, flag: u8) -> Self {
        Self { entry_pc, pcsp, flag, _padding: [0; 3] }
    }

    #[must_use]
    pub fn is_top_frame(&self) -> bool {
        self.flag & FUNC_FLAG_TOP_FRAME != 0
    }
}

/// Function table sorted by `entry_pc`, closed by an end-of-text entry
pub trait FuncTable {
    fn len(&self) -> u32;

    fn entry(&self, idx: u32) -> Option<FuncInfo>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FuncTable for [FuncInfo] {
    fn len(&self) -> u32 {
        u32::try_from(<[FuncInfo]>::len(self)).unwrap_or(u32::MAX)
    }

    fn entry(&self, idx: u32) -> Option<FuncInfo> {
        self.get(idx as usize).copied()
    }
}

/// Greatest entry with `entry_pc <= pc`, if that is a function and not the end marker
pub fn find_func<T: FuncTable + ?Sized>(table: &T, pc: u64) -> Option<FuncInfo> {
    let len = table.len().min(FUNCTAB_MAX_ENTRIES);
    let mut lo = 0u32;
    let mut hi = len;
    // Invariant: entries below `lo` start at or before pc, entries from `hi` start after it.
    for _ in 0..=FUNCTAB_SEARCH_STEPS {
        if lo >= hi {
            break;
        }
        let mid = lo + (hi - lo) / 2;
        if table.entry(mid)?.entry_pc <= pc {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    if lo >= len {
        return None;
    }
    table.entry(lo.checked_sub(1)?)
}

/// Program counters of an unwound stack, callee first
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallStack {
    pub pcs: [u64; MAX_STACK_TRACE_DEPTH],
    /// Frames recorded, or `-1` when a pc was not covered by the table
    pub depth: i64,
}

impl CallStack {
    #[must_use]
    pub fn frames(&self) -> &[u64] {
        let depth = usize::try_from(self.depth).unwrap_or(0);
        &self.pcs[..depth.min(MAX_STACK_TRACE_DEPTH)]
    }
}

/// Walk up to [`MAX_STACK_TRACE_DEPTH`] frames from `pc`/`fp`
///
/// The return address sits one word above the saved frame pointer.
pub fn unwind_stack<R: MemoryReader, T: FuncTable + ?Sized>(
    reader: &R,
    table: &T,
    mut pc: u64,
    mut fp: u64,
) -> CallStack {
    let mut stack = CallStack { pcs: [0; MAX_STACK_TRACE_DEPTH], depth: 0 };

    for slot in 0..MAX_STACK_TRACE_DEPTH {
        let Some(func) = find_func(table, pc) else {
            stack.depth = -1;
            return stack;
        };
        stack.pcs[slot] = pc;
        stack.depth += 1;
        if func.is_top_frame() {
            break;
        }
        pc = reader.read_ptr(fp + PTR_SIZE);
        fp = reader.read_ptr(fp);
        if pc == 0 {
            break;
        }
    }

    stack
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeMemory;

    /// Three functions, text ends at 0x4000
    fn table() -> Vec<FuncInfo> {
        vec![
            FuncInfo::new(0x1000, 0, FUNC_FLAG_TOP_FRAME),
            FuncInfo::new(0x2000, 0, 0),
            FuncInfo::new(0x3000, 0, 0),
            FuncInfo::new(0x4000, 0, 0),
        ]
    }

    #[test]
    fn test_find_func_picks_greatest_entry_at_or_below() {
        let tab = table();
        assert_eq!(find_func(tab.as_slice(), 0x0fff), None);
        assert_eq!(find_func(tab.as_slice(), 0x1000).map(|f| f.entry_pc), Some(0x1000));
        assert_eq!(find_func(tab.as_slice(), 0x2abc).map(|f| f.entry_pc), Some(0x2000));
        assert_eq!(find_func(tab.as_slice(), 0x3fff).map(|f| f.entry_pc), Some(0x3000));
        assert_eq!(find_func(&[] as &[FuncInfo], 0x1000), None);
    }

    #[test]
    fn test_find_func_rejects_pcs_past_end_of_text() {
        let tab = table();
        assert_eq!(find_func(tab.as_slice(), 0x4000), None);
        assert_eq!(find_func(tab.as_slice(), 0xffff_ffff), None);
        // A table holding only the end marker covers nothing
        assert_eq!(find_func(&tab[3..], 0x4000), None);
    }

    #[test]
    fn test_find_func_large_table() {
        let tab: Vec<FuncInfo> =
            (0..FUNCTAB_MAX_ENTRIES).map(|i| FuncInfo::new(u64::from(i) * 16, 0, 0)).collect();
        let end = u64::from(FUNCTAB_MAX_ENTRIES - 1) * 16;
        for pc in [0, 15, 16, 4095 * 16 + 3, end - 1] {
            assert_eq!(find_func(tab.as_slice(), pc).map(|f| f.entry_pc), Some(pc / 16 * 16));
        }
        assert_eq!(find_func(tab.as_slice(), end), None);
    }

    /// Frames: 0x3010 (fp 0x8000) -> 0x2010 (fp 0x8100) -> 0x1010 (top)
    fn three_frames() -> FakeMemory {
        let mut mem = FakeMemory::new();
        mem.write_u64(0x8000, 0x8100);
        mem.write_u64(0x8008, 0x2010);
        mem.write_u64(0x8100, 0x8200);
        mem.write_u64(0x8108, 0x1010);
        mem.write_u64(0x8200, 0);
        mem.write_u64(0x8208, 0);
        mem
    }

    #[test]
    fn test_unwind_stops_at_top_frame() {
        let mem = three_frames();
        let tab = table();
        let stack = unwind_stack(&mem, tab.as_slice(), 0x3010, 0x8000);
        assert_eq!(stack.depth, 3);
        assert_eq!(stack.frames(), &[0x3010, 0x2010, 0x1010]);
    }

    #[test]
    fn test_zero_return_address_ends_walk() {
        let mut mem = three_frames();
        mem.write_u64(0x8108, 0);
        let tab = table();
        let stack = unwind_stack(&mem, tab.as_slice(), 0x3010, 0x8000);
        assert_eq!(stack.depth, 2);
        assert_eq!(stack.frames(), &[0x3010, 0x2010]);
    }

    #[test]
    fn test_uncovered_pc_is_a_failure() {
        let mem = three_frames();
        let tab = table();
        let stack = unwind_stack(&mem, tab.as_slice(), 0x10, 0x8000);
        assert_eq!(stack.depth, -1);
        assert!(stack.frames().is_empty());

        let stack = unwind_stack(&mem, tab.as_slice(), 0x4010, 0x8000);
        assert_eq!(stack.depth, -1);
    }

    #[test]
    fn test_depth_is_capped() {
        let mut mem = FakeMemory::new();
        // Self-referencing frame that never reaches a top frame
        mem.write_u64(0x8000, 0x8000);
        mem.write_u64(0x8008, 0x2010);
        let tab = table();
        let stack = unwind_stack(&mem, tab.as_slice(), 0x2010, 0x8000);
        assert_eq!(stack.depth, MAX_STACK_TRACE_DEPTH as i64);
    }
}
