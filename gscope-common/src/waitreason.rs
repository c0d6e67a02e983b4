//! Wait-reason strings (`runtime.waitReasonStrings`)

use crate::event::WAIT_REASON_MAX_LEN;
use crate::memory::{MemoryReader, ReadFault};
use crate::offsets::SLICE_LEN_OFFSET;

/// Number of wait-reason codes known to the monitored runtime
pub const NUM_WAIT_REASONS: u32 = 37;

/// Size of a string header (pointer, length)
const GO_STRING_SIZE: u64 = 16;

/// NUL-terminated wait-reason text
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitReason {
    pub bytes: [u8; WAIT_REASON_MAX_LEN],
}

impl Default for WaitReason {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl WaitReason {
    pub const EMPTY: Self = Self { bytes: [0; WAIT_REASON_MAX_LEN] };

    /// Text up to the first NUL; invalid UTF-8 yields an empty string
    #[must_use]
    pub fn as_str(&self) -> &str {
        let len = self.bytes.iter().position(|&b| b == 0).unwrap_or(WAIT_REASON_MAX_LEN);
        core::str::from_utf8(&self.bytes[..len]).unwrap_or("")
    }

    /// Build from text, truncated to leave room for the NUL
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        let mut reason = Self::EMPTY;
        let len = text.len().min(WAIT_REASON_MAX_LEN - 1);
        reason.bytes[..len].copy_from_slice(&text.as_bytes()[..len]);
        reason
    }
}

/// Lookup of a reason code in the loaded table
pub trait WaitReasonTable {
    fn reason(&self, code: u32) -> Option<WaitReason>;
}

impl WaitReasonTable for [WaitReason] {
    fn reason(&self, code: u32) -> Option<WaitReason> {
        self.get(code as usize).copied()
    }
}

/// Read the string for `code` from the table of string headers at `table_addr`
///
/// # Errors
/// [`ReadFault`] if the header or the string bytes are unreadable.
pub fn read_wait_reason<R: MemoryReader + ?Sized>(
    reader: &R,
    table_addr: u64,
    code: u32,
) -> Result<WaitReason, ReadFault> {
    let header = table_addr + u64::from(code) * GO_STRING_SIZE;
    let data = reader.read_u64(header)?;
    let len = reader.read_u64(header + SLICE_LEN_OFFSET)?;
    let len = usize::try_from(len).unwrap_or(usize::MAX).min(WAIT_REASON_MAX_LEN - 1);

    let mut reason = WaitReason::EMPTY;
    if len > 0 {
        reader.read_bytes(data, &mut reason.bytes[..len])?;
    }
    Ok(reason)
}
