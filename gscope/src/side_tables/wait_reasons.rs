//! Wait-reason strings, read out of the binary's initialized data

use crate::domain::ScopeError;
use gscope_common::waitreason::{read_wait_reason, NUM_WAIT_REASONS};
use gscope_common::{MemoryReader, WaitReason};
use log::warn;

/// Read all [`NUM_WAIT_REASONS`] strings of the table at `table_addr`
///
/// Entries whose header or bytes cannot be read are left empty; the probes
/// then report those codes without text.
///
/// # Errors
/// [`ScopeError::WaitReasonsUnreadable`] when not even code 0 can be read,
/// which means the address is wrong.
pub fn load_wait_reasons<R: MemoryReader + ?Sized>(
    image: &R,
    table_addr: u64,
) -> Result<Vec<WaitReason>, ScopeError> {
    let mut reasons = Vec::with_capacity(NUM_WAIT_REASONS as usize);
    for code in 0..NUM_WAIT_REASONS {
        match read_wait_reason(image, table_addr, code) {
            Ok(reason) => reasons.push(reason),
            Err(_) if code == 0 => return Err(ScopeError::WaitReasonsUnreadable(table_addr)),
            Err(_) => {
                warn!("Wait reason {code} unreadable, it will be reported without text");
                reasons.push(WaitReason::EMPTY);
            }
        }
    }
    Ok(reasons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::side_tables::ElfImage;
    use std::collections::HashMap;

    const TABLE: u64 = 0x5000;
    const STRINGS: u64 = 0x9000;

    /// Data section with string headers and a rodata section with the bytes
    fn image(texts: &[&str]) -> ElfImage {
        let mut headers = vec![0u8; NUM_WAIT_REASONS as usize * 16];
        let mut rodata = Vec::new();
        for (code, text) in texts.iter().enumerate() {
            let ptr = STRINGS + rodata.len() as u64;
            headers[code * 16..code * 16 + 8].copy_from_slice(&ptr.to_ne_bytes());
            headers[code * 16 + 8..code * 16 + 16]
                .copy_from_slice(&(text.len() as u64).to_ne_bytes());
            rodata.extend_from_slice(text.as_bytes());
        }
        ElfImage::from_parts([(TABLE, headers), (STRINGS, rodata)], HashMap::new(), Vec::new())
    }

    #[test]
    fn test_loads_every_code() {
        let img = image(&["", "GC assist marking", "IO wait", "chan receive (nil chan)"]);
        let reasons = load_wait_reasons(&img, TABLE).unwrap();

        assert_eq!(reasons.len(), NUM_WAIT_REASONS as usize);
        assert_eq!(reasons[0].as_str(), "");
        assert_eq!(reasons[2].as_str(), "IO wait");
        assert_eq!(reasons[3].as_str(), "chan receive (nil chan)");
        // Zero headers past the given texts read as empty strings
        assert_eq!(reasons[36].as_str(), "");
    }

    #[test]
    fn test_truncates_long_reason() {
        let long = "x".repeat(64);
        let img = image(&["", &long]);
        let reasons = load_wait_reasons(&img, TABLE).unwrap();
        assert_eq!(reasons[1].as_str().len(), 39);
    }

    #[test]
    fn test_wrong_address_is_an_error() {
        let img = image(&["idle"]);
        let err = load_wait_reasons(&img, 0xdead_0000).unwrap_err();
        assert!(matches!(err, ScopeError::WaitReasonsUnreadable(0xdead_0000)));
    }
}
