//! Probe error codes
//!
//! Kept as a plain `Copy` enum: probes run where formatting machinery cannot
//! be linked, so userspace turns codes into messages (see
//! [`ProbeError::from_code`]).

use crate::memory::ReadFault;

/// Why a probe (or part of it) gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeError {
    /// A read that the probe could not zero-fill around failed
    ReadFault,
    /// A runtime-observed extent is larger than the static capacity reserved for it
    BoundExceeded,
    /// The ring channel had no room for an event
    ChannelExhausted,
    /// No function-table entry covers a program counter
    UnwindFailure,
    /// Per-context scratch state (auxiliary stack) was unavailable
    ScratchUnavailable,
}

impl ProbeError {
    /// Non-zero code returned from the probe and used as counter key
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            ProbeError::ReadFault => 1,
            ProbeError::BoundExceeded => 2,
            ProbeError::ChannelExhausted => 3,
            ProbeError::UnwindFailure => 4,
            ProbeError::ScratchUnavailable => 5,
        }
    }

    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(ProbeError::ReadFault),
            2 => Some(ProbeError::BoundExceeded),
            3 => Some(ProbeError::ChannelExhausted),
            4 => Some(ProbeError::UnwindFailure),
            5 => Some(ProbeError::ScratchUnavailable),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ProbeError::ReadFault => "read fault",
            ProbeError::BoundExceeded => "bound exceeded",
            ProbeError::ChannelExhausted => "channel exhausted",
            ProbeError::UnwindFailure => "unwind failure",
            ProbeError::ScratchUnavailable => "scratch unavailable",
        }
    }
}

impl From<ReadFault> for ProbeError {
    fn from(_: ReadFault) -> Self {
        ProbeError::ReadFault
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for err in [
            ProbeError::ReadFault,
            ProbeError::BoundExceeded,
            ProbeError::ChannelExhausted,
            ProbeError::UnwindFailure,
            ProbeError::ScratchUnavailable,
        ] {
            assert_ne!(err.code(), 0);
            assert_eq!(ProbeError::from_code(err.code()), Some(err));
        }
        assert_eq!(ProbeError::from_code(0), None);
    }
}
