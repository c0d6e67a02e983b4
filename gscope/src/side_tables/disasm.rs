//! x86-64 instruction scans over a function's machine code
//!
//! Offsets are relative to the first byte of the code handed in, which is
//! always a function entry.

use crate::domain::ScopeError;
use iced_x86::{Decoder, DecoderOptions, Instruction, Mnemonic};

/// Instructions searched for the stack-split check; large frames put a `LEA`
/// in front of it
const PROLOGUE_SEARCH_LEN: usize = 4;

fn decode_all(symbol: &str, code: &[u8]) -> Result<Vec<Instruction>, ScopeError> {
    let mut decoder = Decoder::with_ip(64, code, 0, DecoderOptions::NONE);
    let mut instructions = Vec::new();
    let mut instruction = Instruction::default();
    while decoder.can_decode() {
        decoder.decode_out(&mut instruction);
        if instruction.is_invalid() {
            return Err(ScopeError::Disassembly {
                symbol: symbol.to_string(),
                offset: instruction.ip(),
            });
        }
        instructions.push(instruction);
    }
    Ok(instructions)
}

/// Offsets of every `ret`
///
/// # Errors
/// [`ScopeError::Disassembly`] if the code does not decode.
pub fn return_offsets(symbol: &str, code: &[u8]) -> Result<Vec<u64>, ScopeError> {
    Ok(decode_all(symbol, code)?
        .iter()
        .filter(|i| i.mnemonic() == Mnemonic::Ret)
        .map(Instruction::ip)
        .collect())
}

/// Offset of the first instruction after the `CMP`/`JBE` stack-split check
///
/// `None` for functions compiled without one (`//go:nosplit`, tiny leaves).
///
/// # Errors
/// [`ScopeError::Disassembly`] if the code does not decode.
pub fn prologue_end(symbol: &str, code: &[u8]) -> Result<Option<u64>, ScopeError> {
    let instructions = decode_all(symbol, code)?;
    let head = &instructions[..instructions.len().min(PROLOGUE_SEARCH_LEN + 1)];
    Ok(head
        .windows(2)
        .find(|pair| pair[0].mnemonic() == Mnemonic::Cmp && pair[1].mnemonic() == Mnemonic::Jbe)
        .map(|pair| pair[1].next_ip()))
}

#[cfg(test)]
pub(crate) mod testing {
    /// A Go-shaped function with two returns
    ///
    /// ```text
    ///  0: cmp rsp, [r14+0x10]
    ///  4: jbe 21
    ///  6: push rbp
    ///  7: mov rbp, rsp
    /// 10: pop rbp
    /// 11: ret
    /// 12: nop
    /// 13: ret
    /// 14: call morestack
    /// 19: jmp 0
    /// 21: int3
    /// ```
    pub const SPLIT_FUNC: &[u8] = &[
        0x49, 0x3b, 0x66, 0x10, //
        0x76, 0x0f, //
        0x55, //
        0x48, 0x89, 0xe5, //
        0x5d, //
        0xc3, //
        0x90, //
        0xc3, //
        0xe8, 0x00, 0x00, 0x00, 0x00, //
        0xeb, 0xeb, //
        0xcc,
    ];

    /// No stack-split check
    ///
    /// ```text
    /// 0: mov eax, 1
    /// 5: cmp eax, ebx
    /// 7: nop
    /// 8: jbe 8
    /// 10: ret
    /// ```
    pub const NOSPLIT_FUNC: &[u8] = &[
        0xb8, 0x01, 0x00, 0x00, 0x00, //
        0x39, 0xd8, //
        0x90, //
        0x76, 0x00, //
        0xc3,
    ];
}
