//! What userspace reads out of the monitored binary before any probe attaches
//!
//! - [`pclntab`]: the Go runtime's function and line tables
//! - [`functab`]: function table for the probes' unwinder
//! - [`wait_reasons`]: wait-reason strings read out of the binary's data
//! - [`code`], [`disasm`]: attach offsets found in the machine code
//! - [`elf_image`]: the target binary as a [`gscope_common::MemoryReader`]

pub mod code;
pub mod disasm;
pub mod elf_image;
pub mod functab;
pub mod pclntab;
pub mod wait_reasons;

pub use code::TargetCode;
pub use elf_image::ElfImage;
pub use functab::parse_functab;
pub use wait_reasons::load_wait_reasons;
