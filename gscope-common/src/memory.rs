//! # Memory Reader
//!
//! The only way the probes look at the monitored process. Reads never block,
//! allocate or loop; an unmapped or unreadable address yields [`ReadFault`]
//! and the call site decides whether to zero-fill or abandon its event.

/// An address could not be read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadFault;

/// Copies bytes out of the monitored process
///
/// Implemented with `bpf_probe_read_user` in the probes, over ELF sections in
/// userspace side-table loading, and over an in-memory image in tests.
pub trait MemoryReader {
    /// Fill `dst` with the bytes at `addr`
    ///
    /// # Errors
    /// [`ReadFault`] when any byte of the range is unreadable.
    fn read_bytes(&self, addr: u64, dst: &mut [u8]) -> Result<(), ReadFault>;

    /// # Errors
    /// [`ReadFault`] when the word is unreadable.
    fn read_u64(&self, addr: u64) -> Result<u64, ReadFault> {
        let mut buf = [0u8; 8];
        self.read_bytes(addr, &mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }

    /// # Errors
    /// [`ReadFault`] when the word is unreadable.
    fn read_i64(&self, addr: u64) -> Result<i64, ReadFault> {
        let mut buf = [0u8; 8];
        self.read_bytes(addr, &mut buf)?;
        Ok(i64::from_ne_bytes(buf))
    }

    /// # Errors
    /// [`ReadFault`] when the word is unreadable.
    fn read_u32(&self, addr: u64) -> Result<u32, ReadFault> {
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf)?;
        Ok(u32::from_ne_bytes(buf))
    }

    /// # Errors
    /// [`ReadFault`] when the word is unreadable.
    fn read_i32(&self, addr: u64) -> Result<i32, ReadFault> {
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf)?;
        Ok(i32::from_ne_bytes(buf))
    }

    /// Pointer-sized read that maps a fault to null
    ///
    /// Every traversal treats null as "end of structure", so a torn or
    /// unreadable link simply ends the walk.
    fn read_ptr(&self, addr: u64) -> u64 {
        if addr == 0 {
            return 0;
        }
        self.read_u64(addr).unwrap_or(0)
    }
}

impl<R: MemoryReader + ?Sized> MemoryReader for &R {
    fn read_bytes(&self, addr: u64, dst: &mut [u8]) -> Result<(), ReadFault> {
        (**self).read_bytes(addr, dst)
    }
}
