//! Bounds-checked access to guest linear memory.
//!
//! Everything that reads or writes guest bytes goes through [`GuestMemory`].
//! Operations that also need the guest allocator (`allocate`, `release`,
//! `write_string`) live on [`Instance`](crate::Instance), which pairs this
//! module with the guest's `malloc`/`free` exports.

use core::ops::Range;

use wasmtime::{AsContext, AsContextMut, Memory};

use crate::error::{Error, Result};

/// 32-bit offset into guest linear memory. [`Address::NULL`] is never a valid
/// allocation or object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Address(u32);

impl Address {
    pub const NULL: Self = Self(0);

    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn checked_add(self, offset: u32) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    pub(crate) const fn offset(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for Address {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<Address> for u32 {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl core::fmt::Display for Address {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Exported linear memory of one guest instance.
#[derive(Clone, Copy)]
pub(crate) struct GuestMemory(Memory);

impl GuestMemory {
    pub(crate) const fn new(memory: Memory) -> Self {
        Self(memory)
    }

    pub(crate) fn size(self, store: impl AsContext) -> usize {
        self.0.data_size(store)
    }

    pub(crate) fn read_bytes<S: AsContext>(
        self,
        store: &S,
        addr: Address,
        len: usize,
    ) -> Result<Vec<u8>> {
        let data = self.0.data(store);
        let range = checked_range(data.len(), addr, len)?;
        Ok(data[range].to_vec())
    }

    /// Writes `bytes` at `addr`. The bounds check covers the whole range
    /// before any byte is copied.
    pub(crate) fn write_bytes<S: AsContextMut>(
        self,
        store: &mut S,
        addr: Address,
        bytes: &[u8],
    ) -> Result<()> {
        let data = self.0.data_mut(store);
        let range = checked_range(data.len(), addr, bytes.len())?;
        data[range].copy_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn read_c_string<S: AsContext>(self, store: &S, addr: Address) -> Result<String> {
        let bytes = c_string_at(self.0.data(store), addr)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Copies `text` into a buffer with a trailing NUL, ready for a single write.
pub(crate) fn nul_terminated(text: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(text.len() + 1);
    buf.extend_from_slice(text.as_bytes());
    buf.push(0);
    buf
}

fn out_of_bounds(addr: Address, len: usize, memory_size: usize) -> Error {
    Error::OutOfBounds {
        addr,
        len: len as u64,
        memory_size: memory_size as u64,
    }
}

fn checked_range(memory_size: usize, addr: Address, len: usize) -> Result<Range<usize>> {
    let start = addr.offset();
    start
        .checked_add(len)
        .filter(|end| *end <= memory_size)
        .map(|end| start..end)
        .ok_or_else(|| out_of_bounds(addr, len, memory_size))
}

/// Returns the bytes of the NUL-terminated string at `addr`, without the NUL.
fn c_string_at(data: &[u8], addr: Address) -> Result<&[u8]> {
    if addr.is_null() {
        return Ok(&[]);
    }
    let tail = data
        .get(addr.offset()..)
        .filter(|tail| !tail.is_empty())
        .ok_or_else(|| out_of_bounds(addr, 1, data.len()))?;
    let len = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| out_of_bounds(addr, tail.len() + 1, data.len()))?;
    Ok(&tail[..len])
}
