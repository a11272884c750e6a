//! Guest RAM
//!
//! A flat, big-endian byte array standing in for the 68k address space.
//! Every access is bounds checked; nothing in the emulator touches guest
//! memory except through these accessors.

use std::fmt;

/// Memory errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// Access runs past the end of RAM
    OutOfBounds { address: u32, size: u32 },
    /// Word/long access at an odd address (68000 address error)
    Unaligned { address: u32 },
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds { address, size } => {
                write!(f, "memory access out of bounds: {:#08x} + {}", address, size)
            }
            Self::Unaligned { address } => write!(f, "unaligned access at {:#08x}", address),
        }
    }
}

impl std::error::Error for MemoryError {}

pub type MemoryResult<T> = Result<T, MemoryError>;

/// The guest address space
#[derive(Debug, Clone)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Create zeroed RAM of the given size
    pub fn new(size: u32) -> Self {
        Self {
            data: vec![0u8; size as usize],
        }
    }

    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    fn range(&self, address: u32, size: u32) -> MemoryResult<std::ops::Range<usize>> {
        let start = address as usize;
        match start.checked_add(size as usize) {
            Some(end) if end <= self.data.len() => Ok(start..end),
            _ => Err(MemoryError::OutOfBounds { address, size }),
        }
    }

    fn check_even(address: u32) -> MemoryResult<()> {
        if address & 1 != 0 {
            return Err(MemoryError::Unaligned { address });
        }
        Ok(())
    }

    pub fn r8(&self, address: u32) -> MemoryResult<u8> {
        let r = self.range(address, 1)?;
        Ok(self.data[r.start])
    }

    pub fn w8(&mut self, address: u32, value: u8) -> MemoryResult<()> {
        let r = self.range(address, 1)?;
        self.data[r.start] = value;
        Ok(())
    }

    pub fn r16(&self, address: u32) -> MemoryResult<u16> {
        Self::check_even(address)?;
        let r = self.range(address, 2)?;
        let mut bytes = [0u8; 2];
        bytes.copy_from_slice(&self.data[r]);
        Ok(u16::from_be_bytes(bytes))
    }

    pub fn w16(&mut self, address: u32, value: u16) -> MemoryResult<()> {
        Self::check_even(address)?;
        let r = self.range(address, 2)?;
        self.data[r].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn r32(&self, address: u32) -> MemoryResult<u32> {
        Self::check_even(address)?;
        let r = self.range(address, 4)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[r]);
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn w32(&mut self, address: u32, value: u32) -> MemoryResult<()> {
        Self::check_even(address)?;
        let r = self.range(address, 4)?;
        self.data[r].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn r_bytes(&self, address: u32, len: u32) -> MemoryResult<&[u8]> {
        let r = self.range(address, len)?;
        Ok(&self.data[r])
    }

    pub fn w_bytes(&mut self, address: u32, bytes: &[u8]) -> MemoryResult<()> {
        let r = self.range(address, bytes.len() as u32)?;
        self.data[r].copy_from_slice(bytes);
        Ok(())
    }

    /// Zero a range
    pub fn clear(&mut self, address: u32, len: u32) -> MemoryResult<()> {
        let r = self.range(address, len)?;
        self.data[r].fill(0);
        Ok(())
    }

    /// Write a NUL terminated string (Latin-1, one byte per char)
    pub fn w_cstr(&mut self, address: u32, text: &str) -> MemoryResult<()> {
        let mut bytes = latin1_bytes(text);
        bytes.push(0);
        self.w_bytes(address, &bytes)
    }

    /// Read a NUL terminated string
    pub fn r_cstr(&self, address: u32) -> MemoryResult<String> {
        let start = self.range(address, 0)?.start;
        let tail = &self.data[start..];
        let len = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(MemoryError::OutOfBounds {
                address,
                size: tail.len() as u32 + 1,
            })?;
        Ok(tail[..len].iter().map(|&b| b as char).collect())
    }

    /// Read a BCPL string: length byte followed by the characters
    pub fn r_bstr(&self, address: u32) -> MemoryResult<String> {
        let len = self.r8(address)? as u32;
        let bytes = self.r_bytes(address + 1, len)?;
        Ok(bytes.iter().map(|&b| b as char).collect())
    }
}

/// Guest strings are 8-bit; characters outside Latin-1 become '?'
pub fn latin1_bytes(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| if (c as u32) < 0x100 { c as u8 } else { b'?' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_words() {
        let mut mem = Memory::new(64);
        mem.w32(8, 0x1234_5678).unwrap();
        assert_eq!(mem.r8(8).unwrap(), 0x12);
        assert_eq!(mem.r16(10).unwrap(), 0x5678);
        assert_eq!(mem.r32(8).unwrap(), 0x1234_5678);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut mem = Memory::new(16);
        assert_eq!(
            mem.w32(14, 1),
            Err(MemoryError::OutOfBounds {
                address: 14,
                size: 4
            })
        );
        assert!(mem.r8(16).is_err());
        assert!(mem.w32(12, 1).is_ok());
    }

    #[test]
    fn test_top_of_address_space() {
        let mut mem = Memory::new(16);
        assert_eq!(
            mem.r32(0xffff_fffc),
            Err(MemoryError::OutOfBounds {
                address: 0xffff_fffc,
                size: 4
            })
        );
        assert!(mem.w_bytes(0xffff_ffff, &[1, 2]).is_err());
        assert!(mem.r_bytes(u32::MAX, u32::MAX).is_err());
    }

    #[test]
    fn test_unaligned() {
        let mem = Memory::new(16);
        assert_eq!(mem.r32(3), Err(MemoryError::Unaligned { address: 3 }));
        assert!(mem.r8(3).is_ok());
    }

    #[test]
    fn test_cstr() {
        let mut mem = Memory::new(32);
        mem.w_cstr(4, "hello\n").unwrap();
        assert_eq!(mem.r8(10).unwrap(), b'\n');
        assert_eq!(mem.r8(11).unwrap(), 0);
        assert_eq!(mem.r_cstr(4).unwrap(), "hello\n");
    }

    #[test]
    fn test_cstr_unterminated() {
        let mut mem = Memory::new(4);
        mem.w_bytes(0, b"abcd").unwrap();
        assert!(mem.r_cstr(0).is_err());
    }

    #[test]
    fn test_latin1() {
        assert_eq!(latin1_bytes("a\u{e9}\u{2603}"), vec![b'a', 0xe9, b'?']);
    }
}
