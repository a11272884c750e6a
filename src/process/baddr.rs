//! Compensated addresses
//!
//! The current input/output fields of a Process block are declared as
//! BCPL pointers, and guest code converts them on every access. To land
//! on the right FileHandle after that conversion the emulator stores the
//! handle's *BCPL* address shifted left by two. This type is the only
//! place that shift happens.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw value of a compensated stream field: `b_addr << 2`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompensatedAddress(u32);

impl CompensatedAddress {
    /// Encode a stream's block address for storage
    pub fn encode(b_addr: u32) -> Self {
        CompensatedAddress(b_addr << 2)
    }

    /// Wrap a value read back from guest memory
    pub fn from_raw(raw: u32) -> Self {
        CompensatedAddress(raw)
    }

    /// Value as stored in the field
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Block address the field refers to
    pub fn decode(self) -> u32 {
        self.0 >> 2
    }
}

impl fmt::Display for CompensatedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}(b={:#x})", self.0, self.decode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_times_four() {
        for b_addr in [0, 1, 0x400, 0x1234, 0x3fff_ffff] {
            let c = CompensatedAddress::encode(b_addr);
            assert_eq!(c.raw(), b_addr.wrapping_mul(4));
            assert_eq!(c.decode(), b_addr);
        }
    }

    #[test]
    fn test_from_raw() {
        let c = CompensatedAddress::from_raw(0x1000);
        assert_eq!(c.decode(), 0x400);
        assert_eq!(c.to_string(), "0x1000(b=0x400)");
    }
}
