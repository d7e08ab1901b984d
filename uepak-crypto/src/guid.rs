//! The 128-bit GUID that identifies encryption keys.
//!
//! On disk a GUID is 16 bytes laid out as `u32 | u16 | u16 | u8[8]`
//! with the integer fields little-endian. The canonical text form is
//! lowercase hyphenated hex (`8-4-4-4-12`), used on every API and
//! diagnostic boundary; raw bytes are used internally.

use std::fmt;
use std::str::FromStr;

use crate::error::CryptoError;

/// Encryption-key identifier stored in container headers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid {
    d1: u32,
    d2: u16,
    d3: u16,
    d4: [u8; 8],
}

impl Guid {
    /// The all-zero GUID. Containers use it to mean "no key".
    pub const ZERO: Guid = Guid {
        d1: 0,
        d2: 0,
        d3: 0,
        d4: [0; 8],
    };

    /// Build a GUID from its four fields.
    pub const fn new(d1: u32, d2: u16, d3: u16, d4: [u8; 8]) -> Self {
        Self { d1, d2, d3, d4 }
    }

    /// Decode the on-disk 16-byte representation.
    pub fn from_bytes(bytes: &[u8; 16]) -> Self {
        let d1 = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let d2 = u16::from_le_bytes([bytes[4], bytes[5]]);
        let d3 = u16::from_le_bytes([bytes[6], bytes[7]]);
        let mut d4 = [0u8; 8];
        d4.copy_from_slice(&bytes[8..16]);
        Self { d1, d2, d3, d4 }
    }

    /// Encode back to the on-disk 16-byte representation.
    pub fn to_bytes(self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&self.d1.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.d2.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.d3.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.d4);
        bytes
    }

    /// Whether this is the reserved all-zero GUID.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{}-{}",
            self.d1,
            self.d2,
            self.d3,
            hex::encode(&self.d4[0..2]),
            hex::encode(&self.d4[2..8]),
        )
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({self})")
    }
}

impl FromStr for Guid {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || CryptoError::BadGuid {
            value: s.to_string(),
        };

        let groups: Vec<&str> = s.split('-').collect();
        if groups.len() != 5 {
            return Err(bad());
        }
        let expected = [8usize, 4, 4, 4, 12];
        for (group, len) in groups.iter().zip(expected) {
            if group.len() != len || !group.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(bad());
            }
        }

        let d1 = u32::from_str_radix(groups[0], 16).map_err(|_| bad())?;
        let d2 = u16::from_str_radix(groups[1], 16).map_err(|_| bad())?;
        let d3 = u16::from_str_radix(groups[2], 16).map_err(|_| bad())?;
        let mut d4 = [0u8; 8];
        let tail = format!("{}{}", groups[3], groups[4]);
        let tail_bytes = hex::decode(tail).map_err(|_| bad())?;
        d4.copy_from_slice(&tail_bytes);

        Ok(Self { d1, d2, d3, d4 })
    }
}
