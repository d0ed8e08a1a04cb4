//! Fixed-width 64-bit access-capability vectors.
//!
//! A [`BitMask64`] encodes what a user may access (plan band + subscription
//! band) or what a content item requires. Access is allowed iff the two
//! masks overlap, i.e. share at least one set bit.
//!
//! The canonical persisted form is an 8-byte big-endian string; the integer
//! and binary-string forms are derived views. Overlap is defined on the
//! integer form only.

use crate::error::{Error, Result};

/// A fixed 64-bit capability vector. Bit 0 is the lowest-order bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitMask64(u64);

impl BitMask64 {
    /// Construct from an integer value; the low bit is position 0.
    pub fn from_int(value: u64) -> Self {
        Self(value)
    }

    /// Construct from a big-endian byte string of at most 8 bytes.
    ///
    /// Shorter input is left-padded with zero bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > 8 {
            return Err(Error::InvalidBitmask(format!(
                "byte string has {} bytes, at most 8 allowed",
                bytes.len()
            )));
        }
        let mut buf = [0u8; 8];
        buf[8 - bytes.len()..].copy_from_slice(bytes);
        Ok(Self(u64::from_be_bytes(buf)))
    }

    /// Construct from a binary string of at most 64 `'0'`/`'1'` characters.
    ///
    /// With `reverse = false` the string is standard binary notation (the
    /// last character is position 0). With `reverse = true` the first
    /// character is position 0.
    pub fn from_binary_str(s: &str, reverse: bool) -> Result<Self> {
        if s.len() > 64 {
            return Err(Error::InvalidBitmask(format!(
                "binary string has {} characters, at most 64 allowed",
                s.len()
            )));
        }
        let mut value = 0u64;
        let chars: Box<dyn Iterator<Item = char>> = if reverse {
            Box::new(s.chars().rev())
        } else {
            Box::new(s.chars())
        };
        for c in chars {
            value = match c {
                '0' => value << 1,
                '1' => (value << 1) | 1,
                other => {
                    return Err(Error::InvalidBitmask(format!(
                        "non-binary character {other:?} in bitmask string"
                    )))
                }
            };
        }
        Ok(Self(value))
    }

    /// True iff the bitwise AND of the two vectors is non-zero.
    ///
    /// Any shared capability grants access.
    pub fn overlaps(&self, other: &BitMask64) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether a given bit position (0..64) is set.
    pub fn is_set(&self, position: u32) -> bool {
        position < 64 && self.0 & (1u64 << position) != 0
    }

    /// Return a copy with the given bit position set.
    pub fn with_bit(&self, position: u32) -> Self {
        debug_assert!(position < 64);
        Self(self.0 | (1u64 << position))
    }

    /// Integer view.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Canonical big-endian byte form, padded to 8 bytes.
    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Fixed-width 64-character binary string, standard notation.
    pub fn to_binary_string(&self) -> String {
        format!("{:064b}", self.0)
    }

    /// True when no bit is set.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for BitMask64 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#b}", self.0)
    }
}
