//! Variable-length quantities as used by Standard MIDI Files.
//!
//! Seven bits per byte, most significant group first, high bit set on every
//! byte except the last. Four bytes cover 28 bits; anything larger is refused
//! rather than truncated.

use crate::{LogError, Result};

/// Largest value that fits in four encoded bytes.
pub const MAX_VALUE: u32 = 0x0FFF_FFFF;

/// An encoded quantity, stored inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vlq {
    bytes: [u8; 4],
    len: u8,
}

impl Vlq {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Encode `value`, refusing anything above [`MAX_VALUE`].
pub fn encode(value: u32) -> Result<Vlq> {
    if value > MAX_VALUE {
        return Err(LogError::DeltaOutOfRange(value));
    }

    let len = match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        _ => 4,
    };

    let mut bytes = [0u8; 4];
    for (i, byte) in bytes.iter_mut().take(len).enumerate() {
        let shift = 7 * (len - 1 - i);
        let group = ((value >> shift) & 0x7F) as u8;
        *byte = if i + 1 < len { group | 0x80 } else { group };
    }

    Ok(Vlq {
        bytes,
        len: len as u8,
    })
}

/// Append the encoding of `value` to `buf`.
pub fn write(buf: &mut Vec<u8>, value: u32) -> Result<()> {
    let vlq = encode(value)?;
    buf.extend_from_slice(vlq.as_bytes());
    Ok(())
}

/// Decode a quantity from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed. A continuation bit on
/// the fourth byte, or running out of input, is reported as truncation at
/// offset 0 of the given slice; callers rebase the offset.
pub fn decode(bytes: &[u8]) -> Result<(u32, usize)> {
    let mut value = 0u32;
    for (i, &byte) in bytes.iter().take(4).enumerate() {
        value = (value << 7) | (byte & 0x7F) as u32;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(LogError::Truncated { offset: 0 })
}
