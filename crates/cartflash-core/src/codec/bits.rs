//! MSB-first bit packing

use crate::error::{Error, Result};

/// Append-only bit buffer, packed MSB first
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bits: usize,
}

impl BitWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty writer that can hold `bytes` bytes without reallocating
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bytes),
            bits: 0,
        }
    }

    /// Append the low `width` bits of `value`, most significant first
    pub fn push(&mut self, value: u32, width: u32) {
        debug_assert!(width <= 32);
        for i in (0..width).rev() {
            self.push_bit((value >> i) & 1 != 0);
        }
    }

    /// Append a single bit
    pub fn push_bit(&mut self, bit: bool) {
        let index = self.bits / 8;
        if index == self.bytes.len() {
            self.bytes.push(0);
        }
        if bit {
            self.bytes[index] |= 0x80 >> (self.bits % 8);
        }
        self.bits += 1;
    }

    /// Append `count` zero bits
    pub fn push_zeros(&mut self, count: u32) {
        for _ in 0..count {
            self.push_bit(false);
        }
    }

    /// Number of bits written so far
    pub fn len_bits(&self) -> usize {
        self.bits
    }

    /// Number of bytes needed to hold the written bits
    pub fn len_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Check whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Packed bytes, with the final byte zero-padded
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the writer and return the packed bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Discard all written bits
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.bits = 0;
    }
}

/// Cursor over an MSB-first packed buffer
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// Start reading at bit 0 of `bytes`
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Current bit position
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of unread bits
    pub fn remaining(&self) -> usize {
        self.bytes.len() * 8 - self.pos
    }

    /// Read `width` bits as an unsigned value
    pub fn read(&mut self, width: u32) -> Result<u32> {
        let width = width as usize;
        if width > self.remaining() {
            return Err(Error::ProtocolDecode(format!(
                "need {} bits at offset {}, only {} left",
                width,
                self.pos,
                self.remaining()
            )));
        }
        let value = get_bits(self.bytes, self.pos, width as u32);
        self.pos += width;
        Ok(value)
    }

    /// Read a single bit
    pub fn read_bit(&mut self) -> Result<bool> {
        Ok(self.read(1)? != 0)
    }

    /// Skip `count` bits
    pub fn skip(&mut self, count: u32) -> Result<()> {
        let count = count as usize;
        if count > self.remaining() {
            return Err(Error::ProtocolDecode(format!(
                "cannot skip {} bits at offset {}",
                count, self.pos
            )));
        }
        self.pos += count;
        Ok(())
    }
}

/// Extract `width` bits starting at bit `pos`; the range must be in bounds
pub(crate) fn get_bits(bytes: &[u8], pos: usize, width: u32) -> u32 {
    let mut value = 0u32;
    for i in 0..width as usize {
        let bit = pos + i;
        let set = bytes[bit / 8] & (0x80 >> (bit % 8)) != 0;
        value = (value << 1) | set as u32;
    }
    value
}

/// Overwrite `width` bits starting at bit `pos`; the range must be in bounds
pub(crate) fn put_bits(bytes: &mut [u8], pos: usize, value: u32, width: u32) {
    for i in 0..width as usize {
        let bit = pos + i;
        let mask = 0x80 >> (bit % 8);
        if (value >> (width as usize - 1 - i)) & 1 != 0 {
            bytes[bit / 8] |= mask;
        } else {
            bytes[bit / 8] &= !mask;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_is_msb_first() {
        let mut w = BitWriter::new();
        w.push(0b101, 3);
        w.push(0x1F, 5);
        w.push(0b1, 1);
        assert_eq!(w.len_bits(), 9);
        assert_eq!(w.as_bytes(), &[0b1011_1111, 0b1000_0000]);
    }

    #[test]
    fn test_reader_reads_back() {
        let mut w = BitWriter::new();
        w.push(0x2A, 6);
        w.push(0xBEEF, 16);
        w.push_bit(true);
        let bytes = w.into_bytes();
        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read(6).unwrap(), 0x2A);
        assert_eq!(r.read(16).unwrap(), 0xBEEF);
        assert!(r.read_bit().unwrap());
        assert_eq!(r.remaining(), 1);
    }

    #[test]
    fn test_reader_underflow() {
        let bytes = [0xFF];
        let mut r = BitReader::new(&bytes);
        assert!(r.read(6).is_ok());
        assert!(matches!(r.read(3), Err(Error::ProtocolDecode(_))));
        assert!(r.skip(3).is_err());
    }

    #[test]
    fn test_put_bits_overwrites() {
        let mut bytes = [0xFF, 0x00];
        put_bits(&mut bytes, 4, 0b0110, 4);
        put_bits(&mut bytes, 8, 0b11, 2);
        assert_eq!(bytes, [0xF6, 0xC0]);
        assert_eq!(get_bits(&bytes, 4, 6), 0b0110_11);
    }
}
