//! Bit-reversal lookup tables
//!
//! The device shifts data words back LSB first, so every 8- and 16-bit
//! reply field is bit-reversed relative to the request direction.

use std::sync::LazyLock;

/// 256-entry byte reversal table
pub static REV8: [u8; 256] = build_rev8();

/// 65536-entry halfword reversal table
pub static REV16: LazyLock<Box<[u16]>> = LazyLock::new(|| {
    (0..=u16::MAX)
        .map(|x| {
            let [hi, lo] = x.to_be_bytes();
            u16::from_be_bytes([REV8[lo as usize], REV8[hi as usize]])
        })
        .collect()
});

const fn build_rev8() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = (i as u8).reverse_bits();
        i += 1;
    }
    table
}

/// Reverse the bit order of a byte
#[inline]
pub fn reverse8(x: u8) -> u8 {
    REV8[x as usize]
}

/// Reverse the bit order of a halfword
#[inline]
pub fn reverse16(x: u16) -> u16 {
    REV16[x as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse8_known_values() {
        assert_eq!(reverse8(0x01), 0x80);
        assert_eq!(reverse8(0xF0), 0x0F);
        assert_eq!(reverse8(0b1100_1010), 0b0101_0011);
    }

    #[test]
    fn test_reverse8_involution() {
        for x in 0..=u8::MAX {
            assert_eq!(reverse8(reverse8(x)), x);
        }
    }

    #[test]
    fn test_reverse16_involution() {
        for x in 0..=u16::MAX {
            assert_eq!(reverse16(reverse16(x)), x);
            assert_eq!(reverse16(x), x.reverse_bits());
        }
    }
}
