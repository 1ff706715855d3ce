// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shift/mask helpers for sub-byte header fields.
//!
//! IPv4 packs several fields below byte granularity (version/IHL share a
//! byte, the flag bits share a 16-bit word with the fragment offset). These
//! helpers operate on host-order words after byte-order normalization; bit 0
//! is the least significant bit.

/// Reads bit `bit` of `word`.
#[inline]
pub fn get_bit(word: u16, bit: u32) -> bool {
    debug_assert!(bit < 16);
    (word >> bit) & 1 != 0
}

/// Returns `word` with bit `bit` set to `value`, leaving all other bits
/// untouched.
#[inline]
pub fn set_bit(word: u16, bit: u32, value: bool) -> u16 {
    debug_assert!(bit < 16);
    if value {
        word | (1 << bit)
    } else {
        word & !(1 << bit)
    }
}

/// Extracts bits `[lo, hi)` of `word`, right-aligned.
#[inline]
pub fn get_bits(word: u16, lo: u32, hi: u32) -> u16 {
    debug_assert!(lo < hi && hi <= 16);
    let mask = bit_mask(hi - lo);
    (word >> lo) & mask
}

/// Returns `word` with bits `[lo, hi)` replaced by the low bits of `value`,
/// leaving sibling bits untouched.
#[inline]
pub fn set_bits(word: u16, lo: u32, hi: u32, value: u16) -> u16 {
    debug_assert!(lo < hi && hi <= 16);
    let mask = bit_mask(hi - lo);
    (word & !(mask << lo)) | ((value & mask) << lo)
}

#[inline]
fn bit_mask(width: u32) -> u16 {
    if width >= 16 {
        u16::MAX
    } else {
        (1 << width) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_bits() {
        assert!(get_bit(0b1000_0000_0000_0000, 15));
        assert!(!get_bit(0b0111_1111_1111_1111, 15));
        assert_eq!(set_bit(0, 13, true), 0b0010_0000_0000_0000);
        assert_eq!(set_bit(u16::MAX, 13, false), 0b1101_1111_1111_1111);
        // Setting an already-set bit is a no-op.
        assert_eq!(set_bit(0xFFFF, 0, true), 0xFFFF);
    }

    #[test]
    fn bit_ranges() {
        let word = 0b1010_1100_0011_0101;
        assert_eq!(get_bits(word, 0, 13), word & 0x1FFF);
        assert_eq!(get_bits(word, 13, 16), 0b101);
        assert_eq!(get_bits(word, 0, 16), word);
    }

    #[test]
    fn set_bits_preserves_siblings() {
        let word = 0xFFFF;
        let out = set_bits(word, 13, 16, 0);
        assert_eq!(out, 0x1FFF);
        // The offset bits must survive a flags write and vice versa.
        assert_eq!(set_bits(out, 0, 13, 0), 0);
        assert_eq!(set_bits(0, 0, 13, 0x1FFF), 0x1FFF);
        // Excess bits in the value are masked off.
        assert_eq!(set_bits(0, 13, 16, 0xFF), 0b1110_0000_0000_0000);
    }
}
