// SPDX-License-Identifier: MIT OR Apache-2.0

//! Internet checksum engine (RFC 791).
//!
//! Two entry points: [`checksum`] over one contiguous byte range, and
//! [`checksum_segments`] over an ordered sequence of byte ranges that need
//! not be word-aligned relative to each other. The latter exists because a
//! packet buffer is segmented: the header or payload may be spread across
//! chunks, and materializing a contiguous copy just to checksum it would
//! defeat the point of the buffer abstraction.
//!
//! The core correctness property is partition-invariance: feeding any
//! partition of a byte sequence into a [`ChecksumPartial`] yields a result
//! bit-identical to [`checksum`] over the concatenation.

/// Computes the Internet checksum of a contiguous byte range: the ones'
/// complement of the ones'-complement sum of all 16-bit big-endian words,
/// zero-padding a trailing odd byte.
#[inline]
pub fn checksum(bytes: &[u8]) -> u16 {
    let mut partial = ChecksumPartial::new();
    partial.feed(bytes);
    partial.reduce()
}

/// Computes the Internet checksum across an ordered sequence of byte ranges,
/// as produced by `SegBuffer::slices`.
pub fn checksum_segments<'a, I>(segments: I) -> u16
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut partial = ChecksumPartial::new();
    for segment in segments {
        partial.feed(segment);
    }
    partial.reduce()
}

/// Incremental checksum accumulator.
///
/// Carries, between segments: the running sum, a pending byte left over from
/// an odd-length segment, and the parity telling whether the next incoming
/// byte is the high or the low half of a 16-bit word.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChecksumPartial {
    sum: u32,
    leftover: u8,
    odd: bool,
}

impl ChecksumPartial {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds `bytes` into the running checksum. Segments of any length,
    /// including empty and odd-length ones, are accepted.
    pub fn feed(&mut self, bytes: &[u8]) {
        let mut bytes = bytes;

        // A pending high byte from the previous segment pairs with our first
        // byte to complete its word.
        if self.odd {
            if let Some((&low, rest)) = bytes.split_first() {
                self.sum += u16::from_be_bytes([self.leftover, low]) as u32;
                self.leftover = 0;
                self.odd = false;
                bytes = rest;
            } else {
                return;
            }
        }

        let mut words = bytes.chunks_exact(2);
        for word in &mut words {
            self.sum += u16::from_be_bytes([word[0], word[1]]) as u32;
        }
        if let Some(&high) = words.remainder().first() {
            self.leftover = high;
            self.odd = true;
        }

        // Fold carries back in so the accumulator never overflows, no matter
        // how many segments follow.
        while self.sum >> 16 != 0 {
            self.sum = (self.sum & 0xFFFF) + (self.sum >> 16);
        }
    }

    /// Finalizes the accumulator: zero-pads a trailing odd byte, folds any
    /// remaining carry and returns the ones' complement. The accumulator is
    /// left untouched and may keep accepting segments.
    pub fn reduce(&self) -> u16 {
        let mut sum = self.sum;
        if self.odd {
            sum += u16::from_be_bytes([self.leftover, 0]) as u32;
        }
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        !(sum as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Header example from RFC 1071 errata discussions, widely used as a
    // known-answer test: checksum field (bytes 10..12) zeroed.
    const SAMPLE_HEADER: [u8; 20] = [
        0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8, 0x00,
        0x01, 0xc0, 0xa8, 0x00, 0xc7,
    ];

    #[test]
    fn known_answer() {
        assert_eq!(checksum(&SAMPLE_HEADER), 0xb861);
    }

    #[test]
    fn checksum_over_full_header_is_zero() {
        let mut header = SAMPLE_HEADER;
        header[10] = 0xb8;
        header[11] = 0x61;
        assert_eq!(checksum(&header), 0);
    }

    #[test]
    fn empty_input() {
        assert_eq!(checksum(&[]), 0xFFFF);
    }

    #[test]
    fn odd_length_pads_with_zero() {
        assert_eq!(checksum(&[0xab]), checksum(&[0xab, 0x00]));
    }

    #[test]
    fn partition_invariance() {
        let data: Vec<u8> = (0u16..251).map(|i| (i * 7 % 256) as u8).collect();
        let reference = checksum(&data);

        // Every split point, including ones that leave odd-length halves.
        for split in 0..=data.len() {
            let (a, b) = data.split_at(split);
            assert_eq!(checksum_segments([a, b]), reference, "split at {split}");
        }

        // A pathological partition into 1- and 3-byte pieces.
        let mut partial = ChecksumPartial::new();
        let mut rest = data.as_slice();
        let mut step = 1;
        while !rest.is_empty() {
            let take = step.min(rest.len());
            let (piece, tail) = rest.split_at(take);
            partial.feed(piece);
            rest = tail;
            step = if step == 1 { 3 } else { 1 };
        }
        assert_eq!(partial.reduce(), reference);

        // Empty segments are inert.
        assert_eq!(
            checksum_segments([&data[..5], &[][..], &data[5..]]),
            reference
        );
    }

    #[test]
    fn reduce_does_not_consume() {
        let mut partial = ChecksumPartial::new();
        partial.feed(&SAMPLE_HEADER[..7]);
        let _ = partial.reduce();
        partial.feed(&SAMPLE_HEADER[7..]);
        assert_eq!(partial.reduce(), 0xb861);
    }
}
