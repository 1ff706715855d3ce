// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bit-exact IPv4 header access over a live packet buffer.
//!
//! An [`Ipv4View`] binds to exactly one [`Packet`] and exposes every header
//! field with wire→host normalization applied. Getters read through the
//! segmented buffer without copying more than the field; the first setter
//! call escalates the affected region to exclusively owned storage
//! (copy-on-write, see `SegBuffer::writable`).
//!
//! Every accessor fails soft: invoked on a released or unbound view, a getter
//! returns zero and a setter does nothing, with the anomaly reported through
//! `tracing`. Crashing on malformed input is not an option for a core that
//! sits in-line with live traffic.

use std::cmp;
use std::net::Ipv4Addr;

use ipkt_common::ByteStream;
use tracing::warn;

use crate::bits;
use crate::checksum::ChecksumPartial;
use crate::error::DissectError;
use crate::packet::Packet;

/// Size of the fixed IPv4 header, and the smallest valid header.
pub const MIN_HEADER_LEN: usize = 20;

// Byte offsets of the fields within the fixed header.
const OFF_VER_IHL: usize = 0;
const OFF_TOS: usize = 1;
const OFF_TOTAL_LEN: usize = 2;
const OFF_ID: usize = 4;
const OFF_FRAGMENT: usize = 6;
const OFF_TTL: usize = 8;
const OFF_PROTO: usize = 9;
const OFF_CHKSUM: usize = 10;
const OFF_SRC: usize = 12;
const OFF_DST: usize = 16;

// Bit layout of the 16-bit fragment word, after BE→host normalization.
const FLAG_RESERVED: u32 = 15;
const FLAG_DF: u32 = 14;
const FLAG_MF: u32 = 13;
const FLAGS_LO: u32 = 13;
const FLAGS_HI: u32 = 16;
const FRAG_OFFSET_LO: u32 = 0;
const FRAG_OFFSET_HI: u32 = 13;

// Wire units: header length in 4-byte words, fragment offset in 8-byte
// blocks. Accessors scale so callers only ever see byte units.
const HDR_LEN_SHIFT: u32 = 2;
const FRAG_OFFSET_SHIFT: u32 = 3;

/// A live dissector view over one IPv4 packet.
///
/// Created by [`dissect`](crate::dissect::dissect) or
/// [`create`](crate::dissect::create); invalidated by [`Ipv4View::release`]
/// or [`Ipv4View::forge`].
#[derive(Debug, Default)]
pub struct Ipv4View {
    packet: Option<Packet>,
    header_at: usize,
    invalid_checksum: bool,
    modified: bool,
    reassembled: Option<ByteStream>,
    reassembled_offset: usize,
}

impl Ipv4View {
    pub(crate) fn bind(packet: Packet, header_at: usize) -> Self {
        Ipv4View {
            packet: Some(packet),
            header_at,
            invalid_checksum: false,
            modified: false,
            reassembled: None,
            reassembled_offset: 0,
        }
    }

    /// Whether the view is still bound to a live packet.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.packet.is_some()
    }

    /// The underlying packet, while the view is bound.
    #[inline]
    pub fn packet(&self) -> Option<&Packet> {
        self.packet.as_ref()
    }

    /// Byte offset of the IPv4 header within the packet buffer.
    #[inline]
    pub fn header_offset(&self) -> usize {
        self.header_at
    }

    /// Set at dissection time when the stored checksum did not verify, and
    /// by any field mutation (the stored checksum is stale until recomputed).
    #[inline]
    pub fn invalid_checksum(&self) -> bool {
        self.invalid_checksum
    }

    pub(crate) fn flag_invalid_checksum(&mut self) {
        self.invalid_checksum = true;
    }

    /// Whether any setter has touched the header since dissection.
    #[inline]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Whether the payload accessors read from a reassembled fragment stream
    /// rather than from this packet's own payload bytes.
    #[inline]
    pub fn is_reassembled(&self) -> bool {
        self.reassembled.is_some()
    }

    pub(crate) fn attach_reassembled(&mut self, stream: ByteStream) {
        self.reassembled = Some(stream);
        self.reassembled_offset = 0;
    }

    // --- raw field access -------------------------------------------------

    fn packet_ref(&self) -> Option<&Packet> {
        if self.packet.is_none() {
            warn!(error = %DissectError::InvalidView, "ipv4 field read ignored");
        }
        self.packet.as_ref()
    }

    fn read<const N: usize>(&self, off: usize) -> Option<[u8; N]> {
        let packet = self.packet_ref()?;
        let mut out = [0u8; N];
        if packet.data().read_at(self.header_at + off, &mut out) == N {
            Some(out)
        } else {
            warn!(offset = off, "ipv4 header read past captured bytes");
            None
        }
    }

    fn read8(&self, off: usize) -> u8 {
        self.read::<1>(off).map(|b| b[0]).unwrap_or(0)
    }

    fn read16(&self, off: usize) -> u16 {
        self.read::<2>(off).map(u16::from_be_bytes).unwrap_or(0)
    }

    fn read32(&self, off: usize) -> u32 {
        self.read::<4>(off).map(u32::from_be_bytes).unwrap_or(0)
    }

    fn write<const N: usize>(&mut self, off: usize, bytes: [u8; N]) {
        let start = self.header_at + off;
        let packet = match self.packet.as_mut() {
            Some(p) => p,
            None => {
                warn!(error = %DissectError::InvalidView, "ipv4 field write ignored");
                return;
            }
        };
        match packet.data_mut().writable(start..start + N) {
            Some(region) => {
                region.copy_from_slice(&bytes);
                self.modified = true;
                self.invalid_checksum = true;
            }
            None => warn!(offset = off, "ipv4 header write past captured bytes"),
        }
    }

    // --- typed field accessors --------------------------------------------

    #[inline]
    pub fn version(&self) -> u8 {
        self.read8(OFF_VER_IHL) >> 4
    }

    pub fn set_version(&mut self, version: u8) {
        let merged = (self.read8(OFF_VER_IHL) & 0x0F) | (version << 4);
        self.write(OFF_VER_IHL, [merged]);
    }

    /// Header length in bytes (wire stores it in 4-byte words).
    #[inline]
    pub fn hdr_len(&self) -> u8 {
        (self.read8(OFF_VER_IHL) & 0x0F) << HDR_LEN_SHIFT
    }

    /// Sets the header length from a byte count; the low two bits are lost
    /// to the wire encoding, so `len` should be a multiple of 4.
    pub fn set_hdr_len(&mut self, len: u8) {
        let merged = (self.read8(OFF_VER_IHL) & 0xF0) | ((len >> HDR_LEN_SHIFT) & 0x0F);
        self.write(OFF_VER_IHL, [merged]);
    }

    #[inline]
    pub fn tos(&self) -> u8 {
        self.read8(OFF_TOS)
    }

    pub fn set_tos(&mut self, tos: u8) {
        self.write(OFF_TOS, [tos]);
    }

    #[inline]
    pub fn total_len(&self) -> u16 {
        self.read16(OFF_TOTAL_LEN)
    }

    pub fn set_total_len(&mut self, len: u16) {
        self.write(OFF_TOTAL_LEN, len.to_be_bytes());
    }

    #[inline]
    pub fn id(&self) -> u16 {
        self.read16(OFF_ID)
    }

    pub fn set_id(&mut self, id: u16) {
        self.write(OFF_ID, id.to_be_bytes());
    }

    #[inline]
    fn fragment_word(&self) -> u16 {
        self.read16(OFF_FRAGMENT)
    }

    fn set_fragment_word(&mut self, word: u16) {
        self.write(OFF_FRAGMENT, word.to_be_bytes());
    }

    /// The three flag bits (reserved, don't-fragment, more-fragments) as one
    /// 3-bit value. Shares storage with the per-flag boolean accessors; only
    /// the final bit pattern is defined when both forms are written.
    #[inline]
    pub fn flags(&self) -> u8 {
        bits::get_bits(self.fragment_word(), FLAGS_LO, FLAGS_HI) as u8
    }

    pub fn set_flags(&mut self, flags: u8) {
        let word = bits::set_bits(self.fragment_word(), FLAGS_LO, FLAGS_HI, flags as u16);
        self.set_fragment_word(word);
    }

    #[inline]
    pub fn reserved(&self) -> bool {
        bits::get_bit(self.fragment_word(), FLAG_RESERVED)
    }

    pub fn set_reserved(&mut self, value: bool) {
        let word = bits::set_bit(self.fragment_word(), FLAG_RESERVED, value);
        self.set_fragment_word(word);
    }

    #[inline]
    pub fn dont_fragment(&self) -> bool {
        bits::get_bit(self.fragment_word(), FLAG_DF)
    }

    pub fn set_dont_fragment(&mut self, value: bool) {
        let word = bits::set_bit(self.fragment_word(), FLAG_DF, value);
        self.set_fragment_word(word);
    }

    #[inline]
    pub fn more_fragments(&self) -> bool {
        bits::get_bit(self.fragment_word(), FLAG_MF)
    }

    pub fn set_more_fragments(&mut self, value: bool) {
        let word = bits::set_bit(self.fragment_word(), FLAG_MF, value);
        self.set_fragment_word(word);
    }

    /// Fragment offset in bytes (wire stores it in 8-byte blocks).
    #[inline]
    pub fn frag_offset(&self) -> u16 {
        bits::get_bits(self.fragment_word(), FRAG_OFFSET_LO, FRAG_OFFSET_HI) << FRAG_OFFSET_SHIFT
    }

    /// Sets the fragment offset from a byte count; the low three bits are
    /// lost to the wire encoding, so `offset` should be a multiple of 8.
    pub fn set_frag_offset(&mut self, offset: u16) {
        let word = bits::set_bits(
            self.fragment_word(),
            FRAG_OFFSET_LO,
            FRAG_OFFSET_HI,
            offset >> FRAG_OFFSET_SHIFT,
        );
        self.set_fragment_word(word);
    }

    #[inline]
    pub fn ttl(&self) -> u8 {
        self.read8(OFF_TTL)
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        self.write(OFF_TTL, [ttl]);
    }

    #[inline]
    pub fn proto(&self) -> u8 {
        self.read8(OFF_PROTO)
    }

    pub fn set_proto(&mut self, proto: u8) {
        self.write(OFF_PROTO, [proto]);
    }

    /// The stored header checksum field.
    #[inline]
    pub fn chksum(&self) -> u16 {
        self.read16(OFF_CHKSUM)
    }

    pub fn set_chksum(&mut self, chksum: u16) {
        self.write(OFF_CHKSUM, chksum.to_be_bytes());
    }

    #[inline]
    pub fn src(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.read32(OFF_SRC))
    }

    pub fn set_src(&mut self, addr: Ipv4Addr) {
        self.write(OFF_SRC, addr.octets());
    }

    #[inline]
    pub fn dst(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.read32(OFF_DST))
    }

    pub fn set_dst(&mut self, addr: Ipv4Addr) {
        self.write(OFF_DST, addr.octets());
    }

    // --- checksum ----------------------------------------------------------

    /// Recomputes the header checksum with the stored field treated as zero.
    /// `None` when the view is unbound.
    fn expected_checksum(&self) -> Option<u16> {
        let packet = self.packet_ref()?;
        let hdr = cmp::max(self.hdr_len() as usize, MIN_HEADER_LEN);
        let start = self.header_at;
        let end = (start + hdr).min(packet.len());
        let chk_at = start + OFF_CHKSUM;

        let mut partial = ChecksumPartial::new();
        for slice in packet.data().slices(start..chk_at.min(end)) {
            partial.feed(slice);
        }
        partial.feed(&[0, 0]);
        for slice in packet.data().slices((chk_at + 2).min(end)..end) {
            partial.feed(slice);
        }
        Some(partial.reduce())
    }

    /// Recomputes the header checksum and compares it against the stored
    /// field. `false` for an unbound view.
    pub fn verify_checksum(&self) -> bool {
        match self.expected_checksum() {
            Some(expected) => expected == self.chksum(),
            None => false,
        }
    }

    /// Recomputes the header checksum, writes it back and clears the
    /// invalid-checksum flag.
    pub fn compute_checksum(&mut self) {
        if let Some(expected) = self.expected_checksum() {
            self.set_chksum(expected);
            self.invalid_checksum = false;
        }
    }

    pub(crate) fn checksum_mismatch(&self) -> Option<DissectError> {
        let computed = self.expected_checksum()?;
        let stored = self.chksum();
        if computed == stored {
            None
        } else {
            Some(DissectError::ChecksumMismatch { stored, computed })
        }
    }

    // --- payload -----------------------------------------------------------

    /// Whether this packet is one fragment of a larger datagram.
    #[inline]
    pub fn is_fragment(&self) -> bool {
        self.more_fragments() || self.frag_offset() != 0
    }

    /// Total length minus header length, clamped to zero when the header is
    /// malformed. After reassembly, the length of the assembled stream.
    pub fn payload_length(&self) -> usize {
        if let Some(stream) = &self.reassembled {
            return stream.len();
        }
        (self.total_len() as usize).saturating_sub(self.hdr_len() as usize)
    }

    /// Copies the remaining payload bytes out of the view: the bytes after
    /// the header, or the assembled stream from the current read offset once
    /// reassembly has completed.
    pub fn payload_to_vec(&self) -> Vec<u8> {
        if let Some(stream) = &self.reassembled {
            let mut out = vec![0u8; stream.len().saturating_sub(self.reassembled_offset)];
            let n = stream.read_at(self.reassembled_offset, &mut out);
            out.truncate(n);
            return out;
        }
        let packet = match self.packet_ref() {
            Some(p) => p,
            None => return Vec::new(),
        };
        let hdr = cmp::max(self.hdr_len() as usize, MIN_HEADER_LEN);
        let total = cmp::max(self.total_len() as usize, hdr);
        let start = (self.header_at + hdr).min(packet.len());
        let end = (self.header_at + total).min(packet.len());
        let mut out = vec![0u8; end - start];
        let n = packet.data().read_at(start, &mut out);
        out.truncate(n);
        out
    }

    /// Linear payload read; advances the read offset. For a reassembled view
    /// this consumes the assembled stream in order.
    pub fn read_payload(&mut self, dst: &mut [u8]) -> usize {
        let n = match &self.reassembled {
            Some(stream) => stream.read_at(self.reassembled_offset, dst),
            None => {
                let bytes = self.payload_to_vec();
                // The payload can shrink under the cursor (a header mutation
                // lowering total length), so the start must be clamped too.
                let lo = self.reassembled_offset.min(bytes.len());
                let take = (bytes.len() - lo).min(dst.len());
                dst[..take].copy_from_slice(&bytes[lo..lo + take]);
                take
            }
        };
        self.reassembled_offset += n;
        n
    }

    // --- lifecycle ----------------------------------------------------------

    /// Finalizes the view for transmission: when the header was mutated,
    /// restores total-length consistency and recomputes the checksum, then
    /// returns ownership of the packet. The view is invalid afterwards.
    pub fn forge(&mut self) -> Option<Packet> {
        if self.packet.is_none() {
            warn!(error = %DissectError::InvalidView, "forge on an unbound ipv4 view");
            return None;
        }
        if self.modified {
            let hdr = self.hdr_len() as u16;
            if self.total_len() < hdr {
                self.set_total_len(hdr);
            }
            self.compute_checksum();
        }
        self.reassembled = None;
        self.reassembled_offset = 0;
        self.packet.take()
    }

    /// Detaches the view from its packet and frees any reassembly stream.
    /// Idempotent: releasing a released view is a no-op.
    pub fn release(&mut self) {
        self.packet = None;
        self.reassembled = None;
        self.reassembled_offset = 0;
    }

    /// Marks the underlying packet for discard by the surrounding pipeline.
    /// The core only records intent; it never drops traffic itself.
    pub fn action_drop(&mut self) {
        match self.packet.as_mut() {
            Some(packet) => packet.mark_drop(),
            None => warn!(error = %DissectError::InvalidView, "drop requested on unbound view"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dissect::dissect;
    use ipkt_common::SegBuffer;
    use std::sync::Arc;

    // 20-byte header + 4 payload bytes, checksum valid.
    fn sample_packet() -> Packet {
        let mut bytes = vec![
            0x45, 0x00, 0x00, 0x18, 0xab, 0xcd, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        let chk = crate::checksum::checksum(&bytes);
        bytes[10..12].copy_from_slice(&chk.to_be_bytes());
        bytes.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        Packet::from_vec(bytes)
    }

    #[test]
    fn fields_decode_with_host_byte_order() {
        let view = dissect(sample_packet()).unwrap();
        assert_eq!(view.version(), 4);
        assert_eq!(view.hdr_len(), 20);
        assert_eq!(view.tos(), 0);
        assert_eq!(view.total_len(), 24);
        assert_eq!(view.id(), 0xabcd);
        assert!(view.dont_fragment());
        assert!(!view.more_fragments());
        assert!(!view.reserved());
        assert_eq!(view.frag_offset(), 0);
        assert_eq!(view.ttl(), 64);
        assert_eq!(view.proto(), 17);
        assert_eq!(view.src(), Ipv4Addr::new(192, 168, 0, 1));
        assert_eq!(view.dst(), Ipv4Addr::new(192, 168, 0, 199));
        assert!(!view.invalid_checksum());
        assert_eq!(view.payload_to_vec(), vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn rewriting_fields_with_their_own_values_roundtrips() {
        let original = sample_packet().data().to_vec();
        let mut view = dissect(sample_packet()).unwrap();

        view.set_version(view.version());
        view.set_hdr_len(view.hdr_len());
        view.set_tos(view.tos());
        view.set_total_len(view.total_len());
        view.set_id(view.id());
        view.set_flags(view.flags());
        view.set_frag_offset(view.frag_offset());
        view.set_ttl(view.ttl());
        view.set_proto(view.proto());
        view.set_chksum(view.chksum());
        view.set_src(view.src());
        view.set_dst(view.dst());

        let packet = view.packet().unwrap();
        assert_eq!(packet.data().to_vec(), original);
    }

    #[test]
    fn header_access_spans_buffer_segments() {
        let bytes = sample_packet().data().to_vec();
        let mut buf = SegBuffer::new();
        // Split mid-field: total length straddles the 3-byte boundary.
        buf.push_shared(Arc::from(&bytes[..3]));
        buf.push_shared(Arc::from(&bytes[3..11]));
        buf.push_shared(Arc::from(&bytes[11..]));

        let mut view = dissect(Packet::new(buf)).unwrap();
        assert_eq!(view.total_len(), 24);
        assert!(!view.invalid_checksum());

        view.set_total_len(0x1234);
        assert_eq!(view.total_len(), 0x1234);
    }

    #[test]
    fn flag_bits_are_independent() {
        for combo in 0u8..8 {
            let mut view = dissect(sample_packet()).unwrap();
            let reserved = combo & 0b100 != 0;
            let df = combo & 0b010 != 0;
            let mf = combo & 0b001 != 0;

            view.set_reserved(reserved);
            view.set_dont_fragment(df);
            view.set_more_fragments(mf);

            assert_eq!(view.reserved(), reserved, "combo {combo:03b}");
            assert_eq!(view.dont_fragment(), df, "combo {combo:03b}");
            assert_eq!(view.more_fragments(), mf, "combo {combo:03b}");
            assert_eq!(view.flags(), combo);
            // The offset must never be disturbed by flag writes.
            assert_eq!(view.frag_offset(), 0);
        }
    }

    #[test]
    fn flag_writes_preserve_fragment_offset() {
        let mut view = dissect(sample_packet()).unwrap();
        view.set_frag_offset(1480);
        view.set_dont_fragment(false);
        view.set_more_fragments(true);
        assert_eq!(view.frag_offset(), 1480);
        view.set_frag_offset(0);
        assert!(view.more_fragments());
    }

    #[test]
    fn unit_scaling_roundtrips() {
        let mut view = dissect(sample_packet()).unwrap();
        for len in (20u8..=60).step_by(4) {
            view.set_hdr_len(len);
            assert_eq!(view.hdr_len(), len);
        }
        for offset in (0u16..=8191 * 8).step_by(8 * 129) {
            view.set_frag_offset(offset);
            assert_eq!(view.frag_offset(), offset);
        }
    }

    #[test]
    fn verify_after_compute_holds() {
        let mut view = dissect(sample_packet()).unwrap();
        view.set_ttl(63);
        assert!(view.invalid_checksum());
        view.compute_checksum();
        assert!(!view.invalid_checksum());
        assert!(view.verify_checksum());
    }

    #[test]
    fn released_view_fails_soft() {
        let mut view = dissect(sample_packet()).unwrap();
        let before = view.packet().unwrap().data().to_vec();
        view.release();
        view.release(); // idempotent

        assert!(!view.is_valid());
        assert_eq!(view.ttl(), 0);
        assert_eq!(view.total_len(), 0);
        assert_eq!(view.src(), Ipv4Addr::UNSPECIFIED);
        assert!(!view.verify_checksum());
        assert!(view.payload_to_vec().is_empty());
        view.set_ttl(1); // no-op
        view.action_drop(); // no-op
        assert!(view.forge().is_none());

        // The packet bytes were never reachable for mutation after release.
        let fresh = dissect(sample_packet()).unwrap();
        assert_eq!(fresh.packet().unwrap().data().to_vec(), before);
    }

    #[test]
    fn read_cursor_survives_payload_shrink() {
        let mut view = dissect(sample_packet()).unwrap();
        let mut out = [0u8; 4];
        assert_eq!(view.read_payload(&mut out), 4);
        assert_eq!(out, [0xde, 0xad, 0xbe, 0xef]);

        // Shrinking the payload under an advanced cursor must read as
        // exhausted, not panic.
        view.set_total_len(20);
        assert_eq!(view.read_payload(&mut out), 0);
        assert_eq!(view.payload_length(), 0);
    }

    #[test]
    fn forge_recomputes_only_when_mutated() {
        // Pass-through: a bad checksum must survive forging untouched.
        let mut bytes = sample_packet().data().to_vec();
        bytes[10] ^= 0xFF;
        let mut view = dissect(Packet::from_vec(bytes.clone())).unwrap();
        assert!(view.invalid_checksum());
        let packet = view.forge().unwrap();
        assert_eq!(packet.data().to_vec(), bytes);

        // Mutated: forge must recompute.
        let mut view = dissect(sample_packet()).unwrap();
        view.set_ttl(1);
        let packet = view.forge().unwrap();
        assert!(!view.is_valid());
        let reparsed = dissect(packet).unwrap();
        assert_eq!(reparsed.ttl(), 1);
        assert!(!reparsed.invalid_checksum());
    }
}
