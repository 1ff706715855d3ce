// SPDX-License-Identifier: MIT OR Apache-2.0

//! Segmented byte-buffer primitives used by the `ipkt` dissection core.
//!
//! Captured packets are not guaranteed to live in one contiguous allocation:
//! a capture backend may hand out a chain of chunks, and an in-line rewrite
//! may split a region. [`SegBuffer`] models that storage as an ordered list
//! of segments, each either shared (read-only, reference counted) or
//! exclusively owned. Reads never force a copy; the first write to a region
//! escalates it to an owned segment (see [`SegBuffer::writable`]).
//!
//! [`ByteStream`] is the appendable, linearly-readable counterpart used to
//! hold reassembled payloads.

#![forbid(unsafe_code)]

use std::ops::Range;
use std::sync::Arc;

#[derive(Clone, Debug)]
enum Segment {
    Shared(Arc<[u8]>),
    Owned(Vec<u8>),
}

impl Segment {
    #[inline]
    fn as_slice(&self) -> &[u8] {
        match self {
            Segment::Shared(s) => s,
            Segment::Owned(v) => v.as_slice(),
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.as_slice().len()
    }
}

/// A possibly non-contiguous byte buffer with copy-on-write mutation.
#[derive(Clone, Debug, Default)]
pub struct SegBuffer {
    segs: Vec<Segment>,
    len: usize,
}

impl SegBuffer {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a single owned chunk without copying it.
    #[inline]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        SegBuffer {
            segs: vec![Segment::Owned(bytes)],
            len,
        }
    }

    /// Wraps a single shared chunk. The chunk stays read-only until a write
    /// escalates (a copy of) it to owned storage.
    #[inline]
    pub fn from_shared(chunk: Arc<[u8]>) -> Self {
        let mut buf = SegBuffer::new();
        buf.push_shared(chunk);
        buf
    }

    /// Appends a shared chunk to the end of the buffer.
    pub fn push_shared(&mut self, chunk: Arc<[u8]>) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.segs.push(Segment::Shared(chunk));
    }

    /// Appends an owned chunk to the end of the buffer.
    pub fn push_owned(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.segs.push(Segment::Owned(chunk));
    }

    /// The total length of the buffer, across all segments.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of underlying segments. Mostly useful for tests that need
    /// to observe copy-on-write splits.
    #[inline]
    pub fn segment_count(&self) -> usize {
        self.segs.len()
    }

    /// Locates the segment containing absolute position `pos`, returning the
    /// segment index and the offset within it.
    fn locate(&self, pos: usize) -> Option<(usize, usize)> {
        if pos >= self.len {
            return None;
        }
        let mut skipped = 0;
        for (idx, seg) in self.segs.iter().enumerate() {
            if pos < skipped + seg.len() {
                return Some((idx, pos - skipped));
            }
            skipped += seg.len();
        }
        None
    }

    /// Reads a single byte.
    #[inline]
    pub fn byte(&self, pos: usize) -> Option<u8> {
        let (idx, off) = self.locate(pos)?;
        self.segs[idx].as_slice().get(off).copied()
    }

    /// Copies bytes starting at `pos` into `dst`, returning the number of
    /// bytes copied (less than `dst.len()` only when the buffer ends early).
    pub fn read_at(&self, pos: usize, dst: &mut [u8]) -> usize {
        let mut copied = 0;
        for slice in self.slices(pos..self.len) {
            if copied == dst.len() {
                break;
            }
            let take = slice.len().min(dst.len() - copied);
            dst[copied..copied + take].copy_from_slice(&slice[..take]);
            copied += take;
        }
        copied
    }

    /// Copies the whole buffer into one contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for seg in &self.segs {
            out.extend_from_slice(seg.as_slice());
        }
        out
    }

    /// Returns an iterator over the byte slices covering `range`, in order.
    /// Slices follow segment boundaries; their concatenation is exactly the
    /// bytes of `range` (clamped to the buffer length).
    pub fn slices(&self, range: Range<usize>) -> Slices<'_> {
        let end = range.end.min(self.len);
        let remaining = end.saturating_sub(range.start);
        let (seg_idx, skip) = match self.locate(range.start) {
            Some(loc) if remaining > 0 => loc,
            _ => (self.segs.len(), 0),
        };
        Slices {
            segs: &self.segs,
            seg_idx,
            skip,
            remaining,
        }
    }

    /// Copy-on-write escalation: makes `range` land in a single exclusively
    /// owned segment and returns a mutable slice over it. Segments covering
    /// the range are split at its boundaries; shared storage is copied.
    /// Returns `None` if the range falls outside the buffer.
    pub fn writable(&mut self, range: Range<usize>) -> Option<&mut [u8]> {
        if range.start > range.end || range.end > self.len {
            return None;
        }
        if range.is_empty() {
            return Some(&mut []);
        }

        let (first, first_off) = self.locate(range.start)?;
        let (last, last_off) = self.locate(range.end - 1)?;

        // Fast path: the range already sits inside one owned segment.
        if first == last && matches!(&self.segs[first], Segment::Owned(_)) {
            match &mut self.segs[first] {
                Segment::Owned(v) => return Some(&mut v[first_off..last_off + 1]),
                Segment::Shared(_) => unreachable!(),
            }
        }

        // Split out up to three owned segments: the bytes before the range
        // within the first affected segment, the range itself, and the bytes
        // after it within the last affected segment.
        let head = self.segs[first].as_slice()[..first_off].to_vec();
        let mut mid = Vec::with_capacity(range.len());
        for idx in first..=last {
            let slice = self.segs[idx].as_slice();
            let lo = if idx == first { first_off } else { 0 };
            let hi = if idx == last { last_off + 1 } else { slice.len() };
            mid.extend_from_slice(&slice[lo..hi]);
        }
        let tail = self.segs[last].as_slice()[last_off + 1..].to_vec();

        let mut replacement = Vec::with_capacity(3);
        if !head.is_empty() {
            replacement.push(Segment::Owned(head));
        }
        let mid_rel = replacement.len();
        replacement.push(Segment::Owned(mid));
        if !tail.is_empty() {
            replacement.push(Segment::Owned(tail));
        }

        let mid_idx = first + mid_rel;
        self.segs.splice(first..=last, replacement);

        match &mut self.segs[mid_idx] {
            Segment::Owned(v) => Some(v.as_mut_slice()),
            Segment::Shared(_) => None,
        }
    }
}

/// Iterator over the byte slices of a [`SegBuffer`] range.
pub struct Slices<'a> {
    segs: &'a [Segment],
    seg_idx: usize,
    skip: usize,
    remaining: usize,
}

impl<'a> Iterator for Slices<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        while self.remaining > 0 {
            let seg = self.segs.get(self.seg_idx)?;
            self.seg_idx += 1;
            let slice = &seg.as_slice()[self.skip..];
            self.skip = 0;
            if slice.is_empty() {
                continue;
            }
            let take = slice.len().min(self.remaining);
            self.remaining -= take;
            return Some(&slice[..take]);
        }
        None
    }
}

/// An appendable byte stream with stable linear read access.
///
/// Chunks pushed into the stream are never moved or merged, so offsets handed
/// to [`ByteStream::read_at`] remain valid as the stream grows.
#[derive(Clone, Debug, Default)]
pub struct ByteStream {
    chunks: Vec<Vec<u8>>,
    len: usize,
}

impl ByteStream {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes to the end of the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.len += bytes.len();
        self.chunks.push(bytes.to_vec());
    }

    /// The total number of bytes in the stream.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies bytes starting at stream offset `pos` into `dst`, returning the
    /// number of bytes copied. Does not consume the stream.
    pub fn read_at(&self, pos: usize, dst: &mut [u8]) -> usize {
        let mut skipped = 0;
        let mut copied = 0;
        for chunk in &self.chunks {
            if copied == dst.len() {
                break;
            }
            let chunk_start = skipped;
            skipped += chunk.len();
            if skipped <= pos {
                continue;
            }
            let lo = pos.saturating_sub(chunk_start);
            let take = (chunk.len() - lo).min(dst.len() - copied);
            dst[copied..copied + take].copy_from_slice(&chunk[lo..lo + take]);
            copied += take;
        }
        copied
    }

    /// Copies the entire stream into one contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segmented(parts: &[&[u8]]) -> SegBuffer {
        let mut buf = SegBuffer::new();
        for part in parts {
            buf.push_shared(Arc::from(*part));
        }
        buf
    }

    #[test]
    fn read_spans_segments() {
        let buf = segmented(&[b"abc", b"de", b"fgh"]);
        assert_eq!(buf.len(), 8);
        assert_eq!(buf.byte(0), Some(b'a'));
        assert_eq!(buf.byte(4), Some(b'e'));
        assert_eq!(buf.byte(8), None);

        let mut out = [0u8; 5];
        assert_eq!(buf.read_at(2, &mut out), 5);
        assert_eq!(&out, b"cdefg");
    }

    #[test]
    fn slices_follow_segment_bounds() {
        let buf = segmented(&[b"abc", b"de", b"fgh"]);
        let collected: Vec<&[u8]> = buf.slices(1..7).collect();
        assert_eq!(collected, vec![&b"bc"[..], &b"de"[..], &b"fg"[..]]);
        assert!(buf.slices(3..3).next().is_none());
    }

    #[test]
    fn writable_escalates_shared_storage() {
        let chunk: Arc<[u8]> = Arc::from(&b"abcdefgh"[..]);
        let mut buf = SegBuffer::from_shared(Arc::clone(&chunk));
        let other = SegBuffer::from_shared(Arc::clone(&chunk));

        let region = buf.writable(2..5).unwrap();
        region.copy_from_slice(b"XYZ");

        assert_eq!(buf.to_vec(), b"abXYZfgh");
        // The sibling buffer sharing the chunk must be untouched.
        assert_eq!(other.to_vec(), b"abcdefgh");
        assert_eq!(&chunk[..], b"abcdefgh");
    }

    #[test]
    fn writable_coalesces_across_segments() {
        let mut buf = segmented(&[b"abc", b"de", b"fgh"]);
        let region = buf.writable(1..6).unwrap();
        assert_eq!(region, b"bcdef");
        region.copy_from_slice(b"12345");
        assert_eq!(buf.to_vec(), b"a12345gh");
    }

    #[test]
    fn writable_rejects_out_of_bounds() {
        let mut buf = segmented(&[b"abc"]);
        assert!(buf.writable(1..4).is_none());
    }

    #[test]
    fn fast_path_write_then_cross_segment_escalation() {
        let mut buf = segmented(&[b"abcd", b"efgh"]);
        // First write stays within one segment and, once owned, takes the
        // in-place path; the second spans both and must still split cleanly.
        buf.writable(0..2).unwrap().copy_from_slice(b"AB");
        buf.writable(0..2).unwrap().copy_from_slice(b"ab");
        buf.writable(1..6).unwrap().copy_from_slice(b"12345");
        assert_eq!(buf.to_vec(), b"a12345gh");
    }

    #[test]
    fn second_write_to_same_region_reuses_owned_segment() {
        let mut buf = segmented(&[b"abcdefgh"]);
        buf.writable(2..5).unwrap();
        let splits = buf.segment_count();
        buf.writable(2..5).unwrap();
        assert_eq!(buf.segment_count(), splits);
    }

    #[test]
    fn stream_appends_and_reads_linearly() {
        let mut stream = ByteStream::new();
        stream.push(b"hello ");
        stream.push(b"world");
        assert_eq!(stream.len(), 11);

        let mut out = [0u8; 5];
        assert_eq!(stream.read_at(3, &mut out), 5);
        assert_eq!(&out, b"lo wo");
        assert_eq!(stream.to_vec(), b"hello world");

        let mut past_end = [0u8; 4];
        assert_eq!(stream.read_at(9, &mut past_end), 2);
    }
}
