// SPDX-License-Identifier: MIT OR Apache-2.0

//! Minimal owned packet wrapper.
//!
//! Capture and injection live outside this core; a [`Packet`] is just the
//! captured bytes (as a segmented buffer) plus the drop-intent flag that
//! `action_drop` raises for the surrounding pipeline to honor.

use ipkt_common::SegBuffer;

#[derive(Clone, Debug, Default)]
pub struct Packet {
    data: SegBuffer,
    drop_marked: bool,
}

impl Packet {
    #[inline]
    pub fn new(data: SegBuffer) -> Self {
        Packet {
            data,
            drop_marked: false,
        }
    }

    #[inline]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Packet::new(SegBuffer::from_vec(bytes))
    }

    #[inline]
    pub fn data(&self) -> &SegBuffer {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut SegBuffer {
        &mut self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flags the packet for discard. The core never drops traffic itself;
    /// the pipeline reads this intent back with [`Packet::drop_marked`].
    #[inline]
    pub fn mark_drop(&mut self) {
        self.drop_marked = true;
    }

    #[inline]
    pub fn drop_marked(&self) -> bool {
        self.drop_marked
    }
}
