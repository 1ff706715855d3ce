// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fragment tracking and datagram reassembly.
//!
//! Fragments are grouped by flow identity (source, destination,
//! identification, protocol). Each [`FragmentSet`] moves through three
//! states: Collecting (at least one fragment, not yet contiguous from offset
//! zero through a terminal fragment), Complete (contiguous run ending in a
//! fragment with more-fragments clear), and Consumed (the assembled stream
//! has been handed to the view owning the first fragment and the set removed
//! from the table).
//!
//! Overlap policy: when a later fragment overlaps bytes already received,
//! the earlier-arriving data wins for every overlapped byte and only the
//! later fragment's uncovered bytes are kept. This tie-break is deliberate
//! and security-relevant; substituting last-write-wins or rejecting overlaps
//! would change how evasion attempts parse.
//!
//! The table never decides staleness. Incomplete sets stay until the caller
//! enumerates them with [`ReassemblyTable::flows`] and discards them with
//! [`ReassemblyTable::evict`].

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::Instant;

use ipkt_common::ByteStream;
use tracing::{debug, warn};

use crate::ipv4::Ipv4View;

/// Identity of one fragmented datagram in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub id: u16,
    pub proto: u8,
}

impl FlowKey {
    pub fn of(view: &Ipv4View) -> Self {
        FlowKey {
            src: view.src(),
            dst: view.dst(),
            id: view.id(),
            proto: view.proto(),
        }
    }
}

/// One received fragment, ordered by offset within its set.
#[derive(Clone, Copy, Debug)]
struct FragmentRecord {
    offset: usize,
    len: usize,
    more_fragments: bool,
}

/// Reassembly state for one flow key.
struct FragmentSet {
    records: Vec<FragmentRecord>,
    data: Vec<u8>,
    covered: Vec<(usize, usize)>,
    first_view: Option<Ipv4View>,
    last_activity: Instant,
}

impl FragmentSet {
    fn new() -> Self {
        FragmentSet {
            records: Vec::new(),
            data: Vec::new(),
            covered: Vec::new(),
            first_view: None,
            last_activity: Instant::now(),
        }
    }

    /// Folds one fragment into the set. Duplicate regions are informational:
    /// the fragment (and its view) is discarded without error.
    fn insert(&mut self, offset: usize, bytes: Vec<u8>, more_fragments: bool, view: Ipv4View) {
        self.last_activity = Instant::now();

        if bytes.is_empty() {
            debug!(offset, "empty fragment discarded");
            return;
        }
        let end = offset + bytes.len();

        let gaps = uncovered(&self.covered, offset, end);
        if gaps.is_empty() {
            debug!(offset, end, "fully duplicated fragment region discarded");
            return;
        }

        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        // First-seen data wins: only bytes in previously uncovered gaps are
        // written; overlapped bytes of this later arrival are dropped.
        for &(lo, hi) in &gaps {
            self.data[lo..hi].copy_from_slice(&bytes[lo - offset..hi - offset]);
        }
        add_interval(&mut self.covered, offset, end);

        let pos = self.records.partition_point(|r| r.offset <= offset);
        self.records.insert(
            pos,
            FragmentRecord {
                offset,
                len: bytes.len(),
                more_fragments,
            },
        );

        if offset == 0 && self.first_view.is_none() {
            self.first_view = Some(view);
        }
    }

    /// End of the datagram: the lowest-offset fragment seen with
    /// more-fragments clear. Records are kept in offset order.
    fn terminal_end(&self) -> Option<usize> {
        self.records
            .iter()
            .find(|r| !r.more_fragments)
            .map(|r| r.offset + r.len)
    }

    /// Complete once a terminal fragment has been seen and offsets from zero
    /// form a contiguous run up to its end.
    fn is_complete(&self) -> bool {
        match (self.terminal_end(), self.covered.first()) {
            (Some(total), Some(&(0, hi))) => hi >= total && self.first_view.is_some(),
            _ => false,
        }
    }

    /// Consumes the set: appends the fragments' bytes in offset order into
    /// one stream and hands it to the view owning the first fragment.
    fn into_view(mut self) -> Option<Ipv4View> {
        let total = self.terminal_end()?;
        let mut stream = ByteStream::new();
        stream.push(&self.data[..total]);
        let mut view = self.first_view.take()?;
        view.attach_reassembled(stream);
        Some(view)
    }
}

/// Returns the sub-ranges of `[start, end)` not yet covered.
fn uncovered(covered: &[(usize, usize)], start: usize, end: usize) -> Vec<(usize, usize)> {
    let mut gaps = Vec::new();
    let mut cursor = start;
    for &(lo, hi) in covered {
        if hi <= cursor {
            continue;
        }
        if lo >= end {
            break;
        }
        if lo > cursor {
            gaps.push((cursor, lo.min(end)));
        }
        cursor = cursor.max(hi);
        if cursor >= end {
            break;
        }
    }
    if cursor < end {
        gaps.push((cursor, end));
    }
    gaps
}

/// Inserts `[start, end)` into the sorted disjoint interval list, merging
/// neighbors.
fn add_interval(covered: &mut Vec<(usize, usize)>, start: usize, end: usize) {
    let mut merged = Vec::with_capacity(covered.len() + 1);
    let mut new = (start, end);
    let mut placed = false;
    for &(lo, hi) in covered.iter() {
        if hi < new.0 {
            merged.push((lo, hi));
        } else if lo > new.1 {
            if !placed {
                merged.push(new);
                placed = true;
            }
            merged.push((lo, hi));
        } else {
            new = (new.0.min(lo), new.1.max(hi));
        }
    }
    if !placed {
        merged.push(new);
    }
    *covered = merged;
}

/// The shared, concurrently mutated fragment table. A single lock serializes
/// fragments of the same flow arriving on different workers, which keeps the
/// first-seen overlap tie-break deterministic.
#[derive(Default)]
pub struct ReassemblyTable {
    sets: Mutex<HashMap<FlowKey, FragmentSet>>,
}

impl ReassemblyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one fragment view into the table. Returns the reassembled view
    /// (the one owning the first fragment, its payload redirected to the
    /// assembled stream) once the datagram completes; `None` while the set
    /// is still collecting or the fragment was discarded.
    pub fn push(&self, view: Ipv4View) -> Option<Ipv4View> {
        if !view.is_valid() {
            warn!("fragment view not bound to a packet; discarded");
            return None;
        }
        let key = FlowKey::of(&view);
        let offset = view.frag_offset() as usize;
        let more_fragments = view.more_fragments();
        let bytes = view.payload_to_vec();

        let mut sets = lock_table(&self.sets);
        let set = sets.entry(key).or_insert_with(FragmentSet::new);
        set.insert(offset, bytes, more_fragments, view);

        if set.is_complete() {
            let set = sets.remove(&key)?;
            let view = set.into_view()?;
            debug!(
                src = %key.src,
                dst = %key.dst,
                id = key.id,
                len = view.payload_length(),
                "datagram reassembled"
            );
            return Some(view);
        }
        None
    }

    /// The flow keys currently collecting, with their last fragment arrival
    /// times. Staleness policy belongs to the caller.
    pub fn flows(&self) -> Vec<(FlowKey, Instant)> {
        lock_table(&self.sets)
            .iter()
            .map(|(key, set)| (*key, set.last_activity))
            .collect()
    }

    /// Forcibly discards an incomplete set, releasing the fragment views it
    /// holds. Returns whether the key was present.
    pub fn evict(&self, key: &FlowKey) -> bool {
        lock_table(&self.sets).remove(key).is_some()
    }

    /// Number of fragment sets currently collecting.
    pub fn len(&self) -> usize {
        lock_table(&self.sets).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock_table(
    sets: &Mutex<HashMap<FlowKey, FragmentSet>>,
) -> std::sync::MutexGuard<'_, HashMap<FlowKey, FragmentSet>> {
    match sets.lock() {
        Ok(guard) => guard,
        // A panic while holding the lock cannot leave the interval lists in
        // a torn state; keep inspecting traffic.
        Err(poisoned) => poisoned.into_inner(),
    }
}
