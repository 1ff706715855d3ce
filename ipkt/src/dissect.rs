// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dissector lifecycle and the upper-layer dissector registry.
//!
//! [`dissect`] binds a view over an existing packet without copying it;
//! [`create`] initializes a fresh minimal header for forging. Malformed but
//! parseable packets are passed through with flags set rather than rejected:
//! an inspection engine must not silently drop traffic it merely disagrees
//! with. Only a packet too short for a minimal header fails dissection.
//!
//! The protocol-number → dissector-name registry is process-wide. Protocol
//! modules populate it during startup registration; steady-state traffic
//! only reads it, so it lives behind a read-write lock.

use std::cmp;
use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use tracing::warn;

use crate::error::{DissectError, Result};
use crate::ipv4::{Ipv4View, MIN_HEADER_LEN};
use crate::packet::Packet;
use crate::reassembly::ReassemblyTable;

/// Binds an [`Ipv4View`] over `packet`, validating the header bounds and
/// verifying the checksum. Length inconsistencies and checksum mismatches
/// are flagged on the view and logged, never fatal; the only error is a
/// packet too short to contain a minimal header.
pub fn dissect(packet: Packet) -> Result<Ipv4View> {
    dissect_at(packet, 0)
}

/// [`dissect`] with the header located at `offset` within the packet buffer,
/// for packets still carrying lower-layer framing.
pub fn dissect_at(packet: Packet, offset: usize) -> Result<Ipv4View> {
    let captured = packet.len().saturating_sub(offset);
    if captured < MIN_HEADER_LEN {
        let err = DissectError::Truncated {
            required: MIN_HEADER_LEN,
            available: captured,
        };
        warn!(%err, "ipv4 dissection failed");
        return Err(err);
    }

    let mut view = Ipv4View::bind(packet, offset);

    let hdr_len = view.hdr_len() as usize;
    let total_len = view.total_len() as usize;
    let inconsistency = if hdr_len < MIN_HEADER_LEN {
        Some("header length below 20 bytes")
    } else if hdr_len > captured {
        Some("header length exceeds captured bytes")
    } else if total_len < hdr_len {
        Some("total length below header length")
    } else {
        None
    };

    if let Some(reason) = inconsistency {
        let err = DissectError::FieldInconsistency { reason };
        warn!(%err, "malformed ipv4 header passed through flagged");
        view.flag_invalid_checksum();
    } else if let Some(err) = view.checksum_mismatch() {
        warn!(%err, "ipv4 checksum mismatch passed through flagged");
        view.flag_invalid_checksum();
    }

    Ok(view)
}

/// Initializes a zeroed minimal IPv4 header bound to `packet`, for building
/// packets programmatically. The buffer is extended to 20 bytes if shorter;
/// version, header length and total length are primed so a subsequent
/// [`Ipv4View::forge`] emits a consistent header.
pub fn create(mut packet: Packet) -> Ipv4View {
    if packet.len() < MIN_HEADER_LEN {
        let missing = MIN_HEADER_LEN - packet.len();
        packet.data_mut().push_owned(vec![0; missing]);
    }
    let total = cmp::min(packet.len(), u16::MAX as usize) as u16;
    if let Some(header) = packet.data_mut().writable(0..MIN_HEADER_LEN) {
        header.fill(0);
    }

    let mut view = Ipv4View::bind(packet, 0);
    view.set_version(4);
    view.set_hdr_len(MIN_HEADER_LEN as u8);
    view.set_total_len(total);
    view
}

/// A dissector front-end owning the fragment reassembly state, so the common
/// control flow is one call: parse, validate, and either hand back the view
/// or park it with the reassembly manager until its datagram completes.
#[derive(Default)]
pub struct Dissector {
    reassembly: ReassemblyTable,
}

impl Dissector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dissects one packet. Non-fragments come back immediately; fragments
    /// are handed to the reassembly table and `Ok(None)` is returned until a
    /// datagram completes, at which point the reassembled view comes back.
    pub fn dissect(&self, packet: Packet) -> Result<Option<Ipv4View>> {
        let view = dissect(packet)?;
        if view.is_fragment() {
            Ok(self.reassembly.push(view))
        } else {
            Ok(Some(view))
        }
    }

    /// The underlying fragment table, for flow enumeration and eviction.
    pub fn reassembly(&self) -> &ReassemblyTable {
        &self.reassembly
    }
}

static PROTO_DISSECTORS: Lazy<RwLock<HashMap<u8, String>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers the upper-layer dissector name for an IP protocol number.
/// Entries are added once at startup by protocol modules; a re-registration
/// replaces the previous name.
pub fn register_proto_dissector(proto: u8, name: &str) {
    let mut registry = match PROTO_DISSECTORS.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    registry.insert(proto, name.to_owned());
}

/// Looks up the dissector name registered for an IP protocol number.
pub fn proto_dissector(proto: u8) -> Option<String> {
    let registry = match PROTO_DISSECTORS.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    registry.get(&proto).cloned()
}

impl Ipv4View {
    /// The upper-layer dissector name for this packet's protocol number,
    /// used to dispatch after successful dissection.
    pub fn proto_dissector(&self) -> Option<String> {
        proto_dissector(self.proto())
    }
}
