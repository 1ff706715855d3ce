// SPDX-License-Identifier: MIT OR Apache-2.0

//! IPv4 dissection core for in-line packet inspection.
//!
//! This crate parses, validates, mutates, reassembles and re-serializes
//! IPv4 headers embedded in live traffic:
//!
//! - [`dissect`](dissect::dissect) binds a bit-exact, write-through
//!   [`Ipv4View`](ipv4::Ipv4View) over a (possibly segmented) packet buffer;
//! - [`checksum`] implements the RFC 791 Internet checksum, including the
//!   incremental variant needed for non-contiguous buffers;
//! - [`reassembly`] tracks in-flight fragment sets per flow and merges them
//!   into one logically contiguous payload stream;
//! - [`dissect`] also hosts the lifecycle operations (create/forge/release)
//!   and the protocol-number → upper-layer-dissector registry.
//!
//! Malformed traffic is flagged and logged, never fatally rejected: the one
//! unrecoverable condition is a packet too short for a minimal header.
//! Capture, injection and upper-layer protocol dissection are out of scope;
//! the crate only dispatches to upper layers by registered name.

pub mod bits;
pub mod checksum;
pub mod dissect;
pub mod error;
pub mod handle;
pub mod ipv4;
pub mod packet;
pub mod reassembly;

pub use checksum::{checksum_segments, ChecksumPartial};
pub use dissect::{create, dissect as dissect_packet, register_proto_dissector, Dissector};
pub use error::{DissectError, Result};
pub use handle::SharedView;
pub use ipv4::Ipv4View;
pub use packet::Packet;
pub use reassembly::{FlowKey, ReassemblyTable};
