// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy for the dissection core.
//!
//! Only [`DissectError::Truncated`] ever aborts the dissection of a packet.
//! Every other condition is recorded as state on the view (flags) or reported
//! through `tracing` and processing continues: an in-line inspection engine
//! must keep looking at traffic it merely disagrees with.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, DissectError>;

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum DissectError {
    /// The packet cannot hold a minimal 20-byte IPv4 header. Fatal to the
    /// dissection of this one packet.
    #[error("packet too short for an ipv4 header ({available} of {required} bytes captured)")]
    Truncated { required: usize, available: usize },

    /// A header length or total length field is outside its valid bounds.
    /// Non-fatal; flagged on the view and logged.
    #[error("inconsistent ipv4 header field: {reason}")]
    FieldInconsistency { reason: &'static str },

    /// The stored header checksum does not match the recomputed one.
    /// Non-fatal; flagged on the view and logged.
    #[error("ipv4 header checksum mismatch (stored {stored:#06x}, computed {computed:#06x})")]
    ChecksumMismatch { stored: u16, computed: u16 },

    /// An accessor was invoked on a released or unbound view. The accessor
    /// returns a neutral value (get) or does nothing (set).
    #[error("invalid ipv4 view: not bound to a live packet")]
    InvalidView,
}
