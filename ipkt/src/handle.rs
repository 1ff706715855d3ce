// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ownership bridge for embedding environments.
//!
//! A scripting engine holding on to packet accessors must never outlive the
//! view's packet. [`SharedView`] wraps a view in reference-counted shared
//! ownership with an invalidation state checked on every access: clones hand
//! out capability-scoped read/write access, and the pipeline calls
//! [`SharedView::invalidate`] to reclaim the owned view before releasing or
//! forging it. Accessors on an invalidated handle fail soft, matching the
//! view's own contract.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use crate::error::DissectError;
use crate::ipv4::Ipv4View;

/// A cloneable, invalidation-checked handle around an [`Ipv4View`].
#[derive(Clone)]
pub struct SharedView {
    inner: Arc<Mutex<Option<Ipv4View>>>,
}

impl SharedView {
    pub fn new(view: Ipv4View) -> Self {
        SharedView {
            inner: Arc::new(Mutex::new(Some(view))),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Ipv4View>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Runs `f` against the wrapped view; `None` once the handle has been
    /// invalidated.
    pub fn with<R>(&self, f: impl FnOnce(&mut Ipv4View) -> R) -> Option<R> {
        let mut slot = self.slot();
        match slot.as_mut() {
            Some(view) => Some(f(view)),
            None => {
                warn!(error = %DissectError::InvalidView, "access through invalidated handle");
                None
            }
        }
    }

    /// Whether the handle still reaches a live view.
    pub fn is_valid(&self) -> bool {
        self.slot().as_ref().is_some_and(|v| v.is_valid())
    }

    /// Revokes every clone of this handle and returns the owned view, if it
    /// had not been reclaimed already. Called by the pipeline before release
    /// or forge.
    pub fn invalidate(&self) -> Option<Ipv4View> {
        self.slot().take()
    }

    // Fail-soft convenience accessors in the view's own idiom, for bindings
    // that only need scalar fields.

    pub fn ttl(&self) -> u8 {
        self.with(|v| v.ttl()).unwrap_or(0)
    }

    pub fn proto(&self) -> u8 {
        self.with(|v| v.proto()).unwrap_or(0)
    }

    pub fn payload_length(&self) -> usize {
        self.with(|v| v.payload_length()).unwrap_or(0)
    }

    pub fn set_ttl(&self, ttl: u8) {
        self.with(|v| v.set_ttl(ttl));
    }
}
