//! A marker for explicit, cheap clones of reference-counted or otherwise
//! trivially-duplicable handles.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
//!
//! `.clone()` is ambiguous at a glance: is it a deep copy or a refcount
//! bump? `.dupe()` is only ever the latter, so call sites that bump an
//! `Arc` or a channel sender read as cheap without checking the type.

use std::sync::Arc;
use tokio::sync::mpsc;

/// Duplicate a cheap, reference-counted handle.
pub trait Dupe {
    /// Returns a new handle to the same underlying resource.
    fn dupe(&self) -> Self;
}

impl<T: ?Sized> Dupe for Arc<T> {
    #[inline]
    fn dupe(&self) -> Self {
        Arc::clone(self)
    }
}

impl<T> Dupe for mpsc::Sender<T> {
    #[inline]
    fn dupe(&self) -> Self {
        self.clone()
    }
}

impl<T> Dupe for mpsc::UnboundedSender<T> {
    #[inline]
    fn dupe(&self) -> Self {
        self.clone()
    }
}
