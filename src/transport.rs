//! The transport collaborator: the single reader/writer of raw frames.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use crate::error::DispatchError;
use crate::frame::Frame;
use async_trait::async_trait;
use tokio::sync::Notify;

/// A cloneable signal that fires once the transport has died, for any
/// reason. Backed by a `tokio::sync::Notify` rather than a oneshot so
/// every interested party can await it independently without consuming a
/// shared receiver.
#[derive(Debug, Clone)]
pub struct CloseSignal(std::sync::Arc<Notify>);

impl CloseSignal {
    /// A signal that has not yet fired.
    #[must_use]
    pub fn new() -> Self {
        Self(std::sync::Arc::new(Notify::new()))
    }

    /// Fire the signal, waking every waiter.
    pub fn fire(&self) {
        self.0.notify_waiters();
    }

    /// Wait for the signal to fire.
    pub async fn wait(&self) {
        self.0.notified().await;
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// The raw HTTP/2 transport: an at-most-one-concurrent-reader frame
/// source and sink, with an optional executor for off-loop work.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Read the next frame. `Ok(None)` means the peer closed the
    /// channel cleanly (EOF); `Err(DispatchError::NonHttp2Frame)` means a
    /// frame that isn't HTTP/2 at all was observed. At most one call is
    /// ever in flight, and the dispatcher is the only caller.
    async fn read(&mut self) -> Result<Option<Frame>, DispatchError>;

    /// Write a frame.
    async fn write(&mut self, frame: Frame) -> Result<(), DispatchError>;

    /// An executor to offload PING scheduling onto, if the transport has
    /// one. `None` means "dispatch on the caller's task" is unsafe here,
    /// so the ping coordinator self-neuters instead of risking a deadlock.
    fn executor(&self) -> Option<tokio::runtime::Handle> {
        tokio::runtime::Handle::try_current().ok()
    }

    /// A signal that fires when the transport dies, for any reason.
    fn closed(&self) -> CloseSignal;
}
