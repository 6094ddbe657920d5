//! The writer collaborator: typed helpers for outbound control frames.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use crate::error::DispatchError;
use crate::frame::{Reason, StreamId};
use async_trait::async_trait;

/// Outbound frame emission. All methods are fire-and-forget from the
/// dispatcher's point of view: it may await the returned future, but
/// nothing downstream depends on it doing so.
#[async_trait]
pub trait Writer: Send + Sync {
    /// Send a PING frame (not an ACK).
    async fn send_ping(&self, payload: [u8; 8]) -> Result<(), DispatchError>;

    /// Send RST_STREAM for `stream` with the given error code.
    async fn reset(&self, stream: StreamId, reason: Reason) -> Result<(), DispatchError>;

    /// Send GOAWAY, announcing `last_stream_id` as the highest stream the
    /// sender still promises to process.
    async fn go_away(&self, reason: Reason, last_stream_id: StreamId) -> Result<(), DispatchError>;

    /// Send a SETTINGS frame. Exposed for subclasses that need to
    /// (re)announce settings outside of the initial handshake.
    async fn write_settings(&self) -> Result<(), DispatchError>;
}
