//! Dispatcher error taxonomy.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use crate::frame::{Reason, StreamId};
use thiserror::Error;

/// Errors surfaced by the dispatcher core.
///
/// Stream-level resets are *not* represented here: they are recorded in
/// the stream table and delivered to the affected handler, never raised
/// to the connection.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The peer (or we) violated the protocol: an unexpected frame kind,
    /// or a stream-addressed frame on stream 0.
    #[error("protocol error: {0:?}")]
    Protocol(Reason),

    /// The transport's `read`/`write` returned an error.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The transport observed a frame that doesn't belong to this
    /// protocol at all (not merely an unexpected frame kind). Closes the
    /// connection without a GOAWAY, since there is no peer to send one to.
    #[error("non-HTTP/2 frame observed on transport")]
    NonHttp2Frame,

    /// The failure detector declared the connection dead.
    #[error("connection failed liveness check")]
    Detector,

    /// `register_stream` was called twice for the same id.
    #[error("stream {0:?} is already registered")]
    DuplicateStream(StreamId),

    /// A `ping()` call arrived while another ping was already in flight.
    #[error("a ping is already outstanding")]
    OutstandingPing,

    /// The connection has already begun shutting down.
    #[error("connection is closed")]
    Closed,
}

impl DispatchError {
    /// Wrap an arbitrary transport error.
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(err))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = DispatchError> = std::result::Result<T, E>;
