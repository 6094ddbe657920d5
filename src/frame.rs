//! The minimal frame vocabulary the dispatcher core reasons about.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
//!
//! Turning bytes into these values is a collaborator's job (the framing
//! codec, a collaborator's job). This module only names the frame
//! kinds the core special-cases: SETTINGS, PING, GOAWAY, RST_STREAM (on
//! emit) and the catch-all `Http2StreamFrame` (on receive, since header
//! block assembly and flow-control accounting both live one layer up).

use std::fmt;

/// A 31-bit HTTP/2 stream identifier. Id 0 is reserved for connection-level
/// frames and is never valid as the key of a registered stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(u32);

impl StreamId {
    /// The connection-level pseudo-stream.
    pub const CONNECTION: StreamId = StreamId(0);

    /// Construct a stream id, masking off the reserved high bit as
    /// RFC 7540 §4.1 specifies.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        StreamId(id & 0x7fff_ffff)
    }

    /// Whether this is the connection-level pseudo-stream (id 0).
    #[must_use]
    pub const fn is_connection(self) -> bool {
        self.0 == 0
    }

    /// The numeric value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for StreamId {
    fn from(id: u32) -> Self {
        StreamId::new(id)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wire error codes, RFC 7540 §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// Graceful/clean termination.
    NoError,
    /// Peer sent something the protocol disallows.
    ProtocolError,
    /// A local failure unrelated to the peer's behavior.
    InternalError,
    /// A frame arrived for a stream id that has definitely been retired.
    StreamClosed,
    /// Wholesale shutdown, or a local reset with no more specific cause.
    Cancel,
}

impl Reason {
    /// The wire value of this error code.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Reason::NoError => 0x0,
            Reason::ProtocolError => 0x1,
            Reason::InternalError => 0x2,
            Reason::StreamClosed => 0x5,
            Reason::Cancel => 0x8,
        }
    }
}

/// A parsed HTTP/2 frame, reduced to what the dispatcher core must branch
/// on. `StreamFrame` stands in for any frame a stream handler would
/// otherwise interpret (HEADERS, DATA, PUSH_PROMISE, WINDOW_UPDATE, ...) —
/// the core never inspects its payload, only its stream id.
#[derive(Debug, Clone)]
pub enum Frame {
    /// A frame belonging to an individual stream; opaque to the core.
    StreamFrame {
        /// The stream this frame is addressed to. Never [`StreamId::CONNECTION`]
        /// for a well-formed frame (enforced by the dispatcher, not here).
        id: StreamId,
        /// Opaque payload, forwarded verbatim to the stream handler.
        payload: StreamPayload,
    },
    /// SETTINGS. Applying it is a collaborator's concern; the core only
    /// needs to know one arrived.
    Settings,
    /// PING. `ack` distinguishes a probe from a response.
    Ping {
        /// Set when this is a response to a PING we sent.
        ack: bool,
        /// The 8-byte opaque payload, echoed back by the peer on ACK.
        payload: [u8; 8],
    },
    /// GOAWAY, announcing the end of the connection.
    GoAway {
        /// Highest stream id the sender promises to still process.
        last_stream_id: StreamId,
        /// Why the peer is going away.
        reason: Reason,
    },
    /// RST_STREAM, received from the peer for one of our streams.
    Reset {
        /// The stream being reset.
        id: StreamId,
        /// Why.
        reason: Reason,
    },
    /// Any frame kind the core does not special-case (and does not
    /// recognize as a stream frame). Receiving one outside tests is a
    /// protocol error.
    Other,
}

/// Opaque stand-in for a stream-level frame's contents. The dispatcher
/// never looks inside; it exists only so `Frame::StreamFrame` has
/// something concrete to carry in tests and examples without depending on
/// header-block assembly, which lives outside this crate.
#[derive(Debug, Clone, Default)]
pub struct StreamPayload {
    /// Whether this frame ends the stream on the sending side.
    pub end_of_stream: bool,
    /// Raw bytes, uninterpreted.
    pub bytes: bytes::Bytes,
}
