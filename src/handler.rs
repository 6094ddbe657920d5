//! The stream-handler collaborator interface.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
//!
//! Frame↔message translation, header assembly and flow control all live
//! on the other side of this trait; the core only ever calls `recv` and
//! `reset`, and awaits the single-shot `on_reset` signal.

use crate::frame::{Frame, Reason};
use std::fmt;
use tokio::sync::oneshot;

/// The outcome a stream handler reports exactly once, through the
/// receiver returned by [`StreamHandler::on_reset`].
#[derive(Debug)]
pub enum TerminalOutcome {
    /// The stream completed without error.
    Ok,
    /// The peer sent RST_STREAM for this stream.
    RemoteReset(Reason),
    /// The local side decided to cancel the stream.
    LocalReset(Reason),
    /// Anything else: a handler-internal error unrelated to protocol
    /// framing.
    Other(String),
}

/// A per-stream handler, owned by the subclass, driven by the dispatcher.
pub trait StreamHandler: Send + Sync {
    /// Deliver an inbound frame addressed to this stream.
    fn recv(&self, frame: Frame);

    /// Wholesale termination, issued during connection shutdown. `local`
    /// is `false` when the dispatcher is tearing the whole connection
    /// down (so the handler must not emit its own RST_STREAM — the
    /// dispatcher already accounted for this stream's fate in the
    /// GOAWAY/close path).
    fn reset(&self, cause: Reason, local: bool);

    /// The single-shot terminal signal. The dispatcher consumes this
    /// exactly once, immediately after registration.
    fn on_reset(&self) -> oneshot::Receiver<TerminalOutcome>;
}

impl fmt::Debug for dyn StreamHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn StreamHandler")
    }
}

/// Implemented by the client/server subclass to admit a newly observed
/// stream id (a HEADERS opening a request on the server side, or a
/// response frame for an outbound request on the client side). Entirely
/// out of scope for the dispatcher core itself — this
/// trait is only the seam the subclass plugs into.
pub trait NewStreamAdmission: Send + Sync {
    /// Admit (or refuse) a stream frame for an id not yet in the table.
    fn demux_new_stream(&self, frame: Frame);
}

/// A `NewStreamAdmission` that refuses every new stream. Exported so test
/// suites (this crate's own and downstream ones) don't need a hand-rolled
/// mock just to construct a `Dispatcher`; real client/server subclasses
/// supply their own admission policy instead.
#[derive(Debug, Default)]
pub struct RefusingAdmission;

impl NewStreamAdmission for RefusingAdmission {
    fn demux_new_stream(&self, _frame: Frame) {}
}
