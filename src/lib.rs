//! Connection-scoped multiplexing core for an HTTP/2 implementation:
//! demultiplexes inbound frames to per-stream handlers, tracks stream
//! lifecycle, drives PING-based liveness, and coordinates shutdown.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
//!
//! What this crate does *not* do: turn bytes into frames (the framing
//! codec), assemble header blocks, account for flow-control windows, or
//! decide which new streams a client/server may admit. Those all live in
//! collaborator crates that sit on either side of the traits defined
//! here (see [`transport`], [`writer`] and [`handler`]).
#![deny(missing_docs)]

mod config;
mod dispatcher;
mod dupe;
mod error;
mod failure_detector;
mod frame;
mod handler;
mod ping;
mod table;
mod transport;
mod writer;

pub use config::Config;
pub use dispatcher::Dispatcher;
pub use dupe::Dupe;
pub use error::{DispatchError, Result};
pub use failure_detector::{ConsecutiveMissDetector, FailureDetector, FailureDetectorAdapter, NullDetector, Probe, Verdict};
pub use frame::{Frame, Reason, StreamId, StreamPayload};
pub use handler::{NewStreamAdmission, RefusingAdmission, StreamHandler, TerminalOutcome};
pub use transport::{CloseSignal, Transport};
pub use writer::Writer;
