//! At-most-one-outstanding PING, satisfied by an ACK.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
//!
//! The slot is a `parking_lot::Mutex<Option<oneshot::Sender<_>>>`: a
//! lock-guarded single-occupant cell, the same shape as any other
//! at-most-one-outstanding-operation guard in this crate.

use crate::dupe::Dupe;
use crate::error::DispatchError;
use crate::writer::Writer;
use rand::RngCore;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

enum PingOutcome {
    Ack,
    Outstanding,
    WriteFailed(String),
}

/// Coordinates a single outstanding PING and its ACK.
#[derive(Debug, Default)]
pub struct PingCoordinator {
    slot: parking_lot::Mutex<Option<oneshot::Sender<PingOutcome>>>,
}

impl std::fmt::Debug for PingOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PingOutcome")
    }
}

impl PingCoordinator {
    /// A coordinator with no ping outstanding.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: parking_lot::Mutex::new(None),
        }
    }

    /// Issue a PING.
    ///
    /// If `executor` is `None`, the transport has no separately
    /// schedulable executor: issuing a PING from the caller's own task
    /// (the demux loop) would risk deadlocking liveness, so this
    /// immediately returns satisfied — a conservative degradation that
    /// makes the failure detector see "alive".
    ///
    /// Otherwise the actual send is dispatched onto `executor`, so the
    /// caller never blocks here waiting on the write. Exactly one ping
    /// may be outstanding at a time; a second caller receives
    /// [`DispatchError::OutstandingPing`] without disturbing the first.
    pub async fn ping(
        self: &Arc<Self>,
        executor: Option<tokio::runtime::Handle>,
        writer: Arc<dyn Writer>,
    ) -> Result<(), DispatchError> {
        let Some(handle) = executor else {
            debug!("no executor available; treating ping as immediately satisfied");
            return Ok(());
        };

        let (tx, rx) = oneshot::channel();
        let this = self.dupe();
        handle.spawn(async move {
            // Claim the slot inside a block so the lock guard is dropped
            // before any `.await` below; `tx` comes back out un-sent if
            // another ping already occupies the slot.
            let unclaimed_tx = {
                let mut guard = this.slot.lock();
                if guard.is_none() {
                    *guard = Some(tx);
                    None
                } else {
                    Some(tx)
                }
            };

            let Some(tx) = unclaimed_tx else {
                let mut payload = [0u8; 8];
                rand::rng().fill_bytes(&mut payload);
                trace!("sending PING");
                if let Err(err) = writer.send_ping(payload).await {
                    warn!(%err, "failed to send PING");
                    if let Some(tx) = this.slot.lock().take() {
                        let _ = tx.send(PingOutcome::WriteFailed(err.to_string()));
                    }
                }
                return;
            };
            let _ = tx.send(PingOutcome::Outstanding);
        });

        match rx.await {
            Ok(PingOutcome::Ack) => Ok(()),
            Ok(PingOutcome::Outstanding) => Err(DispatchError::OutstandingPing),
            Ok(PingOutcome::WriteFailed(msg)) => Err(DispatchError::transport(SendPingFailed(msg))),
            // The spawned task was dropped before completing the channel;
            // only happens if the executor itself is shutting down.
            Err(_) => Err(DispatchError::Closed),
        }
    }

    /// Handle an inbound PING with the ACK flag set: atomically take the
    /// slot and, if it held a waiting sender, satisfy it.
    pub fn recv_ack(&self) {
        if let Some(tx) = self.slot.lock().take() {
            debug!("PING ACK received; satisfying outstanding ping");
            let _ = tx.send(PingOutcome::Ack);
        } else {
            trace!("PING ACK received with no outstanding ping");
        }
    }

    /// Whether a ping is currently outstanding.
    #[must_use]
    pub fn is_outstanding(&self) -> bool {
        self.slot.lock().is_some()
    }
}

#[derive(Debug)]
struct SendPingFailed(String);
impl std::fmt::Display for SendPingFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for SendPingFailed {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Reason, StreamId};
    use async_trait::async_trait;

    #[derive(Debug, Default)]
    struct RecordingWriter {
        pings_sent: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl Writer for RecordingWriter {
        async fn send_ping(&self, _payload: [u8; 8]) -> Result<(), DispatchError> {
            self.pings_sent.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            Ok(())
        }
        async fn reset(&self, _stream: StreamId, _reason: Reason) -> Result<(), DispatchError> {
            Ok(())
        }
        async fn go_away(&self, _reason: Reason, _last_stream_id: StreamId) -> Result<(), DispatchError> {
            Ok(())
        }
        async fn write_settings(&self) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn no_executor_is_immediately_satisfied() {
        let coordinator = Arc::new(PingCoordinator::new());
        let writer: Arc<dyn Writer> = Arc::new(RecordingWriter::default());
        assert!(coordinator.ping(None, writer.dupe()).await.is_ok());
        assert!(!coordinator.is_outstanding());
    }

    #[tokio::test]
    async fn ack_with_nothing_outstanding_is_a_no_op() {
        let coordinator = PingCoordinator::new();
        coordinator.recv_ack();
        assert!(!coordinator.is_outstanding());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn at_most_one_ping_outstanding() {
        let coordinator = Arc::new(PingCoordinator::new());
        let writer: Arc<dyn Writer> = Arc::new(RecordingWriter::default());
        let handle = tokio::runtime::Handle::current();

        let first = tokio::spawn({
            let coordinator = coordinator.dupe();
            let writer = writer.dupe();
            let handle = handle.clone();
            async move { coordinator.ping(Some(handle), writer).await }
        });

        // Wait for the spawned task to actually claim the slot before
        // issuing the second, racing ping.
        for _ in 0..10_000 {
            if coordinator.is_outstanding() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(coordinator.is_outstanding(), "first ping never claimed the slot");

        let second = coordinator.ping(Some(handle), writer.dupe()).await;
        assert!(matches!(second, Err(DispatchError::OutstandingPing)));

        coordinator.recv_ack();
        assert!(first.await.unwrap().is_ok());
    }
}
