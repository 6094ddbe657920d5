//! The demultiplexer loop and shutdown coordinator: the two halves that
//! tie every other component in this crate together into a connection.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
//!
//! `Dispatcher::run` is the read loop; `reset_streams` and `go_away` are
//! the shutdown coordinator. One coroutine owns the read side end-to-end,
//! while teardown is a function any other path (a dropped handler, a
//! failed probe, a peer GOAWAY) can call into safely because it is
//! gated by a single-shot flag.

use crate::config::Config;
use crate::dupe::Dupe;
use crate::error::DispatchError;
use crate::failure_detector::{FailureDetectorAdapter, Probe};
use crate::frame::{Frame, Reason, StreamId};
use crate::handler::{NewStreamAdmission, StreamHandler, TerminalOutcome};
use crate::ping::PingCoordinator;
use crate::table::StreamTable;
use crate::transport::Transport;
use crate::writer::Writer;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// The shared dispatcher state for one HTTP/2 connection.
///
/// Generic over `N`, the subclass-provided policy for admitting new
/// stream ids (deciding that policy is entirely the subclass's job). The
/// transport itself is not a field: only the task running [`Dispatcher::run`]
/// owns it, which is what lets the read loop use `&mut self` on the
/// transport without any synchronization.
pub struct Dispatcher<N> {
    writer: Arc<dyn Writer>,
    table: Arc<StreamTable>,
    ping_coordinator: Arc<PingCoordinator>,
    admission: Arc<N>,
    closed: AtomicBool,
    config: Config,
    /// The transport's own executor, captured once [`Dispatcher::run`]
    /// starts. `None` until then, and whenever the transport reports none
    /// of its own.
    executor: Mutex<Option<tokio::runtime::Handle>>,
}

impl<N> std::fmt::Debug for Dispatcher<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("active_streams", &self.table.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<N> Dispatcher<N>
where
    N: NewStreamAdmission + 'static,
{
    /// Build a dispatcher around `writer` and `admission`, ready to drive
    /// a transport via [`Dispatcher::run`].
    #[must_use]
    pub fn new(writer: Arc<dyn Writer>, admission: Arc<N>, config: Config) -> Arc<Self> {
        Arc::new(Self {
            writer,
            table: Arc::new(StreamTable::new()),
            ping_coordinator: Arc::new(PingCoordinator::new()),
            admission,
            closed: AtomicBool::new(false),
            config,
            executor: Mutex::new(None),
        })
    }

    /// Current number of tracked streams (any state).
    #[must_use]
    pub fn active_streams(&self) -> usize {
        self.table.len()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ===== Stream Table and Registration =====

    /// Register a newly admitted stream id with its handler. Fails with
    /// [`DispatchError::DuplicateStream`] if the id is already registered
    /// or the connection has begun shutting down.
    #[tracing::instrument(skip(self, handler), level = "debug")]
    pub async fn register_stream(
        self: &Arc<Self>,
        id: StreamId,
        handler: Arc<dyn StreamHandler>,
    ) -> Result<(), DispatchError> {
        self.table
            .insert(id, handler.dupe())
            .map_err(|_| DispatchError::DuplicateStream(id))?;
        let on_reset = handler.on_reset();

        let this = self.dupe();
        tokio::spawn(async move {
            this.await_terminal(id, on_reset).await;
        });

        if let Some(interval) = self.config.reap_interval {
            if interval > 0 && self.table.registrations() % interval == 0 {
                self.table.sweep_transient(self.config.reap_threshold);
            }
        }

        Ok(())
    }

    /// Await a stream handler's single-shot terminal signal and reconcile
    /// the table.
    async fn await_terminal(
        &self,
        id: StreamId,
        on_reset: tokio::sync::oneshot::Receiver<TerminalOutcome>,
    ) {
        let outcome = match on_reset.await {
            Ok(outcome) => outcome,
            // The handler was dropped without reporting a terminal
            // outcome. Nothing to reconcile: the entry stays until
            // connection teardown or a sweep evicts it.
            Err(_) => return,
        };
        self.complete_stream(id, outcome).await;
    }

    async fn complete_stream(&self, id: StreamId, outcome: TerminalOutcome) {
        match outcome {
            TerminalOutcome::Ok => {
                self.table.remove(id);
            }
            TerminalOutcome::RemoteReset(_) => {
                // The peer already reset the stream; no outbound RST.
                self.table.remove(id);
            }
            TerminalOutcome::LocalReset(cause) => {
                if self.table.transition_local_reset(id) && !self.is_closed() {
                    let code = normalize_local_cause(cause);
                    if let Err(err) = self.writer.reset(id, code).await {
                        warn!(stream_id = %id, %err, "failed to send RST_STREAM for local reset");
                    }
                }
            }
            TerminalOutcome::Other(err) => {
                if self.table.transition_failed(id, err) && !self.is_closed() {
                    if let Err(err) = self.writer.reset(id, Reason::InternalError).await {
                        warn!(stream_id = %id, %err, "failed to send RST_STREAM for handler error");
                    }
                }
            }
        }
    }

    // ===== Ping Coordinator =====

    /// Issue a PING, dispatched onto the transport's own executor if
    /// [`Dispatcher::run`] has captured one. Before `run` starts (or if
    /// the transport reports none), this degrades to the
    /// immediately-satisfied no-executor case.
    pub async fn ping(self: &Arc<Self>) -> Result<(), DispatchError> {
        let executor = self.executor.lock().clone();
        self.ping_coordinator
            .ping(executor, self.writer.dupe())
            .await
    }

    // ===== Subclass-facing passthroughs =====

    /// Send a SETTINGS frame.
    pub async fn write_settings(&self) -> Result<(), DispatchError> {
        self.writer.write_settings().await
    }

    /// The hook a subclass invokes when it observes the transport dying
    /// outside the read loop (e.g. a half-close detected elsewhere).
    /// Idempotent: only the first caller (loop-internal or external) does
    /// any work.
    pub async fn on_transport_close(&self) {
        debug!("transport close observed; tearing down connection");
        self.reset_streams(Reason::Cancel);
    }

    // ===== Shutdown Coordinator =====

    /// Single-shot connection teardown: resets every currently open
    /// stream with `cause` and `local=false`. Returns `true` if this call
    /// performed the flip (i.e. is responsible for the teardown), `false`
    /// if shutdown was already underway.
    pub fn reset_streams(&self, cause: Reason) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let open = self.table.close_and_drain_open();
        debug!(count = open.len(), ?cause, "resetting open streams for shutdown");
        for (id, handler) in open {
            trace!(stream_id = %id, "wholesale reset");
            handler.reset(cause, false);
        }
        true
    }

    /// Tear the connection down and notify the peer. Always resets
    /// streams with [`Reason::Cancel`] regardless of `reason`, which is
    /// only the code reported to the peer in the GOAWAY frame itself.
    pub async fn go_away(&self, reason: Reason, last_stream_id: StreamId) -> Result<(), DispatchError> {
        if self.reset_streams(Reason::Cancel) {
            self.writer.go_away(reason, last_stream_id).await
        } else {
            Ok(())
        }
    }

    // ===== Demultiplexer Loop =====

    /// Drive `transport` until the connection ends, cleanly or
    /// otherwise. The dispatcher is the transport's sole reader: this
    /// function does not issue the next read until the current frame has
    /// been fully routed.
    #[tracing::instrument(skip_all)]
    pub async fn run<T: Transport>(self: Arc<Self>, mut transport: T) -> Result<(), DispatchError> {
        *self.executor.lock() = transport.executor();

        let close_signal = transport.closed();
        {
            let this = self.dupe();
            let signal = close_signal.clone();
            tokio::spawn(async move {
                signal.wait().await;
                this.on_transport_close().await;
            });
        }

        if let Some(detector) = self.config.failure_detector.clone() {
            let probe = DispatcherProbe {
                dispatcher: self.dupe(),
                timeout: self.config.ping_timeout,
            };
            let adapter = FailureDetectorAdapter::new(detector, self.config.ping_interval);
            let this = self.dupe();
            tokio::spawn(async move {
                adapter
                    .run(probe, || async move {
                        warn!("failure detector declared connection dead");
                        let last = last_stream_id(&this.table);
                        let _ = this.go_away(Reason::InternalError, last).await;
                    })
                    .await;
            });
        }

        loop {
            match transport.read().await {
                Err(err) if self.is_closed() => {
                    return Err(err);
                }
                Err(DispatchError::NonHttp2Frame) => {
                    debug!("non-HTTP/2 frame observed; closing without GOAWAY");
                    return Ok(());
                }
                Err(err) => {
                    error!(%err, "transport read failed");
                    let last = last_stream_id(&self.table);
                    let _ = self.go_away(Reason::InternalError, last).await;
                    return Err(err);
                }
                Ok(None) => {
                    if self.table.is_empty() {
                        debug!("transport closed by peer with no active streams");
                        return Ok(());
                    }
                    error!("transport closed by peer while streams were still active");
                    let last = last_stream_id(&self.table);
                    let _ = self.go_away(Reason::InternalError, last).await;
                    return Err(DispatchError::Transport(Box::new(UnexpectedClose)));
                }
                Ok(Some(frame)) => {
                    if let Some(result) = self.route_frame(frame, last_stream_id(&self.table)).await {
                        return result;
                    }
                }
            }
        }
    }

    async fn route_frame(
        &self,
        frame: Frame,
        last_stream_id: StreamId,
    ) -> Option<Result<(), DispatchError>> {
        match frame {
            Frame::GoAway { .. } => {
                let we_were_first = self.reset_streams(Reason::Cancel);
                if we_were_first {
                    debug!("peer GOAWAY observed; shutting down");
                    Some(Ok(()))
                } else {
                    trace!("peer GOAWAY observed after shutdown already in progress");
                    None
                }
            }
            Frame::Settings => None,
            Frame::Ping { ack: true, .. } => {
                self.ping_coordinator.recv_ack();
                None
            }
            Frame::Ping { ack: false, .. } => {
                // Echoing a non-ACK PING is a lower-level frame handler's
                // concern; this crate only consumes ACKs.
                None
            }
            Frame::StreamFrame { id, .. } => self.route_stream_frame(id, frame, last_stream_id).await,
            Frame::Reset { id, .. } => self.route_stream_frame(id, frame, last_stream_id).await,
            Frame::Other => {
                warn!("unrecognized frame kind; protocol error");
                let _ = self.go_away(Reason::ProtocolError, last_stream_id).await;
                Some(Err(DispatchError::Protocol(Reason::ProtocolError)))
            }
        }
    }

    async fn route_stream_frame(
        &self,
        id: StreamId,
        frame: Frame,
        last_stream_id: StreamId,
    ) -> Option<Result<(), DispatchError>> {
        if id.is_connection() {
            warn!("stream-addressed frame on stream 0; protocol error");
            let _ = self.go_away(Reason::ProtocolError, last_stream_id).await;
            return Some(Err(DispatchError::Protocol(Reason::ProtocolError)));
        }

        if let Some(handler) = self.table.handler(id) {
            handler.recv(frame);
            return None;
        }

        if self.table.contains(id) {
            trace!(stream_id = %id, "discarding frame for locally-terminated stream");
            return None;
        }

        if self.table.is_retired(id) {
            if !self.is_closed() {
                if let Err(err) = self.writer.reset(id, Reason::StreamClosed).await {
                    warn!(stream_id = %id, %err, "failed to send RST_STREAM for late frame");
                }
            }
            return None;
        }

        trace!(stream_id = %id, "admitting new stream");
        self.admission.demux_new_stream(frame);
        None
    }
}

fn last_stream_id(table: &StreamTable) -> StreamId {
    StreamId::new(table.highest_registered())
}

/// Adapts [`Dispatcher::ping`] to the [`Probe`] interface the failure
/// detector drives: answered within `timeout` counts as alive, anything
/// else (a write failure, an outstanding ping, or simply no ACK in time)
/// counts as a miss.
struct DispatcherProbe<N> {
    dispatcher: Arc<Dispatcher<N>>,
    timeout: std::time::Duration,
}

#[async_trait]
impl<N> Probe for DispatcherProbe<N>
where
    N: NewStreamAdmission + 'static,
{
    async fn probe(&self) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, self.dispatcher.ping()).await,
            Ok(Ok(()))
        )
    }
}

/// Translate a handler-reported local-reset cause to the wire code sent
/// in RST_STREAM: anything other than an already-specific code collapses
/// to Cancel.
fn normalize_local_cause(cause: Reason) -> Reason {
    match cause {
        Reason::ProtocolError | Reason::InternalError | Reason::StreamClosed | Reason::Cancel => {
            cause
        }
        Reason::NoError => Reason::Cancel,
    }
}

#[derive(Debug)]
struct UnexpectedClose;
impl std::fmt::Display for UnexpectedClose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("transport closed by peer while streams were still active")
    }
}
impl std::error::Error for UnexpectedClose {}
