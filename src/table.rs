//! The stream table: a concurrent map from stream id to stream state,
//! plus the monotonic high-water mark of retired ids.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
//!
//! Entries are a sum type rather than a class hierarchy;
//! `Open -> {LocalReset, Failed}` transitions are compare-and-swap-on-
//! equality, reusing the same lock-once-check-then-insert idiom a
//! single-variant slot would use, generalized to three terminal shapes.

use crate::dupe::Dupe;
use crate::frame::{Reason, StreamId};
use crate::handler::StreamHandler;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// One tracked stream's state. Transitions are strictly monotonic:
/// `Open -> {LocalReset, Failed}`, and any terminal state is followed at
/// most once by removal from the table.
#[derive(Debug)]
pub enum StreamEntry {
    /// The stream is alive; inbound frames are delivered to the handler.
    Open(Arc<dyn StreamHandler>),
    /// The local side has already decided the stream is cancelled. Frames
    /// still arriving from the peer are discarded until the peer observes
    /// the RST_STREAM we sent. Carries the sweep generation it was created
    /// in, so the optional reaper knows how long it has lingered.
    LocalReset(u32),
    /// The stream ended with a locally reported error, and the generation
    /// it failed in.
    Failed(String, u32),
}

impl StreamEntry {
    fn is_open(&self) -> bool {
        matches!(self, StreamEntry::Open(_))
    }
}

/// Outcome of attempting to register a new stream id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateStream;

/// The concurrent stream table.
///
/// No entry exists once the handler's terminal callback has run to
/// completion. After [`StreamTable::close_and_drain_open`] is called, no
/// new entries may be inserted.
#[derive(Debug)]
pub struct StreamTable {
    entries: parking_lot::RwLock<HashMap<StreamId, StreamEntry>>,
    high_water: AtomicU32,
    highest_registered: AtomicU32,
    closed: std::sync::atomic::AtomicBool,
    registrations: AtomicU32,
    generation: AtomicU32,
}

impl StreamTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: parking_lot::RwLock::new(HashMap::new()),
            high_water: AtomicU32::new(0),
            highest_registered: AtomicU32::new(0),
            closed: std::sync::atomic::AtomicBool::new(false),
            registrations: AtomicU32::new(0),
            generation: AtomicU32::new(0),
        }
    }

    /// Current number of tracked streams (any state).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the table holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// The largest stream id known to have been retired.
    #[must_use]
    pub fn high_water(&self) -> u32 {
        self.high_water.load(Ordering::Acquire)
    }

    /// The largest stream id ever registered, open or not. Unlike
    /// [`StreamTable::high_water`] (which only advances on retirement),
    /// this counts a stream the moment it is admitted — it is what a
    /// GOAWAY's `last_stream_id` must report, so a peer doesn't conclude a
    /// still-open (or just-opened) stream was never seen and retry it
    /// elsewhere.
    #[must_use]
    pub fn highest_registered(&self) -> u32 {
        self.highest_registered.load(Ordering::Acquire)
    }

    /// Cheap test for "this id has definitely been retired": true when the
    /// id is at or below the high-water mark but no longer has a table
    /// entry. Callers should check `find` first; this alone does not tell
    /// you whether the id was ever registered.
    #[must_use]
    pub fn is_retired(&self, id: StreamId) -> bool {
        id.as_u32() <= self.high_water.load(Ordering::Acquire)
    }

    /// Offer a retired id to the high-water mark. Monotone: the stored
    /// value only ever increases.
    fn bump_high_water(&self, id: StreamId) {
        self.high_water.fetch_max(id.as_u32(), Ordering::AcqRel);
    }

    /// Insert `Open(handler)` at `id`. Fails with [`DuplicateStream`] if
    /// the slot is already occupied or the table has been closed for new
    /// entries.
    pub fn insert(
        &self,
        id: StreamId,
        handler: Arc<dyn StreamHandler>,
    ) -> Result<(), DuplicateStream> {
        if self.closed.load(Ordering::Acquire) {
            warn!(stream_id = %id, "refusing to register stream: connection is closed");
            return Err(DuplicateStream);
        }
        let mut entries = self.entries.write();
        if entries.contains_key(&id) {
            return Err(DuplicateStream);
        }
        entries.insert(id, StreamEntry::Open(handler));
        drop(entries);
        self.highest_registered.fetch_max(id.as_u32(), Ordering::AcqRel);
        self.registrations.fetch_add(1, Ordering::Relaxed);
        debug!(stream_id = %id, "stream registered");
        Ok(())
    }

    /// Look up the handler for an open stream.
    #[must_use]
    pub fn handler(&self, id: StreamId) -> Option<Arc<dyn StreamHandler>> {
        match self.entries.read().get(&id)? {
            StreamEntry::Open(h) => Some(h.dupe()),
            _ => None,
        }
    }

    /// Whether `id` currently has any entry at all.
    #[must_use]
    pub fn contains(&self, id: StreamId) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Attempt `Open(_) -> LocalReset`. Returns `true` if this call
    /// performed the transition (i.e. the entry was still `Open`).
    pub fn transition_local_reset(&self, id: StreamId) -> bool {
        let gen = self.generation.load(Ordering::Acquire);
        let mut entries = self.entries.write();
        match entries.get(&id) {
            Some(e) if e.is_open() => {
                entries.insert(id, StreamEntry::LocalReset(gen));
                true
            }
            _ => false,
        }
    }

    /// Attempt `Open(_) -> Failed(cause)`. Returns `true` if this call
    /// performed the transition.
    pub fn transition_failed(&self, id: StreamId, cause: impl Into<String>) -> bool {
        let gen = self.generation.load(Ordering::Acquire);
        let mut entries = self.entries.write();
        match entries.get(&id) {
            Some(e) if e.is_open() => {
                entries.insert(id, StreamEntry::Failed(cause.into(), gen));
                true
            }
            _ => false,
        }
    }

    /// Remove `id` unconditionally (used for clean completion and remote
    /// reset, where no CAS is needed) and offer it to the high-water
    /// mark.
    pub fn remove(&self, id: StreamId) -> Option<StreamEntry> {
        let removed = self.entries.write().remove(&id);
        if removed.is_some() {
            self.bump_high_water(id);
            trace!(stream_id = %id, "stream entry removed");
        }
        removed
    }

    /// Flip the table closed for new registrations and return the ids and
    /// handlers of every stream that was `Open` at the instant of the
    /// call. Iteration happens exactly once; entries inserted afterward
    /// are impossible (the table is closed first), and concurrent
    /// removals during the snapshot are harmless since no handler is
    /// ever re-inserted as `Open`.
    pub fn close_and_drain_open(&self) -> Vec<(StreamId, Arc<dyn StreamHandler>)> {
        self.closed.store(true, Ordering::Release);
        self.entries
            .read()
            .iter()
            .filter_map(|(id, entry)| match entry {
                StreamEntry::Open(h) => Some((*id, h.dupe())),
                _ => None,
            })
            .collect()
    }

    /// Sweep transient (`LocalReset`/`Failed`) entries older than
    /// `reap_threshold` generations. Only called
    /// when `Config::reap_interval` is configured; `ClosedHighWater` is
    /// unaffected either way since ids are already bumped on removal, not
    /// on sweep.
    pub fn sweep_transient(&self, reap_threshold: u32) {
        let current = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let mut swept_ids = Vec::new();
        let mut entries = self.entries.write();
        entries.retain(|id, e| {
            let born = match e {
                StreamEntry::Open(_) => return true,
                StreamEntry::LocalReset(gen) | StreamEntry::Failed(_, gen) => *gen,
            };
            if current.saturating_sub(born) < reap_threshold {
                true
            } else {
                swept_ids.push(*id);
                false
            }
        });
        drop(entries);
        if !swept_ids.is_empty() {
            for id in &swept_ids {
                self.bump_high_water(*id);
            }
            trace!(swept = swept_ids.len(), "reaped transient stream table entries");
        }
    }

    /// Number of `register_stream` calls observed so far; used to decide
    /// when to run the optional sweeper.
    pub fn registrations(&self) -> u32 {
        self.registrations.load(Ordering::Relaxed)
    }
}

impl Default for StreamTable {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(dead_code)]
pub(crate) const MAX_STREAM_ID: u32 = (1u32 << 31) - 1;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::TerminalOutcome;
    use tokio::sync::oneshot;

    struct Stub {
        rx: parking_lot::Mutex<Option<oneshot::Receiver<TerminalOutcome>>>,
    }

    impl Stub {
        fn new() -> (Arc<dyn StreamHandler>, oneshot::Sender<TerminalOutcome>) {
            let (tx, rx) = oneshot::channel();
            (
                Arc::new(Stub {
                    rx: parking_lot::Mutex::new(Some(rx)),
                }),
                tx,
            )
        }
    }

    impl StreamHandler for Stub {
        fn recv(&self, _frame: crate::frame::Frame) {}
        fn reset(&self, _cause: Reason, _local: bool) {}
        fn on_reset(&self) -> oneshot::Receiver<TerminalOutcome> {
            self.rx.lock().take().expect("on_reset called twice")
        }
    }

    #[test]
    fn duplicate_registration_rejected() {
        let table = StreamTable::new();
        let (h1, _tx1) = Stub::new();
        let (h2, _tx2) = Stub::new();
        let id = StreamId::new(3);
        assert!(table.insert(id, h1).is_ok());
        assert_eq!(table.insert(id, h2), Err(DuplicateStream));
        assert!(table.handler(id).is_some());
    }

    #[test]
    fn highest_registered_tracks_open_streams_too() {
        let table = StreamTable::new();
        let (h, _tx) = Stub::new();
        table.insert(StreamId::new(9), h).unwrap();
        // Still open: `high_water` (retired-only) must not see it, but
        // `highest_registered` must, since GOAWAY needs to report it.
        assert_eq!(table.high_water(), 0);
        assert_eq!(table.highest_registered(), 9);
    }

    #[test]
    fn monotone_high_water() {
        let table = StreamTable::new();
        let (h, _tx) = Stub::new();
        table.insert(StreamId::new(7), h).unwrap();
        table.remove(StreamId::new(7));
        assert_eq!(table.high_water(), 7);
        // Offering a smaller id afterward must not decrease the mark.
        table.bump_high_water(StreamId::new(3));
        assert_eq!(table.high_water(), 7);
    }

    #[test]
    fn local_reset_cas_is_single_shot() {
        let table = StreamTable::new();
        let (h, _tx) = Stub::new();
        let id = StreamId::new(5);
        table.insert(id, h).unwrap();
        assert!(table.transition_local_reset(id));
        // Second attempt finds the entry no longer `Open`.
        assert!(!table.transition_local_reset(id));
        assert!(!table.transition_failed(id, "too late"));
    }

    #[test]
    fn close_and_drain_collects_open_only() {
        let table = StreamTable::new();
        let (h1, _tx1) = Stub::new();
        let (h2, _tx2) = Stub::new();
        table.insert(StreamId::new(1), h1).unwrap();
        table.insert(StreamId::new(3), h2).unwrap();
        table.transition_local_reset(StreamId::new(3));
        let drained = table.close_and_drain_open();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, StreamId::new(1));
        // Closed tables refuse new registrations.
        let (h3, _tx3) = Stub::new();
        assert_eq!(table.insert(StreamId::new(9), h3), Err(DuplicateStream));
    }
}
