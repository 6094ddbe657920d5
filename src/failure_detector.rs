//! Pluggable liveness monitor, driven by periodic probes through the
//! ping coordinator.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// What a probe round concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The connection still looks alive.
    Alive,
    /// The connection should be considered dead.
    Dead,
}

/// A type that can issue a single probe and report whether it succeeded.
/// Implemented by whatever wraps [`crate::ping::PingCoordinator::ping`]
/// for a particular connection.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Issue one probe, returning whether it was answered.
    async fn probe(&self) -> bool;
}

/// A pluggable liveness detector. Given `probe` as its probe and the
/// stats scope `"failure_detector"` (left to the concrete implementation
/// to record against, since metrics backends are out of scope here).
#[async_trait]
pub trait FailureDetector: Send + Sync {
    /// Run one detection round against `probe`, returning a verdict.
    async fn tick(&self, probe: &dyn Probe) -> Verdict;
}

impl std::fmt::Debug for dyn FailureDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn FailureDetector")
    }
}

/// The default detector: never declares failure. Used when no detector
/// configuration is supplied.
#[derive(Debug, Default)]
pub struct NullDetector;

#[async_trait]
impl FailureDetector for NullDetector {
    async fn tick(&self, _probe: &dyn Probe) -> Verdict {
        Verdict::Alive
    }
}

/// Declares the connection dead after `threshold` consecutive failed
/// probes. A minimal, concrete detector so the adapter has something real
/// to exercise beyond [`NullDetector`]; pluggability is the only hard
/// requirement here, this is just a reasonable concrete default.
#[derive(Debug)]
pub struct ConsecutiveMissDetector {
    threshold: u32,
    misses: AtomicU32,
}

impl ConsecutiveMissDetector {
    /// Build a detector that gives up after `threshold` consecutive
    /// unanswered probes.
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            misses: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl FailureDetector for ConsecutiveMissDetector {
    async fn tick(&self, probe: &dyn Probe) -> Verdict {
        if probe.probe().await {
            self.misses.store(0, Ordering::Relaxed);
            trace!("liveness probe answered");
            Verdict::Alive
        } else {
            let misses = self.misses.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(misses, threshold = self.threshold, "liveness probe missed");
            if misses >= self.threshold {
                Verdict::Dead
            } else {
                Verdict::Alive
            }
        }
    }
}


/// Drives a [`FailureDetector`] on a fixed interval, invoking a
/// caller-supplied callback when it declares the connection dead. The
/// callback is expected to be `Dispatcher::go_away(InternalError)`.
pub struct FailureDetectorAdapter {
    detector: Arc<dyn FailureDetector>,
    interval: Duration,
}

impl FailureDetectorAdapter {
    /// Build an adapter around `detector`, ticking every `interval`.
    #[must_use]
    pub fn new(detector: Arc<dyn FailureDetector>, interval: Duration) -> Self {
        Self { detector, interval }
    }

    /// An adapter using [`NullDetector`]: never declares failure.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Arc::new(NullDetector), Duration::from_secs(u64::MAX / 2))
    }

    /// Run the detection loop until `probe` or the surrounding task is
    /// dropped, invoking `on_dead` the first time the detector declares
    /// the connection dead. Returns after invoking `on_dead` once; this
    /// function does not loop forever past that point since the
    /// connection is tearing down anyway.
    pub async fn run<P, F, Fut>(&self, probe: P, on_dead: F)
    where
        P: Probe,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.detector.tick(&probe).await {
                Verdict::Alive => continue,
                Verdict::Dead => {
                    on_dead().await;
                    return;
                }
            }
        }
    }
}
