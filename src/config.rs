//! Knobs the dispatcher core owns directly.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later
//!
//! Parsing these out of a config file or CLI is a collaborator's job
//! (out of scope here); this is just the typed shape the
//! collaborator hands the dispatcher.

use crate::failure_detector::FailureDetector;
use std::sync::Arc;
use std::time::Duration;

/// Dispatcher-owned configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// How often the failure detector adapter invokes its probe. Unused
    /// if `failure_detector` is `None`.
    pub ping_interval: Duration,
    /// How long to wait for a PING ACK before a probe counts as a miss.
    /// Unused if `failure_detector` is `None`.
    pub ping_timeout: Duration,
    /// The liveness policy to run against this connection. `None` means
    /// no periodic probing at all: the dispatcher never spontaneously
    /// pings, only in response to an explicit `Dispatcher::ping` call.
    pub failure_detector: Option<Arc<dyn FailureDetector>>,
    /// How many consecutive calls to `register_stream` occur between
    /// sweeps of transient (`LocalReset`/`Failed`) table entries. `None`
    /// disables the sweeper; entries then live for the connection's
    /// lifetime.
    pub reap_interval: Option<u32>,
    /// How many sweep generations a transient entry survives before it is
    /// evicted. Only meaningful when `reap_interval` is `Some`.
    pub reap_threshold: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            failure_detector: None,
            reap_interval: None,
            reap_threshold: 4,
        }
    }
}
