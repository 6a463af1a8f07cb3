//! In-process simulated network and engine.
//!
//! The harness is written against the opaque [`ProtocolEngine`] trait; this
//! module provides an implementation that lives entirely in memory so the
//! orchestration machinery can be exercised without a real network. It honors
//! the engine contracts (non-blocking operations, events only through
//! `iterate`, stable friend ids) and adds seeded latency and loss.
//!
//! It is not a protocol implementation. Keys are random bytes, there is no
//! cryptography, and packets are queued values.
//!
//! [`ProtocolEngine`]: duet_core::ProtocolEngine

mod engine;
mod env;
mod network;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use engine::SimEngine;
pub use env::SimEnv;
pub use network::SimNetwork;

/// Tunables of a simulated network.
///
/// Latencies, delays and timeouts are counted in iterations of the engine
/// that observes them, not in wall-clock time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seed for latency, loss and identities
    pub seed: u64,
    /// Interval every engine advertises to its driver
    pub iteration_interval_ms: u64,
    /// Fewest recipient iterations a packet spends in flight
    pub latency_min: u32,
    /// Most recipient iterations a packet spends in flight
    pub latency_max: u32,
    /// Chance that a handshake packet is lost
    pub loss_rate: f64,
    /// Iterations between reaching a live node and being connected
    pub join_delay: u32,
    /// Largest chunk a transfer requests
    pub chunk_size: usize,
    /// Iterations between keepalives to each friend
    pub keepalive: u32,
    /// Iterations of silence before a friend is considered offline
    pub timeout: u32,
    /// Iterations between resends of an unanswered friend request
    pub request_resend: u32,
    /// Outstanding chunk requests per transfer
    pub chunks_per_iterate: usize,
    /// Bootstrap nodes that answer
    pub live_nodes: usize,
    /// Bootstrap nodes that never answer
    pub dead_nodes: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            iteration_interval_ms: 50,
            latency_min: 1,
            latency_max: 4,
            loss_rate: 0.0,
            join_delay: 5,
            chunk_size: 1371,
            keepalive: 20,
            timeout: 3000,
            request_resend: 40,
            chunks_per_iterate: 8,
            live_nodes: 4,
            dead_nodes: 2,
        }
    }
}

impl SimConfig {
    /// Short intervals and delays for tests.
    pub fn fast(seed: u64) -> Self {
        Self {
            seed,
            iteration_interval_ms: 1,
            latency_min: 1,
            latency_max: 3,
            join_delay: 2,
            keepalive: 5,
            request_resend: 10,
            chunks_per_iterate: 32,
            ..Self::default()
        }
    }

    /// Same configuration with a packet loss rate.
    #[must_use]
    pub fn with_loss(self, loss_rate: f64) -> Self {
        Self { loss_rate, ..self }
    }

    /// Interval engines advertise.
    pub fn iteration_interval(&self) -> Duration {
        Duration::from_millis(self.iteration_interval_ms)
    }
}
