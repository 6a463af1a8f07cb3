//! Randomized, rate-limited bootstrap of both peers.
//!
//! Each attempt samples a handful of nodes without replacement and asks every
//! peer to bootstrap through them. Node failures are expected on a public
//! network and are only logged.

use std::time::{Duration, Instant};

use duet_core::BootstrapNode;
use rand::{SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha8Rng;

use crate::{
    config::{HarnessConfig, NetworkMode},
    peer::PeerHandle,
};

/// What one [`BootstrapCoordinator::attempt`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptReport {
    /// Node calls made, summed over peers
    pub attempted: usize,
    /// Node calls the engine rejected
    pub failed: usize,
    /// The attempt was skipped (rate limit, or everyone connected)
    pub skipped: bool,
}

impl AttemptReport {
    fn skipped() -> Self {
        Self { skipped: true, ..Self::default() }
    }
}

/// Candidate nodes plus the sampling and rate-limit state.
#[derive(Debug)]
pub struct BootstrapCoordinator {
    udp: Vec<BootstrapNode>,
    tcp: Vec<BootstrapNode>,
    per_attempt: usize,
    min_interval: Duration,
    mode: NetworkMode,
    proxy: bool,
    rng: ChaCha8Rng,
    last_attempt: Option<Instant>,
}

impl BootstrapCoordinator {
    /// Coordinator over `nodes`, split by protocol.
    pub fn new(nodes: &[BootstrapNode], per_attempt: usize, seed: Option<u64>) -> Self {
        let (tcp, udp): (Vec<_>, Vec<_>) = nodes.iter().cloned().partition(BootstrapNode::is_relay);
        let seed = seed.unwrap_or_else(rand::random);
        Self {
            udp,
            tcp,
            per_attempt,
            min_interval: Duration::ZERO,
            mode: NetworkMode::Public,
            proxy: false,
            rng: ChaCha8Rng::seed_from_u64(seed),
            last_attempt: None,
        }
    }

    /// Coordinator configured from `config`.
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(&config.nodes, config.bootstrap_per_attempt, config.seed)
            .with_min_interval(config.bootstrap_min_interval())
            .with_mode(config.network)
            .with_proxy(config.engine.proxy.is_some())
    }

    /// Skip attempts closer together than `interval`.
    #[must_use]
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Public sampling or local unsampled bootstrap.
    #[must_use]
    pub fn with_mode(mut self, mode: NetworkMode) -> Self {
        self.mode = mode;
        self
    }

    /// Also register TCP relays on every attempt.
    #[must_use]
    pub fn with_proxy(mut self, proxy: bool) -> Self {
        self.proxy = proxy;
        self
    }

    /// Number of candidate nodes.
    pub fn node_count(&self) -> usize {
        self.udp.len() + self.tcp.len()
    }

    /// Bootstrap `peers` through a fresh sample of nodes.
    ///
    /// No-op when rate limited or when every peer is already connected.
    #[allow(clippy::disallowed_methods)]
    pub fn attempt(&mut self, peers: &[&PeerHandle]) -> AttemptReport {
        let now = Instant::now();
        if let Some(last) = self.last_attempt
            && now.duration_since(last) < self.min_interval
        {
            tracing::trace!("bootstrap rate limited");
            return AttemptReport::skipped();
        }
        self.last_attempt = Some(now);

        if peers.iter().all(|p| p.self_connection_status().is_connected()) {
            tracing::debug!("all peers connected, skipping bootstrap");
            return AttemptReport::skipped();
        }

        let (udp, tcp) = self.sample();
        let mut report = AttemptReport::default();

        for peer in peers {
            peer.with_engine(|engine| {
                for node in &udp {
                    report.attempted += 1;
                    if let Err(err) = engine.bootstrap(node) {
                        report.failed += 1;
                        tracing::warn!(peer = %peer.name(), %node, error = %err, "bootstrap failed");
                    }
                }
                for node in &tcp {
                    report.attempted += 1;
                    if let Err(err) = engine.add_tcp_relay(node) {
                        report.failed += 1;
                        tracing::warn!(peer = %peer.name(), %node, error = %err, "add_tcp_relay failed");
                    }
                }
            });
        }

        tracing::debug!(attempted = report.attempted, failed = report.failed, "bootstrap attempt");
        report
    }

    fn sample(&mut self) -> (Vec<BootstrapNode>, Vec<BootstrapNode>) {
        if self.mode == NetworkMode::Local {
            return (self.udp.clone(), Vec::new());
        }

        let udp: Vec<_> =
            self.udp.choose_multiple(&mut self.rng, self.per_attempt).cloned().collect();
        let tcp = if self.proxy {
            self.tcp.choose_multiple(&mut self.rng, self.per_attempt).cloned().collect()
        } else {
            Vec::new()
        };
        (udp, tcp)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn udp_nodes(n: u16) -> Vec<BootstrapNode> {
        (0..n).map(|i| BootstrapNode::udp(format!("10.0.0.{i}"), 33445)).collect()
    }

    #[test]
    fn sample_is_without_replacement_and_bounded() {
        let mut coordinator = BootstrapCoordinator::new(&udp_nodes(20), 8, Some(7));
        for _ in 0..10 {
            let (udp, tcp) = coordinator.sample();
            assert_eq!(udp.len(), 8);
            assert!(tcp.is_empty());
            let unique: HashSet<_> = udp.iter().map(|n| n.host.clone()).collect();
            assert_eq!(unique.len(), 8);
        }
    }

    #[test]
    fn small_lists_are_used_whole() {
        let mut coordinator = BootstrapCoordinator::new(&udp_nodes(3), 8, Some(1));
        assert_eq!(coordinator.sample().0.len(), 3);
    }

    #[test]
    fn same_seed_same_sample() {
        let mut a = BootstrapCoordinator::new(&udp_nodes(30), 8, Some(42));
        let mut b = BootstrapCoordinator::new(&udp_nodes(30), 8, Some(42));
        assert_eq!(a.sample(), b.sample());
    }

    #[test]
    fn proxy_mode_samples_relays() {
        let mut nodes = udp_nodes(4);
        nodes.push(BootstrapNode::tcp("relay.example", 443));
        let mut coordinator = BootstrapCoordinator::new(&nodes, 8, Some(3)).with_proxy(true);

        let (udp, tcp) = coordinator.sample();
        assert_eq!(udp.len(), 4);
        assert_eq!(tcp.len(), 1);
    }

    #[test]
    fn local_mode_uses_every_udp_node() {
        let mut coordinator =
            BootstrapCoordinator::new(&udp_nodes(12), 2, Some(3)).with_mode(NetworkMode::Local);
        assert_eq!(coordinator.sample().0, udp_nodes(12));
    }
}
