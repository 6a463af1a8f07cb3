//! Bounded polling: "wait until this holds, bootstrapping now and then".
//!
//! Every wait runs at most `threshold + 1` rounds. A round optionally
//! re-triggers bootstrap (every `cadence` rounds, starting with the first),
//! evaluates the predicate, and if it does not hold yet advances both peers
//! through `batch` paired iterations. Nothing here blocks without a bound.

use std::thread;

use duet_core::{EngineError, EventKind};

use crate::{
    bootstrap::BootstrapCoordinator,
    capture,
    config::HarnessConfig,
    peer::PeerHandle,
};

/// Round budget, bootstrap cadence and batch size of a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Rounds after the first before giving up
    pub threshold: u32,
    /// Bootstrap when `round % cadence == 0`
    pub cadence: u32,
    /// Paired iterations per round
    pub batch: u32,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::from_config(&HarnessConfig::default())
    }
}

impl WaitPolicy {
    /// Policy for connect and single-peer waits.
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self { threshold: config.threshold, cadence: config.connect_cadence, batch: config.batch }
    }

    /// Policy for waits on every peer at once.
    pub fn all_peers(config: &HarnessConfig) -> Self {
        Self { cadence: config.all_peers_cadence, ..Self::from_config(config) }
    }

    /// Same policy with another threshold.
    #[must_use]
    pub fn with_threshold(self, threshold: u32) -> Self {
        Self { threshold, ..self }
    }

    /// Same policy with another cadence.
    #[must_use]
    pub fn with_cadence(self, cadence: u32) -> Self {
        Self { cadence, ..self }
    }

    /// Same policy with another batch size.
    #[must_use]
    pub fn with_batch(self, batch: u32) -> Self {
        Self { batch, ..self }
    }

    fn bootstraps_at(&self, round: u32) -> bool {
        round % self.cadence.max(1) == 0
    }
}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The predicate held after `rounds` evaluations
    Satisfied {
        /// Predicate evaluations, including the successful one
        rounds: u32,
    },
    /// The predicate never held
    TimedOut {
        /// Predicate evaluations made, `threshold + 1`
        rounds: u32,
    },
}

impl WaitOutcome {
    /// Whether the predicate held.
    pub fn is_satisfied(self) -> bool {
        matches!(self, Self::Satisfied { .. })
    }

    /// Rounds used.
    pub fn rounds(self) -> u32 {
        match self {
            Self::Satisfied { rounds } | Self::TimedOut { rounds } => rounds,
        }
    }
}

/// How a [`ConditionWaiter::retry_call`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// The operation produced a value
    Succeeded(T),
    /// The friend was not connected. Not retried.
    NotConnected(EngineError),
    /// The operation failed with another error. Not retried.
    Failed(EngineError),
    /// The operation kept producing nothing
    TimedOut {
        /// Attempts made
        rounds: u32,
    },
}

/// Polls a condition while pumping both peers.
pub struct ConditionWaiter<'a> {
    alice: PeerHandle,
    bob: PeerHandle,
    bootstrap: Option<&'a mut BootstrapCoordinator>,
    policy: WaitPolicy,
}

impl<'a> ConditionWaiter<'a> {
    /// Waiter over two peers.
    pub fn new(
        alice: &PeerHandle,
        bob: &PeerHandle,
        bootstrap: Option<&'a mut BootstrapCoordinator>,
        policy: WaitPolicy,
    ) -> Self {
        Self { alice: alice.clone(), bob: bob.clone(), bootstrap, policy }
    }

    /// Policy this waiter runs with.
    pub fn policy(&self) -> WaitPolicy {
        self.policy
    }

    /// Replace the policy for subsequent waits.
    pub fn set_policy(&mut self, policy: WaitPolicy) {
        self.policy = policy;
    }

    fn bootstrap_round(&mut self, label: &str, round: u32) {
        if let Some(coordinator) = self.bootstrap.as_deref_mut() {
            coordinator.attempt(&[&self.alice, &self.bob]);
        }
        tracing::debug!(
            label,
            round,
            alice = ?self.alice.self_connection_status(),
            bob = ?self.bob.self_connection_status(),
            "wait round"
        );
    }

    /// Advance both peers through one batch of paired iterations.
    pub fn run_batch(&self) {
        let interval = self.bob.iteration_interval();
        for _ in 0..self.policy.batch {
            self.alice.iterate();
            self.bob.iterate();
            thread::sleep(interval);
        }
    }

    /// Wait until `predicate` holds.
    ///
    /// Evaluates the predicate exactly once per round, so a timed out wait
    /// has evaluated it `threshold + 1` times.
    pub fn until(&mut self, label: &str, mut predicate: impl FnMut() -> bool) -> WaitOutcome {
        for round in 0..=self.policy.threshold {
            if self.policy.bootstraps_at(round) {
                self.bootstrap_round(label, round);
            }
            if predicate() {
                tracing::debug!(label, rounds = round + 1, "wait satisfied");
                return WaitOutcome::Satisfied { rounds: round + 1 };
            }
            self.run_batch();
        }

        let rounds = self.policy.threshold + 1;
        tracing::error!(label, rounds, "wait timed out");
        WaitOutcome::TimedOut { rounds }
    }

    /// Wait until `kind` is latched on `peer`.
    pub fn until_latch(&mut self, peer: &PeerHandle, kind: EventKind) -> WaitOutcome {
        let label = format!("{} {}", peer.name(), kind.name());
        self.until(&label, || peer.is_raised(kind))
    }

    /// Wait until every one of `kinds` is latched on `peer`.
    pub fn until_latches(&mut self, peer: &PeerHandle, kinds: &[EventKind]) -> WaitOutcome {
        let names: Vec<_> = kinds.iter().map(|k| k.name()).collect();
        let label = format!("{} {}", peer.name(), names.join("+"));
        self.until(&label, || kinds.iter().all(|k| peer.is_raised(*k)))
    }

    /// Wait until `kind` is latched on every one of `peers`.
    pub fn until_latch_on_all(&mut self, peers: &[&PeerHandle], kind: EventKind) -> WaitOutcome {
        let label = format!("all {}", kind.name());
        self.until(&label, || peers.iter().all(|p| p.is_raised(kind)))
    }

    /// Wait until both peers report a connected status.
    ///
    /// The status accessor decides. The connection callback is latched for
    /// the duration of the wait and only cross-checked. A handler already
    /// registered for it keeps firing and stays registered afterwards.
    pub fn until_connected(&mut self) -> WaitOutcome {
        let alice = self.alice.clone();
        let bob = self.bob.clone();
        for peer in [&alice, &bob] {
            peer.reset_latch(EventKind::SelfConnectionStatus);
        }
        let _alice_latch = capture::capture_chained(&alice, EventKind::SelfConnectionStatus);
        let _bob_latch = capture::capture_chained(&bob, EventKind::SelfConnectionStatus);

        let outcome = self.until("connected", || {
            alice.self_connection_status().is_connected() && bob.self_connection_status().is_connected()
        });

        for peer in [&alice, &bob] {
            cross_check_connection(peer);
        }
        outcome
    }

    /// Call `op` each round until it yields a value.
    ///
    /// `Ok(None)` means "not yet" and is retried. A not-connected error or
    /// any other error ends the wait immediately.
    pub fn retry_call<T>(
        &mut self,
        label: &str,
        mut op: impl FnMut() -> Result<Option<T>, EngineError>,
    ) -> RetryOutcome<T> {
        for round in 0..=self.policy.threshold {
            if self.policy.bootstraps_at(round) {
                self.bootstrap_round(label, round);
            }
            match op() {
                Ok(Some(value)) => return RetryOutcome::Succeeded(value),
                Ok(None) => {},
                Err(err) if err.is_not_connected() => {
                    tracing::warn!(label, round, error = %err, "retry_call not connected");
                    return RetryOutcome::NotConnected(err);
                },
                Err(err) => {
                    tracing::warn!(label, round, error = %err, "retry_call failed");
                    return RetryOutcome::Failed(err);
                },
            }
            self.run_batch();
        }

        let rounds = self.policy.threshold + 1;
        tracing::error!(label, rounds, "retry_call timed out");
        RetryOutcome::TimedOut { rounds }
    }
}

fn cross_check_connection(peer: &PeerHandle) {
    let status = peer.self_connection_status();
    match peer.latch(EventKind::SelfConnectionStatus) {
        Some(capture::LatchValue::Connection { status: latched, .. }) => {
            if latched.is_connected() != status.is_connected() {
                tracing::warn!(
                    peer = %peer.name(),
                    ?status,
                    ?latched,
                    "connection callback disagrees with status accessor"
                );
            }
        },
        Some(other) => {
            tracing::warn!(peer = %peer.name(), ?other, "unexpected connection latch value");
        },
        None => {
            tracing::debug!(peer = %peer.name(), ?status, "no connection callback during wait");
        },
    }
}
