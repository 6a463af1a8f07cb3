//! Two-peer session lifecycle.
//!
//! A [`SessionFixture`] creates Alice and Bob from an [`EngineFactory`],
//! starts the background driver on Bob (or on both), owns the bootstrap
//! coordinator, tracks friendships it must undo, and tears everything down
//! in a fixed order: drivers, friendships, handlers, peers.
//!
//! Teardown runs on drop too, so a scenario that bails out with `?` leaves
//! nothing behind except drivers that refused to stop. Those are reported
//! and detached.

use std::{fmt, sync::Arc, thread};

use duet_core::{EngineFactory, EngineOptions, FriendId};

use crate::{
    bootstrap::BootstrapCoordinator,
    config::{HarnessConfig, NetworkMode},
    coverage::{CoverageLog, CoverageReport},
    driver::{IterationDriver, StopOutcome},
    error::HarnessError,
    invariants::{InvariantRegistry, PeerSnapshot, SessionSnapshot, TransferSnapshot, Violations},
    peer::PeerHandle,
    waiter::{ConditionWaiter, WaitPolicy},
};

/// One of the two peers of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// First peer, iterated by the test thread by default
    Alice,
    /// Second peer, always iterated in the background
    Bob,
}

impl Side {
    /// Both sides, Alice first.
    pub const BOTH: [Self; 2] = [Self::Alice, Self::Bob];

    /// The other peer.
    pub fn other(self) -> Self {
        match self {
            Self::Alice => Self::Bob,
            Self::Bob => Self::Alice,
        }
    }

    /// Peer name, also used as the engine name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Alice => "alice",
            Self::Bob => "bob",
        }
    }

    fn of(peer: &PeerHandle) -> Option<Self> {
        Self::BOTH.into_iter().find(|side| side.name() == peer.name())
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What [`SessionFixture::teardown`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Drivers joined
    pub stopped: usize,
    /// Drivers that did not finish in time and were detached
    pub blocked: usize,
    /// Tracked friendships deleted
    pub deleted: usize,
    /// Tracked friendships the engine refused to delete
    pub delete_failed: usize,
    /// Tracked friendships left alone because a blocked driver held the engine
    pub skipped: usize,
}

/// Alice, Bob and everything around them for one scenario.
pub struct SessionFixture {
    factory: Arc<dyn EngineFactory>,
    config: HarnessConfig,
    coverage: CoverageLog,
    invariants: InvariantRegistry,
    alice: Option<PeerHandle>,
    bob: Option<PeerHandle>,
    drivers: Vec<IterationDriver>,
    bootstrap: Option<BootstrapCoordinator>,
    tracked: Vec<(Side, FriendId)>,
    transfers: Vec<TransferSnapshot>,
}

impl SessionFixture {
    /// Fixture building peers from `factory`. Nothing is created until
    /// [`setup`](Self::setup).
    pub fn new(factory: Arc<dyn EngineFactory>, config: HarnessConfig) -> Self {
        Self {
            factory,
            config,
            coverage: CoverageLog::new(),
            invariants: InvariantRegistry::standard(),
            alice: None,
            bob: None,
            drivers: Vec::new(),
            bootstrap: None,
            tracked: Vec::new(),
            transfers: Vec::new(),
        }
    }

    /// Record coverage into a shared log instead of a private one.
    #[must_use]
    pub fn with_coverage_log(mut self, log: CoverageLog) -> Self {
        self.coverage = log;
        self
    }

    /// Configuration the fixture runs with.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Create both peers and start the drivers.
    ///
    /// Returns `false` without doing anything if the fixture is already set
    /// up.
    pub fn setup(&mut self) -> Result<bool, HarnessError> {
        if self.is_set_up() {
            tracing::debug!("session already set up");
            return Ok(false);
        }

        let options = self.config.engine.clone();
        let alice = self.create_peer(Side::Alice, &options)?;
        let bob = self.create_peer(Side::Bob, &options)?;
        self.alice = Some(alice);
        self.bob = Some(bob);

        if self.config.network != NetworkMode::Local && self.config.nodes.is_empty() {
            tracing::warn!("no bootstrap nodes configured, peers may never connect");
        }
        self.bootstrap = Some(BootstrapCoordinator::from_config(&self.config));

        self.start_driver(Side::Bob)?;
        if self.config.drive_both {
            self.start_driver(Side::Alice)?;
        }

        tracing::info!(drive_both = self.config.drive_both, network = ?self.config.network, "session set up");
        Ok(true)
    }

    /// Whether both peers exist.
    pub fn is_set_up(&self) -> bool {
        self.alice.is_some() && self.bob.is_some()
    }

    fn create_peer(&self, side: Side, options: &EngineOptions) -> Result<PeerHandle, HarnessError> {
        let engine = self
            .factory
            .create(side.name(), options)
            .map_err(|source| HarnessError::EngineCreation { peer: side.name().to_owned(), source })?;
        Ok(PeerHandle::new(side.name(), engine, self.coverage.clone()))
    }

    fn start_driver(&mut self, side: Side) -> Result<(), HarnessError> {
        let peer = self.peer(side)?.clone();
        self.drivers.push(IterationDriver::start(&peer)?);
        Ok(())
    }

    /// Stop the driver of `side`, if it has one.
    fn stop_driver(&mut self, side: Side) -> Option<StopOutcome> {
        let index = self.drivers.iter().position(|d| d.peer().name() == side.name())?;
        let mut driver = self.drivers.swap_remove(index);
        let outcome = driver.stop(self.config.driver_stop_timeout(), self.config.driver_join_attempts);
        if outcome == StopOutcome::Blocked {
            tracing::error!(peer = %side, "driver blocked while rebuilding peer");
        }
        Some(outcome)
    }

    /// Peer on `side`.
    pub fn peer(&self, side: Side) -> Result<&PeerHandle, HarnessError> {
        let peer = match side {
            Side::Alice => self.alice.as_ref(),
            Side::Bob => self.bob.as_ref(),
        };
        peer.ok_or(HarnessError::PeerMissing(side))
    }

    /// Alice.
    pub fn alice(&self) -> Result<&PeerHandle, HarnessError> {
        self.peer(Side::Alice)
    }

    /// Bob.
    pub fn bob(&self) -> Result<&PeerHandle, HarnessError> {
        self.peer(Side::Bob)
    }

    /// The peer on the other side of `side`.
    pub fn counterpart(&self, side: Side) -> Result<&PeerHandle, HarnessError> {
        self.peer(side.other())
    }

    /// Whether a driver currently iterates `side`.
    pub fn is_driven(&self, side: Side) -> bool {
        self.drivers.iter().any(|d| d.peer().name() == side.name() && d.is_running())
    }

    /// Remember that `side` holds `friend`, so teardown deletes it.
    pub fn track_friend(&mut self, side: Side, friend: FriendId) {
        if !self.tracked.contains(&(side, friend)) {
            self.tracked.push((side, friend));
        }
    }

    /// Stop tracking a friendship, usually because it was deleted.
    pub fn forget_friend(&mut self, side: Side, friend: FriendId) {
        self.tracked.retain(|entry| *entry != (side, friend));
    }

    /// Friendships teardown will delete on `side`.
    pub fn tracked(&self, side: Side) -> Vec<FriendId> {
        self.tracked.iter().filter(|(s, _)| *s == side).map(|(_, id)| *id).collect()
    }

    /// Delete `friend` on `side` and stop tracking it.
    ///
    /// Runs one batch afterwards and reports whether the id is gone.
    pub fn delete_friend(&mut self, side: Side, friend: FriendId) -> Result<bool, HarnessError> {
        let peer = self.peer(side)?.clone();
        if let Err(err) = peer.with_engine(|e| e.friend_delete(friend)) {
            tracing::warn!(peer = %side, %friend, error = %err, "friend_delete failed");
        }
        self.forget_friend(side, friend);
        self.loop_for(1)?;
        Ok(!peer.friend_exists(friend))
    }

    /// Replace the engine on `side` with a fresh one built from `options`.
    ///
    /// The old engine's driver is stopped first and restarted on the new
    /// peer. Handlers and latches do not carry over.
    pub fn rebuild_peer(&mut self, side: Side, options: &EngineOptions) -> Result<PeerHandle, HarnessError> {
        let stopped = self.stop_driver(side);
        let was_driven = stopped.is_some();
        let old = match side {
            Side::Alice => self.alice.take(),
            Side::Bob => self.bob.take(),
        };
        if let Some(old) = old {
            release_handlers(&old, stopped == Some(StopOutcome::Blocked));
        }

        let peer = self.create_peer(side, options)?;
        match side {
            Side::Alice => self.alice = Some(peer.clone()),
            Side::Bob => self.bob = Some(peer.clone()),
        }
        if was_driven {
            self.start_driver(side)?;
        }

        tracing::info!(peer = %side, driven = was_driven, "peer rebuilt");
        Ok(peer)
    }

    /// Iterate both peers `n` batches from the test thread.
    ///
    /// A peer with a background driver gets iterated from both threads;
    /// the engine lock serializes them.
    pub fn loop_for(&self, n: u32) -> Result<(), HarnessError> {
        let alice = self.alice()?;
        let bob = self.bob()?;
        let interval = bob.iteration_interval();
        for _ in 0..n.saturating_mul(self.config.batch) {
            alice.iterate();
            bob.iterate();
            thread::sleep(interval);
        }
        Ok(())
    }

    /// Policy for connect and single-peer waits.
    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy::from_config(&self.config)
    }

    /// Policy for waits on every peer at once.
    pub fn all_peers_policy(&self) -> WaitPolicy {
        WaitPolicy::all_peers(&self.config)
    }

    /// Waiter over both peers, bootstrapping through the fixture's
    /// coordinator.
    pub fn waiter(&mut self, policy: WaitPolicy) -> Result<ConditionWaiter<'_>, HarnessError> {
        let alice = self.alice()?.clone();
        let bob = self.bob()?.clone();
        Ok(ConditionWaiter::new(&alice, &bob, self.bootstrap.as_mut(), policy))
    }

    /// Keep a transfer record for invariant checks.
    pub fn record_transfer(&mut self, transfer: TransferSnapshot) {
        self.transfers.push(transfer);
    }

    /// Consistent view of both friend tables and recorded transfers.
    pub fn snapshot(&self) -> Result<SessionSnapshot, HarnessError> {
        let mut peers = Vec::with_capacity(2);
        for side in Side::BOTH {
            let peer = self.peer(side)?;
            peers.push(peer.with_engine(|e| PeerSnapshot::capture(peer.name(), e)));
        }
        let mut snapshot = SessionSnapshot::from_peers(peers);
        snapshot.transfers = self.transfers.clone();
        Ok(snapshot)
    }

    /// Run every registered invariant against a fresh snapshot.
    pub fn check_invariants(&self) -> Result<Result<(), Violations>, HarnessError> {
        let snapshot = self.snapshot()?;
        Ok(self.invariants.check_all(&snapshot))
    }

    /// Invariants checked by [`check_invariants`](Self::check_invariants).
    pub fn invariants_mut(&mut self) -> &mut InvariantRegistry {
        &mut self.invariants
    }

    /// Log shared by every engine this fixture created.
    pub fn coverage_log(&self) -> &CoverageLog {
        &self.coverage
    }

    /// Coverage of the library catalogue against this fixture's log.
    pub fn coverage(&self) -> CoverageReport {
        CoverageReport::compute(&self.coverage)
    }

    /// Stop drivers, undo tracked friendships, drop handlers and peers.
    ///
    /// Best effort and idempotent. A blocked driver is detached and keeps
    /// its peer alive until it exits.
    pub fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        let timeout = self.config.driver_stop_timeout();
        let joins = self.config.driver_join_attempts;
        let mut blocked = Vec::new();

        for mut driver in self.drivers.drain(..) {
            match driver.stop(timeout, joins) {
                StopOutcome::Stopped => report.stopped += 1,
                StopOutcome::Blocked => {
                    report.blocked += 1;
                    tracing::error!(peer = %driver.peer().name(), "driver blocked during teardown");
                    blocked.extend(Side::of(driver.peer()));
                },
            }
        }

        // A blocked driver may be parked inside the engine lock; only try it.
        for (side, friend) in std::mem::take(&mut self.tracked) {
            let Ok(peer) = self.peer(side) else {
                continue;
            };
            let deleted = if blocked.contains(&side) {
                peer.try_with_engine(|e| e.friend_delete(friend))
            } else {
                Some(peer.with_engine(|e| e.friend_delete(friend)))
            };
            match deleted {
                Some(Ok(())) => report.deleted += 1,
                Some(Err(err)) => {
                    report.delete_failed += 1;
                    tracing::warn!(peer = %side, %friend, error = %err, "teardown friend_delete failed");
                },
                None => {
                    report.skipped += 1;
                    tracing::warn!(peer = %side, %friend, "engine busy, friendship left in place");
                },
            }
        }

        for peer in [self.alice.take(), self.bob.take()].into_iter().flatten() {
            let busy = Side::of(&peer).is_some_and(|side| blocked.contains(&side));
            release_handlers(&peer, busy);
        }
        self.bootstrap = None;
        self.transfers.clear();

        if report != TeardownReport::default() {
            tracing::info!(?report, "session torn down");
        }
        report
    }
}

/// Drop the handlers of `peer`. A peer whose driver is blocked may be
/// mid-dispatch, so its table is only tried.
fn release_handlers(peer: &PeerHandle, blocked: bool) {
    if !blocked {
        peer.clear_handlers();
    } else if !peer.try_clear_handlers() {
        tracing::warn!(peer = %peer.name(), "handlers busy, released when the driver exits");
    }
}

impl Drop for SessionFixture {
    fn drop(&mut self) {
        if self.is_set_up() || !self.drivers.is_empty() {
            self.teardown();
        }
    }
}

impl fmt::Debug for SessionFixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFixture")
            .field("alice", &self.alice)
            .field("bob", &self.bob)
            .field("drivers", &self.drivers.len())
            .field("tracked", &self.tracked)
            .finish_non_exhaustive()
    }
}
