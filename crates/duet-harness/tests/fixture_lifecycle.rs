//! Session fixture lifecycle against the simulated network.
//!
//! Setup is idempotent, teardown is ordered and releases every engine, and
//! nothing leaks when a fixture is simply dropped.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, mpsc},
    thread,
    time::{Duration, Instant},
};

use duet_core::{EngineError, EngineFactory, EngineOptions, ProtocolEngine};
use duet_harness::{
    HarnessConfig, HarnessError, NetworkMode, SessionFixture, Side, SimConfig, SimNetwork,
    scenario,
};

fn sim_config(network: &SimNetwork, seed: u64, drive_both: bool) -> HarnessConfig {
    HarnessConfig {
        threshold: 50,
        batch: 20,
        driver_stop_timeout_ms: 500,
        drive_both,
        network: NetworkMode::Local,
        seed: Some(seed),
        nodes: network.node_list(),
        ..HarnessConfig::default()
    }
}

fn sim_fixture(seed: u64, drive_both: bool) -> (SimNetwork, SessionFixture) {
    let network = SimNetwork::new(SimConfig::fast(seed));
    let config = sim_config(&network, seed, drive_both);
    let fx = SessionFixture::new(Arc::new(network.clone()), config);
    (network, fx)
}

/// Builds Alice normally and refuses Bob.
struct NoBobFactory(SimNetwork);

impl EngineFactory for NoBobFactory {
    fn create(&self, name: &str, options: &EngineOptions) -> Result<Box<dyn ProtocolEngine>, EngineError> {
        if name == "bob" {
            return Err(EngineError::Unsupported("bob refused"));
        }
        self.0.create(name, options)
    }
}

fn wait_for_release(network: &SimNetwork) -> usize {
    for _ in 0..200 {
        if network.live_engines() == 0 {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    network.live_engines()
}

struct BrokenFactory;

impl EngineFactory for BrokenFactory {
    fn create(&self, _name: &str, _options: &EngineOptions) -> Result<Box<dyn ProtocolEngine>, EngineError> {
        Err(EngineError::Unsupported("no engine available"))
    }
}

#[test]
fn peers_are_missing_before_setup() {
    let (_network, fx) = sim_fixture(1, false);
    let err = fx.alice().unwrap_err();
    assert!(matches!(err, HarnessError::PeerMissing(Side::Alice)));
    assert_eq!(err.to_string(), "alice is not set up");
}

#[test]
fn setup_is_idempotent() {
    let (network, mut fx) = sim_fixture(2, false);

    assert!(fx.setup().unwrap());
    let addresses = (fx.alice().unwrap().address(), fx.bob().unwrap().address());
    let statuses =
        (fx.alice().unwrap().self_connection_status(), fx.bob().unwrap().self_connection_status());

    assert!(!fx.setup().unwrap());

    assert_eq!((fx.alice().unwrap().address(), fx.bob().unwrap().address()), addresses);
    assert_eq!(
        (fx.alice().unwrap().self_connection_status(), fx.bob().unwrap().self_connection_status()),
        statuses
    );
    assert_eq!(network.live_engines(), 2);
    assert_eq!(fx.alice().unwrap().name(), "alice");
    assert_eq!(fx.counterpart(Side::Alice).unwrap().name(), "bob");
    assert!(fx.is_driven(Side::Bob));
    assert!(!fx.is_driven(Side::Alice));
}

#[test]
fn teardown_stops_driver_and_releases_engines() {
    let (network, mut fx) = sim_fixture(3, false);
    fx.setup().unwrap();

    let report = fx.teardown();
    assert_eq!(report.stopped, 1);
    assert_eq!(report.blocked, 0);
    assert_eq!(network.live_engines(), 0);
    assert!(!fx.is_set_up());

    assert_eq!(fx.teardown(), Default::default());
}

#[test]
fn drive_both_starts_two_drivers() {
    let (_network, mut fx) = sim_fixture(4, true);
    fx.setup().unwrap();
    assert!(fx.is_driven(Side::Alice));
    assert!(fx.is_driven(Side::Bob));
    assert_eq!(fx.teardown().stopped, 2);
}

#[test]
fn dropping_the_fixture_tears_down() {
    let (network, mut fx) = sim_fixture(5, false);
    fx.setup().unwrap();
    let bob = fx.bob().unwrap().clone();
    drop(fx);

    assert!(!bob.is_driven());
    drop(bob);
    assert_eq!(network.live_engines(), 0);
}

#[test]
fn tracked_friends_are_deleted_on_teardown() {
    let (_network, mut fx) = sim_fixture(6, false);
    fx.setup().unwrap();

    let friend = scenario::add_friend_norequest(&mut fx, Side::Alice).unwrap();
    assert_eq!(fx.tracked(Side::Alice), vec![friend]);
    assert!(fx.tracked(Side::Bob).is_empty());

    let alice = fx.alice().unwrap().clone();
    let report = fx.teardown();
    assert_eq!(report.deleted, 1);
    assert_eq!(report.delete_failed, 0);
    assert!(!alice.friend_exists(friend));
}

#[test]
fn rebuilt_peer_keeps_its_driver() {
    let (network, mut fx) = sim_fixture(7, false);
    fx.setup().unwrap();
    let before = fx.bob().unwrap().public_key();

    let bob = fx.rebuild_peer(Side::Bob, &EngineOptions::default()).unwrap();
    assert!(bob.is_driven());
    assert!(fx.is_driven(Side::Bob));
    assert_ne!(bob.public_key(), before);
    assert_eq!(network.live_engines(), 2);
}

#[test]
fn engine_creation_failure_is_reported() {
    let mut fx = SessionFixture::new(Arc::new(BrokenFactory), HarnessConfig::default());
    let err = fx.setup().unwrap_err();
    assert!(matches!(err, HarnessError::EngineCreation { ref peer, .. } if peer == "alice"));
    assert!(!fx.is_set_up());
}

#[test]
fn snapshot_sees_both_friend_tables() {
    let (_network, mut fx) = sim_fixture(8, false);
    fx.setup().unwrap();
    scenario::add_friend_norequest(&mut fx, Side::Bob).unwrap();

    let snapshot = fx.snapshot().unwrap();
    assert_eq!(snapshot.peers.len(), 2);
    assert_eq!(snapshot.peers[0].list_size, 0);
    assert_eq!(snapshot.peers[1].list_size, 1);
    assert!(fx.check_invariants().unwrap().is_ok());
}

#[test]
fn second_peer_failure_leaves_nothing_half_built() {
    let network = SimNetwork::new(SimConfig::fast(9));
    let mut fx = SessionFixture::new(Arc::new(NoBobFactory(network.clone())), HarnessConfig::default());

    let err = fx.setup().unwrap_err();
    assert!(matches!(err, HarnessError::EngineCreation { ref peer, .. } if peer == "bob"));
    assert!(!fx.is_set_up());
    assert!(matches!(fx.alice().unwrap_err(), HarnessError::PeerMissing(Side::Alice)));
    assert_eq!(network.live_engines(), 0);
}

#[test]
fn scenario_panic_still_releases_everything() {
    let (network, fx) = sim_fixture(10, true);

    let result = panic::catch_unwind(AssertUnwindSafe(move || {
        let mut fx = fx;
        fx.setup().unwrap();
        scenario::add_friend_norequest(&mut fx, Side::Alice).unwrap();
        panic!("scenario gave up");
    }));

    assert!(result.is_err());
    // Both driver threads have exited and dropped their peers.
    assert_eq!(wait_for_release(&network), 0);
}

#[test]
fn blocked_driver_does_not_stall_teardown() {
    let network = SimNetwork::new(SimConfig::fast(11));
    let config = HarnessConfig {
        driver_stop_timeout_ms: 50,
        driver_join_attempts: 2,
        ..sim_config(&network, 11, false)
    };
    let mut fx = SessionFixture::new(Arc::new(network.clone()), config);
    fx.setup().unwrap();
    scenario::add_friend_norequest(&mut fx, Side::Bob).unwrap();

    let bob = fx.bob().unwrap().clone();
    let (locked_tx, locked_rx) = mpsc::channel();
    let holder = thread::spawn(move || {
        bob.with_engine(|_engine| {
            locked_tx.send(()).unwrap();
            thread::sleep(Duration::from_secs(1));
        });
    });
    locked_rx.recv().unwrap();
    // Let the driver park on the engine lock.
    thread::sleep(Duration::from_millis(50));

    #[allow(clippy::disallowed_methods)]
    let started = Instant::now();
    let report = fx.teardown();
    let elapsed = started.elapsed();

    assert_eq!(report.blocked, 1);
    assert_eq!(report.stopped, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.deleted, 0);
    assert!(elapsed < Duration::from_millis(700), "teardown waited {elapsed:?}");
    assert!(!fx.is_set_up());
    assert!(fx.tracked(Side::Bob).is_empty());

    holder.join().unwrap();
    assert_eq!(wait_for_release(&network), 0);
}
