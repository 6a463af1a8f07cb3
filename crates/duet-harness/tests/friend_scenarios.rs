//! Friend table scenarios on the simulated network.

use std::sync::Arc;

use duet_core::{EventKind, FriendId};
use duet_harness::{
    HarnessConfig, LatchValue, NetworkMode, ScenarioError, SessionFixture, Side, SimConfig,
    SimNetwork, scenario,
};

fn fixture(sim: SimConfig) -> SessionFixture {
    let seed = sim.seed;
    let network = SimNetwork::new(sim);
    let config = HarnessConfig {
        threshold: 60,
        batch: 20,
        driver_stop_timeout_ms: 500,
        network: NetworkMode::Local,
        seed: Some(seed),
        nodes: network.node_list(),
        ..HarnessConfig::default()
    };
    let mut fx = SessionFixture::new(Arc::new(network), config);
    fx.setup().unwrap();
    fx
}

#[test]
fn connect_reaches_both_peers() {
    let mut fx = fixture(SimConfig::fast(10));
    scenario::connect(&mut fx).unwrap();
    for side in Side::BOTH {
        assert!(fx.peer(side).unwrap().self_connection_status().is_connected());
    }
}

#[test]
fn request_carries_the_exact_message() {
    let mut fx = fixture(SimConfig::fast(11));
    let friend = scenario::friend_request(&mut fx, Side::Alice, "Gentoo").unwrap();
    assert_eq!(friend, FriendId(0));

    let bob = fx.bob().unwrap();
    match bob.latch(EventKind::FriendRequest) {
        Some(LatchValue::Request { public_key, message }) => {
            assert_eq!(public_key, fx.alice().unwrap().public_key());
            assert_eq!(message, b"Gentoo");
        },
        other => panic!("unexpected latch {other:?}"),
    }
    assert!(!bob.has_handler(EventKind::FriendRequest));
}

#[test]
fn befriend_brings_both_sides_online() {
    let mut fx = fixture(SimConfig::fast(12));
    let handshake = scenario::befriend(&mut fx, Side::Alice, "hello").unwrap();

    let alice = fx.alice().unwrap();
    let bob = fx.bob().unwrap();
    let to_bob = alice.with_engine(|e| e.friend_connection_status(handshake.requester)).unwrap();
    let to_alice = bob.with_engine(|e| e.friend_connection_status(handshake.responder)).unwrap();
    assert!(to_bob.is_connected());
    assert!(to_alice.is_connected());
    assert_eq!(fx.tracked(Side::Alice), vec![handshake.requester]);
    assert_eq!(fx.tracked(Side::Bob), vec![handshake.responder]);
}

#[test]
fn handshake_survives_handshake_loss() {
    let mut fx = fixture(SimConfig::fast(13).with_loss(0.4));
    scenario::befriend(&mut fx, Side::Bob, "lossy").unwrap();
}

#[test]
fn mutual_norequest_comes_online() {
    let mut fx = fixture(SimConfig::fast(14));
    scenario::run("add_friend_norequest", &mut fx).unwrap().unwrap();
    assert_eq!(fx.tracked(Side::Alice).len(), 1);
    assert_eq!(fx.tracked(Side::Bob).len(), 1);
}

#[test]
fn deleting_friends_frees_their_ids() {
    let mut fx = fixture(SimConfig::fast(15));
    let handshake = scenario::befriend(&mut fx, Side::Alice, "bye").unwrap();

    scenario::delete_friend(&mut fx, Side::Alice, handshake.requester).unwrap();
    assert!(fx.tracked(Side::Alice).is_empty());
    assert_eq!(fx.alice().unwrap().with_engine(|e| e.friend_list_size()), 0);

    let again = scenario::add_friend_norequest(&mut fx, Side::Alice).unwrap();
    assert_eq!(again, handshake.requester);
}

#[test]
fn deleting_a_missing_friend_is_a_violation() {
    let mut fx = fixture(SimConfig::fast(16));
    let err = scenario::delete_friend(&mut fx, Side::Bob, FriendId(3)).unwrap_err();
    assert!(matches!(err, ScenarioError::Invariant(_)));
    assert!(!err.is_environmental());
}

#[test]
fn request_without_bootstrap_nodes_times_out() {
    let network = SimNetwork::new(SimConfig::fast(17));
    let config = HarnessConfig { threshold: 3, batch: 2, network: NetworkMode::Local, ..HarnessConfig::default() };
    let mut fx = SessionFixture::new(Arc::new(network), config);
    fx.setup().unwrap();

    let err = scenario::friend_request(&mut fx, Side::Alice, "nobody home").unwrap_err();
    assert!(matches!(err, ScenarioError::TimedOut { rounds: 4, .. }));
    assert!(err.is_environmental());
}
