//! Profile propagation and messaging between befriended simulated peers.

use std::sync::Arc;

use duet_core::{EventKind, MAX_STATUS_MESSAGE_LENGTH, MessageType, UserStatus};
use duet_harness::{
    HarnessConfig, LatchValue, NetworkMode, SessionFixture, Side, SimConfig, SimNetwork, scenario,
};

fn befriended(seed: u64) -> SessionFixture {
    let network = SimNetwork::new(SimConfig::fast(seed));
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
    scenario::befriend(&mut fx, Side::Alice, "Gentoo").unwrap();
    fx
}

#[test]
fn status_message_arrives_with_exact_length() {
    let mut fx = befriended(20);
    scenario::status_message_propagation(&mut fx, Side::Bob, "Happy").unwrap();
    let alice = fx.alice().unwrap();
    let bob_id = alice.with_engine(|e| e.friend_list())[0];
    let text = alice.with_engine(|e| e.friend_status_message(bob_id)).unwrap();
    assert_eq!(text.len(), 5);

    scenario::status_message_propagation(&mut fx, Side::Bob, "Installing Gentoo").unwrap();

    let longest = "s".repeat(MAX_STATUS_MESSAGE_LENGTH);
    scenario::status_message_propagation(&mut fx, Side::Alice, &longest).unwrap();
}

#[test]
fn user_status_changes_propagate() {
    let mut fx = befriended(21);
    for status in [UserStatus::Away, UserStatus::Busy, UserStatus::Online] {
        scenario::user_status_propagation(&mut fx, Side::Bob, status).unwrap();
    }
}

#[test]
fn name_propagates_both_ways() {
    let mut fx = befriended(22);
    scenario::name_propagation(&mut fx, Side::Bob, "Gentoo").unwrap();
    scenario::name_propagation(&mut fx, Side::Alice, "Arch").unwrap();

    let latch = fx.bob().unwrap().latch(EventKind::FriendName);
    assert_eq!(latch.as_ref().and_then(LatchValue::text), Some("Arch"));
}

#[test]
fn typing_flag_is_seen_and_cleared() {
    let mut fx = befriended(23);
    scenario::typing_propagation(&mut fx, Side::Alice).unwrap();
    fx.loop_for(3).unwrap();

    let bob = fx.bob().unwrap();
    let alice_id = bob.with_engine(|e| e.friend_list())[0];
    assert!(!bob.with_engine(|e| e.friend_typing(alice_id)).unwrap());
}

#[test]
fn messages_are_delivered_and_acknowledged() {
    let mut fx = befriended(24);
    let first = scenario::message_delivery(&mut fx, Side::Alice, MessageType::Normal, "Install Gentoo").unwrap();
    let second = scenario::message_delivery(&mut fx, Side::Alice, MessageType::Action, "installs Gentoo").unwrap();
    assert_ne!(first, second);

    scenario::message_delivery(&mut fx, Side::Bob, MessageType::Normal, "ok").unwrap();
    match fx.alice().unwrap().latch(EventKind::FriendMessage) {
        Some(LatchValue::Message { kind, body, .. }) => {
            assert_eq!(kind, MessageType::Normal);
            assert_eq!(body, b"ok");
        },
        other => panic!("unexpected latch {other:?}"),
    }
}
