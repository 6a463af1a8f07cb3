//! File transfer from an offset between simulated peers.
//!
//! The receiver seeks before resuming, so it must end up with exactly the
//! tail of the payload, byte for byte.

use std::sync::Arc;

use duet_core::EventKind;
use duet_harness::{
    HarnessConfig, NetworkMode, ScenarioError, SessionFixture, Side, SimConfig, SimNetwork,
    scenario::{self, TRANSFER_OFFSET, TRANSFER_SIZE},
};
use sha2::{Digest, Sha256};

fn befriended(seed: u64) -> SessionFixture {
    let network = SimNetwork::new(SimConfig::fast(seed));
    let config = HarnessConfig {
        threshold: 80,
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
fn one_mebibyte_from_offset_arrives_intact() {
    let mut fx = befriended(30);
    let payload = scenario::seeded_payload(30, TRANSFER_SIZE);
    let expected: [u8; 32] = Sha256::digest(&payload[TRANSFER_OFFSET as usize..]).into();

    let outcome = scenario::file_transfer(&mut fx, Side::Alice, payload, TRANSFER_OFFSET).unwrap();

    assert_eq!(outcome.bytes, TRANSFER_SIZE as u64 - TRANSFER_OFFSET);
    assert_eq!(outcome.digest, expected);

    let snapshot = fx.snapshot().unwrap();
    let transfer = &snapshot.transfers[0];
    assert_eq!(transfer.peer, "bob");
    assert_eq!(transfer.offsets.first(), Some(&TRANSFER_OFFSET));
    assert_eq!(transfer.offsets.last(), Some(&(TRANSFER_SIZE as u64)));
}

#[test]
fn transfer_works_in_the_other_direction() {
    let mut fx = befriended(31);
    let payload = scenario::seeded_payload(31, 20_000);
    let outcome = scenario::file_transfer(&mut fx, Side::Bob, payload, 0).unwrap();
    assert_eq!(outcome.bytes, 20_000);

    assert!(fx.alice().unwrap().is_raised(EventKind::FileRecvChunk));
    assert!(fx.bob().unwrap().is_raised(EventKind::FileRecvControl));
}

#[test]
fn offset_outside_payload_is_rejected() {
    let mut fx = befriended(32);
    let payload = scenario::seeded_payload(32, 100);
    let err = scenario::file_transfer(&mut fx, Side::Alice, payload, 100).unwrap_err();
    assert!(matches!(err, ScenarioError::Invariant(_)));
    assert!(!err.is_environmental());
}

#[test]
fn handlers_are_gone_after_the_transfer() {
    let mut fx = befriended(33);
    let payload = scenario::seeded_payload(33, 5000);
    scenario::file_transfer(&mut fx, Side::Alice, payload, 10).unwrap();

    let bob = fx.bob().unwrap();
    let alice = fx.alice().unwrap();
    assert!(!bob.has_handler(EventKind::FileRecv));
    assert!(!bob.has_handler(EventKind::FileRecvChunk));
    assert!(!alice.has_handler(EventKind::FileChunkRequest));
    assert!(!alice.has_handler(EventKind::FileRecvControl));
}
