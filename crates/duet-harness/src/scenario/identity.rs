//! Self-identity, profile and persistence scenarios.
//!
//! None of these need the network; they run against each peer alone.

use duet_core::{Address, EngineError, MAX_NAME_LENGTH, Nospam, UserStatus};

use super::{ScenarioResult, engine_error, expect_eq};
use crate::{
    fixture::{SessionFixture, Side},
    invariants::{InvariantKind, Violation, Violations},
    peer::PeerHandle,
};

/// Hex length of a printed address.
const ADDRESS_HEX_LEN: usize = 76;

fn identity_problems(peer: &PeerHandle) -> Vec<Violation> {
    let name = peer.name().to_owned();
    peer.with_engine(|e| {
        let mut problems = Vec::new();
        let mut fail = |message: String| {
            problems.push(Violation::new(InvariantKind::IdentityConsistency, format!("{name}: {message}")));
        };

        let address = e.address();
        let public_key = e.public_key();
        let printed = address.to_string();
        if printed.len() != ADDRESS_HEX_LEN {
            fail(format!("address prints as {} hex digits", printed.len()));
        }
        if !printed.starts_with(&public_key.to_string()) {
            fail("address does not start with the public key".to_owned());
        }
        if address.public_key() != public_key {
            fail("address carries another public key".to_owned());
        }
        if address.nospam() != e.nospam() {
            fail("address carries another nospam".to_owned());
        }
        if e.secret_key().as_bytes() == public_key.as_bytes() {
            fail("secret key equals public key".to_owned());
        }
        if e.dht_id() == public_key {
            fail("dht id equals long-term public key".to_owned());
        }

        let original = e.nospam();
        let changed = Nospam(original.0 ^ 0x5A5A_5A5A);
        e.set_nospam(changed);
        if e.nospam() != changed {
            fail(format!("set_nospam({:08X}) reads back {:08X}", changed.0, e.nospam().0));
        }
        if e.address() != Address::new(public_key, changed) {
            fail("address did not follow the nospam".to_owned());
        }
        e.set_nospam(original);

        match e.udp_port() {
            Ok(port) => tracing::debug!(peer = %name, port, "udp port"),
            Err(EngineError::Unsupported(_)) => tracing::debug!(peer = %name, "udp disabled"),
            Err(err) => fail(format!("udp_port failed: {err}")),
        }
        problems
    })
}

/// Keys, address and nospam of both peers agree with each other.
pub fn self_identity(fx: &mut SessionFixture) -> ScenarioResult<()> {
    let mut problems = Vec::new();
    for side in Side::BOTH {
        problems.extend(identity_problems(fx.peer(side)?));
    }
    if !problems.is_empty() {
        return Err(Violations(problems).into());
    }
    tracing::info!("self identity consistent");
    Ok(())
}

fn profile(peer: &PeerHandle, name: &str, status_message: &str) -> ScenarioResult<()> {
    peer.with_engine(|e| e.set_self_name(name)).map_err(engine_error(peer, "set_self_name"))?;
    let seen = peer.with_engine(|e| e.self_name());
    expect_eq(peer, "self name", seen.as_str(), name)?;

    peer.with_engine(|e| e.set_self_status_message(status_message))
        .map_err(engine_error(peer, "set_self_status_message"))?;
    let seen = peer.with_engine(|e| e.self_status_message());
    expect_eq(peer, "self status message", seen.as_str(), status_message)?;

    for status in [UserStatus::Away, UserStatus::Busy, UserStatus::Online] {
        peer.with_engine(|e| e.set_self_status(status));
        let seen = peer.with_engine(|e| e.self_status());
        expect_eq(peer, "self status", &seen, &status)?;
    }

    let long = "n".repeat(MAX_NAME_LENGTH + 1);
    match peer.with_engine(|e| e.set_self_name(&long)) {
        Err(EngineError::MessageTooLong { .. }) => {},
        other => {
            return Err(Violation::new(
                InvariantKind::IdentityConsistency,
                format!("{}: over-long name gave {other:?}", peer.name()),
            )
            .into());
        },
    }
    let seen = peer.with_engine(|e| e.self_name());
    expect_eq(peer, "self name after rejected set", seen.as_str(), name)
}

/// Name, status message and presence set on each peer read back unchanged.
pub fn self_profile(fx: &mut SessionFixture) -> ScenarioResult<()> {
    profile(fx.alice()?, "Alice", "Testing Alice")?;
    profile(fx.bob()?, "Bob", "Testing Bob")?;
    tracing::info!("self profile round-tripped");
    Ok(())
}

/// Whether a peer kept its identity across save and restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavedataOutcome {
    /// Same address after restore
    Preserved,
    /// The restored engine came up with another address
    AddressChanged {
        /// Address before saving
        before: Address,
        /// Address after restoring
        after: Address,
    },
}

/// Save `side`, rebuild it from the saved bytes, and compare identities.
///
/// A changed address is reported in the outcome rather than as an error;
/// a lost friend is an error.
pub fn savedata_roundtrip(fx: &mut SessionFixture, side: Side) -> ScenarioResult<SavedataOutcome> {
    let peer = fx.peer(side)?.clone();
    let before = peer.address();
    let friends_before = peer.with_engine(|e| e.friend_list());
    let data = peer.with_engine(|e| e.savedata()).map_err(engine_error(&peer, "savedata"))?;
    drop(peer);

    let options = fx.config().engine.with_savedata(data);
    let restored = fx.rebuild_peer(side, &options)?;
    let after = restored.address();

    let friends_after = restored.with_engine(|e| e.friend_list());
    expect_eq(&restored, "friend list after restore", &friends_after, &friends_before)?;

    if before != after {
        tracing::warn!(peer = %side, %before, %after, "address changed across savedata");
        return Ok(SavedataOutcome::AddressChanged { before, after });
    }
    tracing::info!(peer = %side, friends = friends_after.len(), "savedata preserved identity");
    Ok(SavedataOutcome::Preserved)
}
