//! Friend table scenarios: adding, requesting, accepting, deleting.

use duet_core::{EngineEvent, EventKind, FriendId};

use super::{
    ScenarioResult, check_invariants, connect, engine_error, expect_eq, friend_id_of, require,
};
use crate::{
    capture::{self, LatchValue, Registration},
    fixture::{SessionFixture, Side},
    invariants::{InvariantKind, Violation, Violations},
    peer::PeerHandle,
};

/// Ids both sides hold after a completed handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    /// Id the requester holds for the responder
    pub requester: FriendId,
    /// Id the responder holds for the requester
    pub responder: FriendId,
}

/// Connection and presence latches armed on one side.
///
/// Must exist before the friend can come online, or the callbacks are
/// missed.
#[must_use = "dropping the watch uninstalls its handlers"]
#[derive(Debug)]
pub struct OnlineWatch {
    side: Side,
    _connection: Registration,
    _status: Registration,
}

/// The table invariants a freshly added friend must satisfy, checked
/// directly on the engine.
fn verify_new_friend(peer: &PeerHandle, friend: FriendId) -> ScenarioResult<()> {
    let problems = peer.with_engine(|e| {
        let mut problems = Vec::new();
        let list = e.friend_list();

        if !e.friend_exists(friend) {
            problems.push(Violation::new(
                InvariantKind::FriendListConsistency,
                format!("{}: friend {friend} does not exist after add", peer.name()),
            ));
        }
        let listed = list.iter().filter(|id| **id == friend).count();
        if listed != 1 {
            problems.push(Violation::new(
                InvariantKind::FriendListConsistency,
                format!("{}: friend {friend} listed {listed} times", peer.name()),
            ));
        }
        let next = friend.successor();
        if e.friend_exists(next) && !list.contains(&next) {
            problems.push(Violation::new(
                InvariantKind::NoPhantomSuccessor,
                format!("{}: friend {next} exists but is not listed", peer.name()),
            ));
        }
        if e.friend_list_size() == 0 {
            problems.push(Violation::new(
                InvariantKind::ListSizeAgreement,
                format!("{}: list size is zero after add", peer.name()),
            ));
        }
        if let Err(err) = e.friend_last_online(friend) {
            problems.push(Violation::new(
                InvariantKind::FriendListConsistency,
                format!("{}: friend_last_online({friend}) failed: {err}", peer.name()),
            ));
        }
        problems
    });

    if problems.is_empty() { Ok(()) } else { Err(Violations(problems).into()) }
}

/// `from` adds the other peer by public key, without a request.
pub fn add_friend_norequest(fx: &mut SessionFixture, from: Side) -> ScenarioResult<FriendId> {
    let peer = fx.peer(from)?.clone();
    let key = fx.counterpart(from)?.public_key();

    let friend = peer
        .with_engine(|e| e.friend_add_norequest(&key))
        .map_err(engine_error(&peer, "friend_add_norequest"))?;
    fx.track_friend(from, friend);

    verify_new_friend(&peer, friend)?;
    let stored = peer
        .with_engine(|e| e.friend_public_key(friend))
        .map_err(engine_error(&peer, "friend_public_key"))?;
    expect_eq(&peer, "friend public key", &stored, &key)?;
    check_invariants(fx)?;

    tracing::info!(peer = %from, %friend, "friend added without request");
    Ok(friend)
}

/// `from` sends a friend request carrying `message`; waits for the other
/// peer to see it with the exact message.
///
/// Returns the id the requester holds.
pub fn friend_request(fx: &mut SessionFixture, from: Side, message: &str) -> ScenarioResult<FriendId> {
    connect(fx)?;
    let requester = fx.peer(from)?.clone();
    let responder = fx.counterpart(from)?.clone();
    let requester_key = requester.public_key();

    let expected = message.as_bytes().to_vec();
    let wanted = expected.clone();
    responder.reset_latch(EventKind::FriendRequest);
    let _guard = responder.capture(
        EventKind::FriendRequest,
        capture::latching_if(&responder, EventKind::FriendRequest, move |event| {
            matches!(event, EngineEvent::FriendRequest { message, .. } if *message == wanted)
        }),
    );

    let address = responder.address();
    let friend = requester
        .with_engine(|e| e.friend_add(&address, message.as_bytes()))
        .map_err(engine_error(&requester, "friend_add"))?;
    fx.track_friend(from, friend);
    verify_new_friend(&requester, friend)?;

    let policy = fx.wait_policy();
    let outcome = fx.waiter(policy)?.until_latch(&responder, EventKind::FriendRequest);
    require(outcome, &responder, "friend request")?;

    match responder.latch(EventKind::FriendRequest) {
        Some(LatchValue::Request { public_key, message }) => {
            expect_eq(&responder, "request sender", &public_key, &requester_key)?;
            expect_eq(&responder, "request message", &message, &expected)?;
        },
        other => {
            return Err(Violation::new(
                InvariantKind::ContentIntegrity,
                format!("{}: unexpected friend request latch {other:?}", responder.name()),
            )
            .into());
        },
    }

    let resolved = friend_id_of(&requester, &responder)?;
    expect_eq(&requester, "friend id by public key", &resolved, &friend)?;

    tracing::info!(peer = %from, %friend, "friend request delivered");
    Ok(friend)
}

/// Request from `from`, accepted by the other side with the key the
/// request carried.
pub fn friend_handshake(fx: &mut SessionFixture, from: Side, message: &str) -> ScenarioResult<Handshake> {
    let requester = friend_request(fx, from, message)?;
    let side = from.other();
    let responder = fx.peer(side)?.clone();

    let Some(LatchValue::Request { public_key, .. }) = responder.latch(EventKind::FriendRequest) else {
        return Err(Violation::new(
            InvariantKind::ContentIntegrity,
            format!("{}: friend request latch lost", responder.name()),
        )
        .into());
    };

    let accepted = responder
        .with_engine(|e| e.friend_add_norequest(&public_key))
        .map_err(engine_error(&responder, "friend_add_norequest"))?;
    fx.track_friend(side, accepted);
    verify_new_friend(&responder, accepted)?;
    check_invariants(fx)?;

    tracing::info!(requester = %from, responder = %side, "friend handshake complete");
    Ok(Handshake { requester, responder: accepted })
}

/// Arm connection and presence latches on `side`.
pub fn watch_friend_online(fx: &SessionFixture, side: Side) -> ScenarioResult<OnlineWatch> {
    let peer = fx.peer(side)?;
    peer.reset_latch(EventKind::FriendConnectionStatus);
    peer.reset_latch(EventKind::FriendStatus);

    let connection = peer.capture(
        EventKind::FriendConnectionStatus,
        capture::latching_if(peer, EventKind::FriendConnectionStatus, |event| {
            matches!(event, EngineEvent::FriendConnectionStatus { status, .. } if status.is_connected())
        }),
    );
    let status = capture::capture(peer, EventKind::FriendStatus);
    Ok(OnlineWatch { side, _connection: connection, _status: status })
}

/// Wait until the watched side has seen its friend connect and report a
/// presence. Consumes the watch.
pub fn await_friend_online(fx: &mut SessionFixture, watch: OnlineWatch) -> ScenarioResult<FriendId> {
    let peer = fx.peer(watch.side)?.clone();
    let policy = fx.wait_policy();
    let outcome = fx
        .waiter(policy)?
        .until_latches(&peer, &[EventKind::FriendConnectionStatus, EventKind::FriendStatus]);
    require(outcome, &peer, "friend online")?;

    let friend = peer.latch(EventKind::FriendConnectionStatus).and_then(|v| v.friend()).ok_or_else(|| {
        Violation::new(
            InvariantKind::ContentIntegrity,
            format!("{}: connection latch carries no friend", peer.name()),
        )
    })?;
    let status = peer
        .with_engine(|e| e.friend_connection_status(friend))
        .map_err(engine_error(&peer, "friend_connection_status"))?;
    tracing::info!(peer = %watch.side, %friend, ?status, "friend online");
    Ok(friend)
}

/// Full friendship from nothing: connect, handshake from `from`, and wait
/// for both sides to see each other online.
pub fn befriend(fx: &mut SessionFixture, from: Side, message: &str) -> ScenarioResult<Handshake> {
    connect(fx)?;
    let watches = [watch_friend_online(fx, Side::Alice)?, watch_friend_online(fx, Side::Bob)?];
    let handshake = friend_handshake(fx, from, message)?;
    for watch in watches {
        await_friend_online(fx, watch)?;
    }
    Ok(handshake)
}

/// Delete `friend` on `side` and check the id is gone.
pub fn delete_friend(fx: &mut SessionFixture, side: Side, friend: FriendId) -> ScenarioResult<()> {
    let peer = fx.peer(side)?.clone();
    if !peer.friend_exists(friend) {
        return Err(Violation::new(
            InvariantKind::FriendListConsistency,
            format!("{}: friend {friend} does not exist before delete", peer.name()),
        )
        .into());
    }

    if !fx.delete_friend(side, friend)? {
        return Err(Violation::new(
            InvariantKind::FriendListConsistency,
            format!("{}: friend {friend} still exists after delete", peer.name()),
        )
        .into());
    }
    check_invariants(fx)?;
    tracing::info!(peer = %side, %friend, "friend deleted");
    Ok(())
}
