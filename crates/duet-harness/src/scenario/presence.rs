//! Profile propagation between befriended peers.
//!
//! Each scenario changes one field on the sender, waits for the matching
//! callback on the receiver, and then checks the receiver's accessor agrees
//! with what was sent.

use duet_core::{EngineEvent, EventKind, UserStatus};

use super::{ScenarioResult, engine_error, expect_eq, friend_id_of, require};
use crate::{
    capture,
    fixture::{SessionFixture, Side},
    peer::PeerHandle,
};

fn pair(fx: &SessionFixture, from: Side) -> ScenarioResult<(PeerHandle, PeerHandle)> {
    Ok((fx.peer(from)?.clone(), fx.counterpart(from)?.clone()))
}

/// `from` sets its status message; the other side must see exactly `text`.
pub fn status_message_propagation(fx: &mut SessionFixture, from: Side, text: &str) -> ScenarioResult<()> {
    let (sender, receiver) = pair(fx, from)?;
    let friend = friend_id_of(&receiver, &sender)?;

    let kind = EventKind::FriendStatusMessage;
    let wanted = text.to_owned();
    receiver.reset_latch(kind);
    let _guard = receiver.capture(
        kind,
        capture::latching_if(&receiver, kind, move |event| {
            matches!(event, EngineEvent::FriendStatusMessage { friend: f, message } if *f == friend && *message == wanted)
        }),
    );

    sender
        .with_engine(|e| e.set_self_status_message(text))
        .map_err(engine_error(&sender, "set_self_status_message"))?;

    let policy = fx.wait_policy();
    let outcome = fx.waiter(policy)?.until_latch(&receiver, kind);
    require(outcome, &receiver, "friend status message")?;

    let seen = receiver
        .with_engine(|e| e.friend_status_message(friend))
        .map_err(engine_error(&receiver, "friend_status_message"))?;
    expect_eq(&receiver, "status message length", &seen.len(), &text.len())?;
    expect_eq(&receiver, "status message", seen.as_str(), text)?;
    tracing::info!(peer = %from, len = text.len(), "status message propagated");
    Ok(())
}

/// `from` changes presence to `status`; the other side must see it.
pub fn user_status_propagation(fx: &mut SessionFixture, from: Side, status: UserStatus) -> ScenarioResult<()> {
    let (sender, receiver) = pair(fx, from)?;
    let friend = friend_id_of(&receiver, &sender)?;

    let kind = EventKind::FriendStatus;
    receiver.reset_latch(kind);
    let _guard = receiver.capture(
        kind,
        capture::latching_if(&receiver, kind, move |event| {
            matches!(event, EngineEvent::FriendStatus { friend: f, status: s } if *f == friend && *s == status)
        }),
    );

    sender.with_engine(|e| e.set_self_status(status));

    let policy = fx.wait_policy();
    let outcome = fx.waiter(policy)?.until_latch(&receiver, kind);
    require(outcome, &receiver, "friend status")?;

    let seen =
        receiver.with_engine(|e| e.friend_status(friend)).map_err(engine_error(&receiver, "friend_status"))?;
    expect_eq(&receiver, "friend status", &seen, &status)?;
    tracing::info!(peer = %from, ?status, "user status propagated");
    Ok(())
}

/// `from` renames itself to `name`; the other side must see exactly that.
pub fn name_propagation(fx: &mut SessionFixture, from: Side, name: &str) -> ScenarioResult<()> {
    let (sender, receiver) = pair(fx, from)?;
    let friend = friend_id_of(&receiver, &sender)?;

    let kind = EventKind::FriendName;
    let wanted = name.to_owned();
    receiver.reset_latch(kind);
    let _guard = receiver.capture(
        kind,
        capture::latching_if(&receiver, kind, move |event| {
            matches!(event, EngineEvent::FriendName { friend: f, name } if *f == friend && *name == wanted)
        }),
    );

    sender.with_engine(|e| e.set_self_name(name)).map_err(engine_error(&sender, "set_self_name"))?;

    let policy = fx.wait_policy();
    let outcome = fx.waiter(policy)?.until_latch(&receiver, kind);
    require(outcome, &receiver, "friend name")?;

    let seen = receiver.with_engine(|e| e.friend_name(friend)).map_err(engine_error(&receiver, "friend_name"))?;
    expect_eq(&receiver, "name length", &seen.len(), &name.len())?;
    expect_eq(&receiver, "friend name", seen.as_str(), name)?;
    tracing::info!(peer = %from, name, "name propagated");
    Ok(())
}

/// `from` starts typing; the other side must see the flag, then `from`
/// stops again.
pub fn typing_propagation(fx: &mut SessionFixture, from: Side) -> ScenarioResult<()> {
    let (sender, receiver) = pair(fx, from)?;
    let friend = friend_id_of(&receiver, &sender)?;
    let target = friend_id_of(&sender, &receiver)?;

    let kind = EventKind::FriendTyping;
    receiver.reset_latch(kind);
    let _guard = receiver.capture(
        kind,
        capture::latching_if(&receiver, kind, move |event| {
            matches!(event, EngineEvent::FriendTyping { friend: f, typing: true } if *f == friend)
        }),
    );

    sender.with_engine(|e| e.set_typing(target, true)).map_err(engine_error(&sender, "set_typing"))?;

    let policy = fx.wait_policy();
    let outcome = fx.waiter(policy)?.until_latch(&receiver, kind);
    require(outcome, &receiver, "friend typing")?;

    let typing =
        receiver.with_engine(|e| e.friend_typing(friend)).map_err(engine_error(&receiver, "friend_typing"))?;
    expect_eq(&receiver, "friend typing", &typing, &true)?;

    if let Err(err) = sender.with_engine(|e| e.set_typing(target, false)) {
        tracing::warn!(peer = %from, error = %err, "failed to clear typing flag");
    }
    tracing::info!(peer = %from, "typing propagated");
    Ok(())
}
