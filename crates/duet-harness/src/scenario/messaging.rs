//! Friend messages and their read receipts.

use duet_core::{EngineEvent, EventKind, MessageId, MessageType};

use super::{ScenarioError, ScenarioResult, engine_error, expect_eq, friend_id_of, require};
use crate::{
    capture::{self, LatchValue},
    fixture::{SessionFixture, Side},
    waiter::RetryOutcome,
};

/// `from` sends `text` as a `kind` message. The other side must receive the
/// exact bytes and `from` must get a read receipt for the returned id.
pub fn message_delivery(
    fx: &mut SessionFixture,
    from: Side,
    kind: MessageType,
    text: &str,
) -> ScenarioResult<MessageId> {
    let sender = fx.peer(from)?.clone();
    let receiver = fx.counterpart(from)?.clone();
    let target = friend_id_of(&sender, &receiver)?;
    let source = friend_id_of(&receiver, &sender)?;

    let body = text.as_bytes().to_vec();
    let wanted = body.clone();
    receiver.reset_latch(EventKind::FriendMessage);
    sender.reset_latch(EventKind::FriendReadReceipt);
    let _message = receiver.capture(
        EventKind::FriendMessage,
        capture::latching_if(&receiver, EventKind::FriendMessage, move |event| {
            matches!(event, EngineEvent::FriendMessage { friend, message, .. } if *friend == source && *message == wanted)
        }),
    );
    let _receipt = sender.capture(
        EventKind::FriendReadReceipt,
        capture::latching_if(&sender, EventKind::FriendReadReceipt, move |event| {
            matches!(event, EngineEvent::FriendReadReceipt { friend, .. } if *friend == target)
        }),
    );

    let policy = fx.wait_policy();
    let sent = fx.waiter(policy)?.retry_call("friend_send_message", || {
        sender.with_engine(|e| e.friend_send_message(target, kind, text.as_bytes())).map(Some)
    });
    let id = match sent {
        RetryOutcome::Succeeded(id) => id,
        RetryOutcome::NotConnected(err) | RetryOutcome::Failed(err) => {
            return Err(engine_error(&sender, "friend_send_message")(err));
        },
        RetryOutcome::TimedOut { rounds } => {
            return Err(ScenarioError::TimedOut {
                peer: sender.name().to_owned(),
                what: "message send".to_owned(),
                rounds,
            });
        },
    };

    let outcome = fx.waiter(policy)?.until_latch(&receiver, EventKind::FriendMessage);
    require(outcome, &receiver, "friend message")?;
    if let Some(LatchValue::Message { kind: got, body: received, .. }) = receiver.latch(EventKind::FriendMessage) {
        expect_eq(&receiver, "message type", &got, &kind)?;
        expect_eq(&receiver, "message body", &received, &body)?;
    }

    let outcome = fx.waiter(policy)?.until_latch(&sender, EventKind::FriendReadReceipt);
    require(outcome, &sender, "read receipt")?;
    if let Some(LatchValue::Receipt { message, .. }) = sender.latch(EventKind::FriendReadReceipt) {
        expect_eq(&sender, "receipt message id", &message, &id)?;
    }

    tracing::info!(peer = %from, id = id.0, len = body.len(), "message delivered");
    Ok(id)
}
