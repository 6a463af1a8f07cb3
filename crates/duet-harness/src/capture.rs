//! Callback capture: edge-triggered events become latched, polled state.
//!
//! Every peer owns a [`LatchBoard`] with one slot per [`EventKind`]. A handler
//! registered for a kind raises that kind's latch; the test thread polls it
//! through the owning [`PeerHandle`]. Latches are monotonic: once raised only
//! [`LatchBoard::reset`] lowers them, a later raise only replaces the carried
//! value.
//!
//! The board lives behind its own mutex, separate from the engine lock, so a
//! poll never waits for a long `iterate` to finish.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use duet_core::{
    ConnectionStatus, EngineEvent, EventKind, FileControl, FileKind, FileNumber, FriendId,
    MessageId, MessageType, ProtocolEngine, PublicKey, UserStatus,
};

use crate::{error::HandlerError, peer::PeerHandle};

/// Callback installed for one event kind on one peer.
///
/// Runs on whichever thread iterates the peer, with the engine lock held.
/// The engine is passed in so the handler can answer without re-locking.
pub type Handler =
    Box<dyn FnMut(&mut dyn ProtocolEngine, &EngineEvent) -> Result<(), HandlerError> + Send>;

/// Value carried by a raised latch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LatchValue {
    /// Raised without a payload
    Flag,
    /// Own or a friend's connection status
    Connection {
        /// Friend, or `None` for our own status
        friend: Option<FriendId>,
        /// Reported status
        status: ConnectionStatus,
    },
    /// Incoming friend request
    Request {
        /// Requester
        public_key: PublicKey,
        /// Attached message
        message: Vec<u8>,
    },
    /// A friend's presence
    Presence {
        /// Friend concerned
        friend: FriendId,
        /// Reported presence
        status: UserStatus,
    },
    /// A friend's name or status message
    Text {
        /// Friend concerned
        friend: FriendId,
        /// Reported text
        text: String,
    },
    /// A friend message
    Message {
        /// Sender
        friend: FriendId,
        /// Normal or action
        kind: MessageType,
        /// Body
        body: Vec<u8>,
    },
    /// A friend's typing flag
    Typing {
        /// Friend concerned
        friend: FriendId,
        /// Flag
        typing: bool,
    },
    /// A read receipt
    Receipt {
        /// Friend concerned
        friend: FriendId,
        /// Acknowledged message
        message: MessageId,
    },
    /// A file offer
    File {
        /// Sender
        friend: FriendId,
        /// Transfer number
        file: FileNumber,
        /// Data or avatar
        kind: FileKind,
        /// Declared size
        size: u64,
    },
    /// A transfer control
    Control {
        /// Friend concerned
        friend: FriendId,
        /// Transfer number
        file: FileNumber,
        /// Control received
        control: FileControl,
    },
    /// A chunk, incoming or requested
    Chunk {
        /// Friend concerned
        friend: FriendId,
        /// Transfer number
        file: FileNumber,
        /// Offset
        position: u64,
        /// Bytes carried or requested
        len: usize,
    },
}

impl LatchValue {
    /// The natural latch value for `event`.
    pub fn from_event(event: &EngineEvent) -> Self {
        match event {
            EngineEvent::SelfConnectionStatus { status } => {
                Self::Connection { friend: None, status: *status }
            },
            EngineEvent::FriendRequest { public_key, message } => {
                Self::Request { public_key: *public_key, message: message.clone() }
            },
            EngineEvent::FriendConnectionStatus { friend, status } => {
                Self::Connection { friend: Some(*friend), status: *status }
            },
            EngineEvent::FriendStatus { friend, status } => {
                Self::Presence { friend: *friend, status: *status }
            },
            EngineEvent::FriendStatusMessage { friend, message } => {
                Self::Text { friend: *friend, text: message.clone() }
            },
            EngineEvent::FriendName { friend, name } => {
                Self::Text { friend: *friend, text: name.clone() }
            },
            EngineEvent::FriendMessage { friend, kind, message } => {
                Self::Message { friend: *friend, kind: *kind, body: message.clone() }
            },
            EngineEvent::FriendTyping { friend, typing } => {
                Self::Typing { friend: *friend, typing: *typing }
            },
            EngineEvent::FriendReadReceipt { friend, message } => {
                Self::Receipt { friend: *friend, message: *message }
            },
            EngineEvent::FileRecv { friend, file, kind, size, .. } => {
                Self::File { friend: *friend, file: *file, kind: *kind, size: *size }
            },
            EngineEvent::FileRecvControl { friend, file, control } => {
                Self::Control { friend: *friend, file: *file, control: *control }
            },
            EngineEvent::FileRecvChunk { friend, file, position, data } => {
                Self::Chunk { friend: *friend, file: *file, position: *position, len: data.len() }
            },
            EngineEvent::FileChunkRequest { friend, file, position, length } => {
                Self::Chunk { friend: *friend, file: *file, position: *position, len: *length }
            },
        }
    }

    /// Friend the value refers to, if any.
    pub fn friend(&self) -> Option<FriendId> {
        match self {
            Self::Flag | Self::Request { .. } => None,
            Self::Connection { friend, .. } => *friend,
            Self::Presence { friend, .. }
            | Self::Text { friend, .. }
            | Self::Message { friend, .. }
            | Self::Typing { friend, .. }
            | Self::Receipt { friend, .. }
            | Self::File { friend, .. }
            | Self::Control { friend, .. }
            | Self::Chunk { friend, .. } => Some(*friend),
        }
    }

    /// Text of a name or status message latch.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// One latch slot per event kind.
#[derive(Debug, Default)]
pub struct LatchBoard {
    slots: [Option<LatchValue>; EventKind::COUNT],
}

impl LatchBoard {
    /// Raise `kind`, replacing any carried value.
    pub fn raise(&mut self, kind: EventKind, value: LatchValue) {
        self.slots[kind.index()] = Some(value);
    }

    /// Lower `kind`.
    pub fn reset(&mut self, kind: EventKind) {
        self.slots[kind.index()] = None;
    }

    /// Lower every latch.
    pub fn reset_all(&mut self) {
        self.slots = Default::default();
    }

    /// Whether `kind` is raised.
    pub fn is_raised(&self, kind: EventKind) -> bool {
        self.slots[kind.index()].is_some()
    }

    /// Value carried by `kind`, if raised.
    pub fn get(&self, kind: EventKind) -> Option<&LatchValue> {
        self.slots[kind.index()].as_ref()
    }

    /// Raised kinds in index order.
    pub fn raised(&self) -> impl Iterator<Item = EventKind> + '_ {
        EventKind::ALL.into_iter().filter(|kind| self.is_raised(*kind))
    }
}

/// Shared handle to a peer's latch board.
///
/// Handlers capture a clone of this rather than the peer itself, so no
/// reference cycle forms between a peer and its handlers.
#[derive(Debug, Clone, Default)]
pub struct Latches {
    board: Arc<Mutex<LatchBoard>>,
}

impl Latches {
    /// Fresh board with every latch lowered.
    pub fn new() -> Self {
        Self::default()
    }

    fn board(&self) -> MutexGuard<'_, LatchBoard> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raise `kind` with `value`.
    pub fn raise(&self, kind: EventKind, value: LatchValue) {
        self.board().raise(kind, value);
    }

    /// Lower `kind`.
    pub fn reset(&self, kind: EventKind) {
        self.board().reset(kind);
    }

    /// Lower every latch.
    pub fn reset_all(&self) {
        self.board().reset_all();
    }

    /// Whether `kind` is raised.
    pub fn is_raised(&self, kind: EventKind) -> bool {
        self.board().is_raised(kind)
    }

    /// Copy of the value carried by `kind`.
    pub fn get(&self, kind: EventKind) -> Option<LatchValue> {
        self.board().get(kind).cloned()
    }

    /// Raised kinds in index order.
    pub fn raised(&self) -> Vec<EventKind> {
        self.board().raised().collect()
    }
}

/// Scoped handler installation.
///
/// Dropping the guard uninstalls the handler, unless another registration
/// has replaced it in the meantime.
#[must_use = "dropping a Registration uninstalls its handler"]
pub struct Registration {
    peer: PeerHandle,
    kind: EventKind,
    generation: u64,
}

impl Registration {
    pub(crate) fn new(peer: PeerHandle, kind: EventKind, generation: u64) -> Self {
        Self { peer, kind, generation }
    }

    /// Kind this registration covers.
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.peer.unregister_generation(self.kind, self.generation);
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("peer", &self.peer.name())
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// The standard handler: raise `kind` with the event's natural value.
pub fn latching(peer: &PeerHandle, kind: EventKind) -> Handler {
    let latches = peer.latches();
    Box::new(move |_engine, event| {
        latches.raise(kind, LatchValue::from_event(event));
        Ok(())
    })
}

/// Latch `kind` only for events accepted by `filter`.
pub fn latching_if<F>(peer: &PeerHandle, kind: EventKind, mut filter: F) -> Handler
where
    F: FnMut(&EngineEvent) -> bool + Send + 'static,
{
    let latches = peer.latches();
    Box::new(move |_engine, event| {
        if filter(event) {
            latches.raise(kind, LatchValue::from_event(event));
        }
        Ok(())
    })
}

/// Install [`latching`] for `kind` on `peer` and return its guard.
pub fn capture(peer: &PeerHandle, kind: EventKind) -> Registration {
    peer.capture(kind, latching(peer, kind))
}

/// Guard for [`capture_chained`]. Dropping it puts back the handler it
/// displaced, unless someone else registered one meanwhile.
pub struct ChainedCapture {
    registration: Option<Registration>,
    previous: Arc<Mutex<Option<Handler>>>,
}

impl Drop for ChainedCapture {
    fn drop(&mut self) {
        let Some(registration) = self.registration.take() else {
            return;
        };
        let (peer, kind) = (registration.peer.clone(), registration.kind);
        drop(registration);
        // Never hold `previous` while touching the handler table.
        let previous = self.previous.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handler) = previous
            && !peer.restore_handler(kind, handler)
        {
            tracing::debug!(peer = %peer.name(), kind = kind.name(), "displaced handler superseded");
        }
    }
}

impl std::fmt::Debug for ChainedCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainedCapture").field("registration", &self.registration).finish_non_exhaustive()
    }
}

/// Like [`capture`], but an already installed handler keeps receiving
/// `kind` after the latch is raised, and is reinstalled when the guard drops.
pub fn capture_chained(peer: &PeerHandle, kind: EventKind) -> ChainedCapture {
    let previous = Arc::new(Mutex::new(peer.take_handler(kind)));
    let latches = peer.latches();
    let chained = Arc::clone(&previous);
    let handler: Handler = Box::new(move |engine, event| {
        latches.raise(kind, LatchValue::from_event(event));
        match chained.lock().unwrap_or_else(PoisonError::into_inner).as_mut() {
            Some(previous) => previous(engine, event),
            None => Ok(()),
        }
    });
    ChainedCapture { registration: Some(peer.capture(kind, handler)), previous }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_is_monotonic_until_reset() {
        let mut board = LatchBoard::default();
        assert!(!board.is_raised(EventKind::FriendTyping));

        board.raise(EventKind::FriendTyping, LatchValue::Flag);
        board.raise(
            EventKind::FriendTyping,
            LatchValue::Typing { friend: FriendId(0), typing: false },
        );
        assert!(board.is_raised(EventKind::FriendTyping));
        assert_eq!(board.get(EventKind::FriendTyping).and_then(LatchValue::friend), Some(FriendId(0)));

        board.reset(EventKind::FriendTyping);
        assert!(!board.is_raised(EventKind::FriendTyping));
    }

    #[test]
    fn latches_are_independent_per_kind() {
        let latches = Latches::new();
        latches.raise(EventKind::FriendName, LatchValue::Flag);
        latches.raise(EventKind::FileRecv, LatchValue::Flag);

        assert_eq!(latches.raised(), vec![EventKind::FriendName, EventKind::FileRecv]);

        latches.reset_all();
        assert!(latches.raised().is_empty());
    }

    #[test]
    fn natural_value_keeps_text() {
        let event = EngineEvent::FriendStatusMessage { friend: FriendId(1), message: "Happy".into() };
        let value = LatchValue::from_event(&event);
        assert_eq!(value.text(), Some("Happy"));
        assert_eq!(value.friend(), Some(FriendId(1)));
    }
}
