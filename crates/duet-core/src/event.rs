//! Events an engine reports from [`iterate`](crate::ProtocolEngine::iterate).
//!
//! Every event belongs to exactly one [`EventKind`]. The harness keeps one
//! handler slot and one latch per kind, so the set of kinds is closed and
//! indexable.

use bytes::Bytes;

use crate::types::{
    ConnectionStatus, FileControl, FileKind, FileNumber, FriendId, MessageId, MessageType,
    PublicKey, UserStatus,
};

/// The closed set of callback kinds an engine can fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// Own connection status changed
    SelfConnectionStatus,
    /// A stranger sent a friend request
    FriendRequest,
    /// A friend came online or went offline
    FriendConnectionStatus,
    /// A friend changed presence
    FriendStatus,
    /// A friend changed status message
    FriendStatusMessage,
    /// A friend changed display name
    FriendName,
    /// A friend sent a message
    FriendMessage,
    /// A friend started or stopped typing
    FriendTyping,
    /// A friend acknowledged one of our messages
    FriendReadReceipt,
    /// A friend offered a file
    FileRecv,
    /// A friend sent a transfer control
    FileRecvControl,
    /// A chunk of an incoming file arrived
    FileRecvChunk,
    /// The engine wants the next chunk of an outgoing file
    FileChunkRequest,
}

impl EventKind {
    /// Number of kinds.
    pub const COUNT: usize = 13;

    /// Every kind, in index order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::SelfConnectionStatus,
        Self::FriendRequest,
        Self::FriendConnectionStatus,
        Self::FriendStatus,
        Self::FriendStatusMessage,
        Self::FriendName,
        Self::FriendMessage,
        Self::FriendTyping,
        Self::FriendReadReceipt,
        Self::FileRecv,
        Self::FileRecvControl,
        Self::FileRecvChunk,
        Self::FileChunkRequest,
    ];

    /// Dense index in `0..COUNT`.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Callback name, as listed in coverage reports.
    pub fn name(self) -> &'static str {
        match self {
            Self::SelfConnectionStatus => "on_self_connection_status",
            Self::FriendRequest => "on_friend_request",
            Self::FriendConnectionStatus => "on_friend_connection_status",
            Self::FriendStatus => "on_friend_status",
            Self::FriendStatusMessage => "on_friend_status_message",
            Self::FriendName => "on_friend_name",
            Self::FriendMessage => "on_friend_message",
            Self::FriendTyping => "on_friend_typing",
            Self::FriendReadReceipt => "on_friend_read_receipt",
            Self::FileRecv => "on_file_recv",
            Self::FileRecvControl => "on_file_recv_control",
            Self::FileRecvChunk => "on_file_recv_chunk",
            Self::FileChunkRequest => "on_file_chunk_request",
        }
    }
}

/// An event reported by an engine during one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Own connection status changed
    SelfConnectionStatus {
        /// New status
        status: ConnectionStatus,
    },

    /// A friend request arrived
    FriendRequest {
        /// Requester's public key
        public_key: PublicKey,
        /// Message attached to the request
        message: Vec<u8>,
    },

    /// A friend's connection status changed
    FriendConnectionStatus {
        /// Friend concerned
        friend: FriendId,
        /// New status
        status: ConnectionStatus,
    },

    /// A friend's presence changed
    FriendStatus {
        /// Friend concerned
        friend: FriendId,
        /// New presence
        status: UserStatus,
    },

    /// A friend's status message changed
    FriendStatusMessage {
        /// Friend concerned
        friend: FriendId,
        /// New status message
        message: String,
    },

    /// A friend's display name changed
    FriendName {
        /// Friend concerned
        friend: FriendId,
        /// New name
        name: String,
    },

    /// A friend sent a message
    FriendMessage {
        /// Sender
        friend: FriendId,
        /// Normal or action
        kind: MessageType,
        /// Message body
        message: Vec<u8>,
    },

    /// A friend's typing flag changed
    FriendTyping {
        /// Friend concerned
        friend: FriendId,
        /// Whether they are typing
        typing: bool,
    },

    /// A friend confirmed receipt of a message
    FriendReadReceipt {
        /// Friend concerned
        friend: FriendId,
        /// Id returned when the message was sent
        message: MessageId,
    },

    /// A friend offered a file
    FileRecv {
        /// Sender
        friend: FriendId,
        /// Receiver-side transfer number
        file: FileNumber,
        /// Data or avatar
        kind: FileKind,
        /// Declared total size
        size: u64,
        /// Offered file name
        filename: Vec<u8>,
    },

    /// A transfer control arrived from the friend
    FileRecvControl {
        /// Friend concerned
        friend: FriendId,
        /// Transfer number on our side
        file: FileNumber,
        /// Control received
        control: FileControl,
    },

    /// A chunk of an incoming file arrived.
    ///
    /// An empty chunk at `position == size` marks the end of the transfer.
    FileRecvChunk {
        /// Sender
        friend: FriendId,
        /// Receiver-side transfer number
        file: FileNumber,
        /// Offset of `data` in the file
        position: u64,
        /// Chunk bytes
        data: Bytes,
    },

    /// The engine asks for the next chunk of an outgoing file.
    ///
    /// A zero `length` means the transfer is complete and nothing is needed.
    FileChunkRequest {
        /// Receiver
        friend: FriendId,
        /// Sender-side transfer number
        file: FileNumber,
        /// Offset requested
        position: u64,
        /// Number of bytes requested
        length: usize,
    },
}

impl EngineEvent {
    /// Kind this event is dispatched under.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::SelfConnectionStatus { .. } => EventKind::SelfConnectionStatus,
            Self::FriendRequest { .. } => EventKind::FriendRequest,
            Self::FriendConnectionStatus { .. } => EventKind::FriendConnectionStatus,
            Self::FriendStatus { .. } => EventKind::FriendStatus,
            Self::FriendStatusMessage { .. } => EventKind::FriendStatusMessage,
            Self::FriendName { .. } => EventKind::FriendName,
            Self::FriendMessage { .. } => EventKind::FriendMessage,
            Self::FriendTyping { .. } => EventKind::FriendTyping,
            Self::FriendReadReceipt { .. } => EventKind::FriendReadReceipt,
            Self::FileRecv { .. } => EventKind::FileRecv,
            Self::FileRecvControl { .. } => EventKind::FileRecvControl,
            Self::FileRecvChunk { .. } => EventKind::FileRecvChunk,
            Self::FileChunkRequest { .. } => EventKind::FileChunkRequest,
        }
    }

    /// Friend the event concerns, if any.
    pub fn friend(&self) -> Option<FriendId> {
        match self {
            Self::SelfConnectionStatus { .. } | Self::FriendRequest { .. } => None,
            Self::FriendConnectionStatus { friend, .. }
            | Self::FriendStatus { friend, .. }
            | Self::FriendStatusMessage { friend, .. }
            | Self::FriendName { friend, .. }
            | Self::FriendMessage { friend, .. }
            | Self::FriendTyping { friend, .. }
            | Self::FriendReadReceipt { friend, .. }
            | Self::FileRecv { friend, .. }
            | Self::FileRecvControl { friend, .. }
            | Self::FileRecvChunk { friend, .. }
            | Self::FileChunkRequest { friend, .. } => Some(*friend),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_dense_and_ordered() {
        for (i, kind) in EventKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<_> = EventKind::ALL.iter().map(|k| k.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), EventKind::COUNT);
    }

    #[test]
    fn event_reports_its_kind_and_friend() {
        let event = EngineEvent::FriendTyping { friend: FriendId(2), typing: true };
        assert_eq!(event.kind(), EventKind::FriendTyping);
        assert_eq!(event.friend(), Some(FriendId(2)));

        let event = EngineEvent::SelfConnectionStatus { status: ConnectionStatus::Pending };
        assert_eq!(event.friend(), None);
    }
}
