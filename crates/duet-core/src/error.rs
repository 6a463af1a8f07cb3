//! Error types returned by protocol engines.
//!
//! Engine errors split into two groups. Transient ones (the friend is not
//! reachable yet, the send queue is full) may succeed when retried after more
//! iterations. Everything else is a caller or protocol error and retrying the
//! same call will not help.

use thiserror::Error;

use crate::types::{FileNumber, FriendId, PublicKey};

/// Errors produced while parsing an [`Address`](crate::Address) or key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Input was not valid hex
    #[error("address is not valid hex")]
    NotHex,

    /// Decoded input had the wrong length
    #[error("address has wrong length: {0} bytes")]
    Length(usize),

    /// Checksum did not match the key and nospam
    #[error("address checksum mismatch")]
    Checksum,
}

/// Errors that engine operations can return.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Address failed to parse or verify
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    /// Friend request sent without a message
    #[error("friend request message is empty")]
    NoMessage,

    /// Payload exceeds the protocol limit
    #[error("payload too long: {len} bytes (max {max})")]
    MessageTooLong {
        /// Length that was supplied
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Tried to befriend our own key
    #[error("cannot add own key as friend")]
    OwnKey,

    /// Key is already in the friend list
    #[error("friend request already sent or friend already added")]
    AlreadySent,

    /// No friend with that id
    #[error("friend {0} not found")]
    FriendNotFound(FriendId),

    /// No friend with that public key
    #[error("no friend with public key {0}")]
    PublicKeyNotFound(PublicKey),

    /// Friend exists but is not reachable right now
    #[error("this client is currently not connected to friend {0}")]
    FriendNotConnected(FriendId),

    /// No transfer with that number for the friend
    #[error("no transfer {file} for friend {friend}")]
    FileNotFound {
        /// Friend the lookup was made for
        friend: FriendId,
        /// Transfer number that was not found
        file: FileNumber,
    },

    /// Seek or chunk position does not fit the transfer
    #[error("bad position {position} for {file} of friend {friend}")]
    FileBadPosition {
        /// Friend owning the transfer
        friend: FriendId,
        /// Transfer being addressed
        file: FileNumber,
        /// Offending position
        position: u64,
    },

    /// Seek attempted after the transfer already started
    #[error("transfer {file} of friend {friend} already started")]
    FileNotPaused {
        /// Friend owning the transfer
        friend: FriendId,
        /// Transfer being addressed
        file: FileNumber,
    },

    /// Control not allowed in the transfer's current state
    #[error("control denied for {file} of friend {friend}")]
    FileDenied {
        /// Friend owning the transfer
        friend: FriendId,
        /// Transfer being addressed
        file: FileNumber,
    },

    /// Bootstrap node could not be used (bad host, port or key)
    #[error("bad bootstrap node {host}:{port}")]
    BadBootstrapNode {
        /// Host of the rejected node
        host: String,
        /// Port of the rejected node
        port: u16,
    },

    /// Outgoing queue is full, try again after iterating
    #[error("send queue full")]
    SendQueueFull,

    /// Saved state could not be produced or loaded
    #[error("savedata error: {0}")]
    Savedata(String),

    /// The engine does not implement this operation
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

impl EngineError {
    /// Returns true if this error may clear up after more iterations.
    ///
    /// Only reachability problems qualify. Invalid arguments and protocol
    /// violations never become valid by waiting.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::FriendNotConnected(_) | Self::SendQueueFull)
    }

    /// Returns true for the distinguished "not connected to friend" error.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::FriendNotConnected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reachability_errors_are_transient() {
        assert!(EngineError::FriendNotConnected(FriendId(0)).is_transient());
        assert!(EngineError::SendQueueFull.is_transient());
        assert!(EngineError::FriendNotConnected(FriendId(0)).is_not_connected());
        assert!(!EngineError::SendQueueFull.is_not_connected());
    }

    #[test]
    fn caller_errors_are_fatal() {
        assert!(!EngineError::NoMessage.is_transient());
        assert!(!EngineError::OwnKey.is_transient());
        assert!(!EngineError::FriendNotFound(FriendId(1)).is_transient());
        assert!(
            !EngineError::FileBadPosition { friend: FriendId(0), file: FileNumber(0), position: 9 }
                .is_transient()
        );
        assert!(!EngineError::from(AddressError::Checksum).is_transient());
    }

    #[test]
    fn not_connected_message_names_friend() {
        let err = EngineError::FriendNotConnected(FriendId(4));
        assert_eq!(err.to_string(), "this client is currently not connected to friend #4");
    }
}
