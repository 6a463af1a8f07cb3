//! The opaque protocol engine the harness drives.
//!
//! One engine is one peer. The harness never looks inside: it calls
//! operations, pumps [`ProtocolEngine::iterate`] and reacts to the returned
//! events. Engines must be `Send` so a background driver thread can own the
//! pumping, but they are never shared without the harness' own lock.
//!
//! # Contracts
//!
//! - Operations are non-blocking. Anything that needs the network is queued
//!   and makes progress only through `iterate`.
//! - `iterate` returns events in the order they became ready. An event for a
//!   friend is only reported while that friend exists.
//! - Friend ids returned by a successful add stay valid until deleted and
//!   are never handed out twice while valid.
//! - A friend operation that needs the friend online fails with
//!   [`EngineError::FriendNotConnected`] rather than queueing indefinitely.

use std::time::Duration;

use crate::{
    error::EngineError,
    event::EngineEvent,
    node::BootstrapNode,
    options::EngineOptions,
    types::{
        Address, ConnectionStatus, FileControl, FileId, FileKind, FileNumber, FriendId, MessageId,
        MessageType, Nospam, PublicKey, SecretKey, UserStatus,
    },
};

/// One protocol peer.
///
/// The trait is object safe; the harness stores engines as
/// `Box<dyn ProtocolEngine>`.
pub trait ProtocolEngine: Send {
    /// Process pending network work and return the events that became ready.
    fn iterate(&mut self) -> Vec<EngineEvent>;

    /// How long a driver should sleep between iterations.
    fn iteration_interval(&self) -> Duration;

    /// Address others use to send us friend requests.
    fn address(&self) -> Address;

    /// Long-term public key.
    fn public_key(&self) -> PublicKey;

    /// Long-term secret key.
    fn secret_key(&self) -> SecretKey;

    /// Temporary DHT key.
    fn dht_id(&self) -> PublicKey;

    /// Current nospam.
    fn nospam(&self) -> Nospam;

    /// Replace the nospam, which changes [`address`](Self::address).
    fn set_nospam(&mut self, nospam: Nospam);

    /// Bound UDP port.
    fn udp_port(&self) -> Result<u16, EngineError>;

    /// Own display name.
    fn self_name(&self) -> String;

    /// Set own display name. Propagated to online friends.
    fn set_self_name(&mut self, name: &str) -> Result<(), EngineError>;

    /// Own status message.
    fn self_status_message(&self) -> String;

    /// Set own status message. Propagated to online friends.
    fn set_self_status_message(&mut self, message: &str) -> Result<(), EngineError>;

    /// Own presence.
    fn self_status(&self) -> UserStatus;

    /// Set own presence. Propagated to online friends.
    fn set_self_status(&mut self, status: UserStatus);

    /// Own connection to the network.
    fn self_connection_status(&self) -> ConnectionStatus;

    /// Tell `friend` whether we are typing.
    fn set_typing(&mut self, friend: FriendId, typing: bool) -> Result<(), EngineError>;

    /// Queue a DHT bootstrap through `node`. Non-blocking.
    fn bootstrap(&mut self, node: &BootstrapNode) -> Result<(), EngineError>;

    /// Register `node` as a TCP relay. Non-blocking.
    fn add_tcp_relay(&mut self, node: &BootstrapNode) -> Result<(), EngineError>;

    /// Send a friend request to `address` carrying `message`.
    fn friend_add(&mut self, address: &Address, message: &[u8])
    -> Result<FriendId, EngineError>;

    /// Add `public_key` as a friend without sending a request.
    fn friend_add_norequest(&mut self, public_key: &PublicKey) -> Result<FriendId, EngineError>;

    /// Remove a friend. The id becomes invalid.
    fn friend_delete(&mut self, friend: FriendId) -> Result<(), EngineError>;

    /// Whether `friend` is a valid id.
    fn friend_exists(&self, friend: FriendId) -> bool;

    /// All valid friend ids in ascending order.
    fn friend_list(&self) -> Vec<FriendId>;

    /// Number of friends.
    fn friend_list_size(&self) -> usize;

    /// Id of the friend with `public_key`.
    fn friend_by_public_key(&self, public_key: &PublicKey) -> Result<FriendId, EngineError>;

    /// Public key of `friend`.
    fn friend_public_key(&self, friend: FriendId) -> Result<PublicKey, EngineError>;

    /// Last reported connection status of `friend`.
    fn friend_connection_status(&self, friend: FriendId) -> Result<ConnectionStatus, EngineError>;

    /// Last reported presence of `friend`.
    fn friend_status(&self, friend: FriendId) -> Result<UserStatus, EngineError>;

    /// Last reported status message of `friend`.
    fn friend_status_message(&self, friend: FriendId) -> Result<String, EngineError>;

    /// Last reported display name of `friend`.
    fn friend_name(&self, friend: FriendId) -> Result<String, EngineError>;

    /// Last reported typing flag of `friend`.
    fn friend_typing(&self, friend: FriendId) -> Result<bool, EngineError>;

    /// Unix seconds when `friend` was last seen online.
    fn friend_last_online(&self, friend: FriendId) -> Result<u64, EngineError>;

    /// Send a message. The id is echoed by the friend's read receipt.
    fn friend_send_message(
        &mut self,
        friend: FriendId,
        kind: MessageType,
        message: &[u8],
    ) -> Result<MessageId, EngineError>;

    /// Offer a file to `friend`. A random id is chosen when `file_id` is `None`.
    fn file_send(
        &mut self,
        friend: FriendId,
        kind: FileKind,
        size: u64,
        file_id: Option<FileId>,
        filename: &[u8],
    ) -> Result<FileNumber, EngineError>;

    /// Answer a chunk request with `data` at `position`.
    fn file_send_chunk(
        &mut self,
        friend: FriendId,
        file: FileNumber,
        position: u64,
        data: &[u8],
    ) -> Result<(), EngineError>;

    /// Send a control for a transfer in either direction.
    fn file_control(
        &mut self,
        friend: FriendId,
        file: FileNumber,
        control: FileControl,
    ) -> Result<(), EngineError>;

    /// Move the start of an incoming transfer before it is resumed.
    fn file_seek(
        &mut self,
        friend: FriendId,
        file: FileNumber,
        position: u64,
    ) -> Result<(), EngineError>;

    /// Stable id of a transfer.
    fn file_id(&self, friend: FriendId, file: FileNumber) -> Result<FileId, EngineError>;

    /// Serialize persistent state. Restore through
    /// [`EngineOptions::savedata`].
    fn savedata(&self) -> Result<Vec<u8>, EngineError>;
}

/// Builds engines for a session.
pub trait EngineFactory: Send + Sync {
    /// Create a peer called `name`.
    ///
    /// When `options.savedata` is set the engine restores identity, profile and
    /// friend list from it.
    fn create(
        &self,
        name: &str,
        options: &EngineOptions,
    ) -> Result<Box<dyn ProtocolEngine>, EngineError>;
}
