//! One simulated peer.
//!
//! A [`SimEngine`] keeps its own friend table and transfer state and talks
//! to other engines only through the [`SimNetwork`] inbox. Every operation
//! returns immediately; anything that needs the other side happens in a later
//! [`iterate`](ProtocolEngine::iterate) of one of the two engines.
//!
//! # Friends
//!
//! A friend is online once any packet from it arrives. Both sides send a
//! keepalive `Hello` every `keepalive` iterations and drop the friend after
//! `timeout` silent iterations. Coming online pushes our name, status message
//! and status to the friend, so the other side always sees a `FriendStatus`
//! right after connecting.
//!
//! # Files
//!
//! The sender numbers its transfers `0, 1, ..`. The receiver sees transfer
//! `n` as `(n + 1) << 16`, which keeps both ranges apart in `file_control`.

use std::{
    collections::{BTreeMap, HashSet},
    fmt, mem,
    time::Duration,
};

use bytes::Bytes;
use duet_core::{
    Address, BootstrapNode, ConnectionStatus, EngineError, EngineEvent, EngineOptions, FILE_ID_SIZE,
    FileControl, FileId, FileKind, FileNumber, FriendId, MAX_FILENAME_LENGTH,
    MAX_FRIEND_REQUEST_LENGTH, MAX_MESSAGE_LENGTH, MAX_NAME_LENGTH, MAX_STATUS_MESSAGE_LENGTH,
    MessageId, MessageType, Nospam, PUBLIC_KEY_SIZE, ProtocolEngine, PublicKey, SECRET_KEY_SIZE,
    SecretKey, UserStatus,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{
    SimConfig,
    network::{Packet, SimNetwork},
};

/// First port reported by `udp_port`.
const UDP_PORT_BASE: u16 = 33445;

/// Shift separating receiver-side file numbers from sender-side ones.
const RECEIVER_FILE_SHIFT: u32 = 16;

/// Which side of a transfer a file number names.
#[derive(Debug, Clone, Copy)]
enum FileSide {
    Sending(u32),
    Receiving(u32),
}

impl FileSide {
    fn of(file: FileNumber) -> Self {
        if file.0 >= 1 << RECEIVER_FILE_SHIFT {
            Self::Receiving((file.0 >> RECEIVER_FILE_SHIFT) - 1)
        } else {
            Self::Sending(file.0)
        }
    }
}

fn receiving_number(n: u32) -> FileNumber {
    FileNumber((n + 1) << RECEIVER_FILE_SHIFT)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferState {
    /// Offered, not yet accepted
    Offered,
    Running,
    Paused,
}

#[derive(Debug)]
struct Outgoing {
    size: u64,
    file_id: FileId,
    state: TransferState,
    /// Next position to request from the application
    requested: u64,
    /// Next position the application must supply
    written: u64,
    finished: bool,
}

#[derive(Debug)]
struct Incoming {
    size: u64,
    file_id: FileId,
    state: TransferState,
    position: u64,
    finished: bool,
}

#[derive(Debug)]
struct PendingRequest {
    nospam: Nospam,
    message: Vec<u8>,
    next_send: u64,
}

#[derive(Debug)]
struct Friend {
    public_key: PublicKey,
    connection: ConnectionStatus,
    last_seen: u64,
    next_hello: u64,
    last_online: u64,
    name: String,
    status_message: String,
    status: UserStatus,
    typing: bool,
    request: Option<PendingRequest>,
    outgoing: BTreeMap<u32, Outgoing>,
    incoming: BTreeMap<u32, Incoming>,
}

impl Friend {
    fn new(public_key: PublicKey, tick: u64, request: Option<PendingRequest>) -> Self {
        Self {
            public_key,
            connection: ConnectionStatus::Offline,
            last_seen: tick,
            next_hello: tick,
            last_online: 0,
            name: String::new(),
            status_message: String::new(),
            status: UserStatus::Online,
            typing: false,
            request,
            outgoing: BTreeMap::new(),
            incoming: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Join {
    remaining: u32,
    relay: bool,
}

/// Persistent part of an engine, encoded as CBOR.
#[derive(Debug, Serialize, Deserialize)]
struct SavedState {
    secret_key: SecretKey,
    public_key: PublicKey,
    nospam: Nospam,
    name: String,
    status_message: String,
    friends: Vec<(u32, PublicKey)>,
}

impl SavedState {
    fn decode(bytes: &[u8]) -> Result<Self, EngineError> {
        let state: Self =
            ciborium::from_reader(bytes).map_err(|e| EngineError::Savedata(e.to_string()))?;
        if derive_public_key(&state.secret_key) != state.public_key {
            return Err(EngineError::Savedata("public key does not match secret key".into()));
        }
        Ok(state)
    }
}

fn derive_public_key(secret_key: &SecretKey) -> PublicKey {
    let digest: [u8; PUBLIC_KEY_SIZE] =
        Sha256::new().chain_update(b"duet-sim").chain_update(secret_key.as_bytes()).finalize().into();
    PublicKey::from_bytes(digest)
}

fn check_node(node: &BootstrapNode) -> Result<(), EngineError> {
    if node.host.is_empty() || node.port == 0 {
        return Err(EngineError::BadBootstrapNode { host: node.host.clone(), port: node.port });
    }
    Ok(())
}

fn check_len(len: usize, max: usize) -> Result<(), EngineError> {
    if len > max {
        return Err(EngineError::MessageTooLong { len, max });
    }
    Ok(())
}

/// In-memory engine attached to a [`SimNetwork`].
pub struct SimEngine {
    id: u64,
    name: String,
    network: SimNetwork,
    config: SimConfig,
    udp: bool,
    tick: u64,
    secret_key: SecretKey,
    public_key: PublicKey,
    dht_id: PublicKey,
    nospam: Nospam,
    self_name: String,
    status_message: String,
    status: UserStatus,
    connection: ConnectionStatus,
    joining: Option<Join>,
    friends: BTreeMap<FriendId, Friend>,
    seen_requests: HashSet<PublicKey>,
    next_message: u32,
    events: Vec<EngineEvent>,
}

impl SimEngine {
    /// Create an engine on `network`, restoring `options.savedata` if set.
    pub fn new(network: SimNetwork, name: &str, options: &EngineOptions) -> Result<Self, EngineError> {
        let env = network.env().clone();
        let restored = options.savedata.as_deref().map(SavedState::decode).transpose()?;

        let random_key = || {
            let mut bytes = [0u8; SECRET_KEY_SIZE];
            env.random_bytes(&mut bytes);
            bytes
        };

        let (secret_key, nospam) = match &restored {
            Some(state) => (state.secret_key.clone(), state.nospam),
            None => (SecretKey::from_bytes(random_key()), Nospam(env.random_u32())),
        };
        let public_key = derive_public_key(&secret_key);
        let dht_id = PublicKey::from_bytes(random_key());

        let mut friends = BTreeMap::new();
        let (self_name, status_message) = match restored {
            Some(state) => {
                for (id, key) in state.friends {
                    friends.insert(FriendId(id), Friend::new(key, 0, None));
                }
                (state.name, state.status_message)
            },
            None => (String::new(), String::new()),
        };

        let id = network.attach(public_key);
        tracing::debug!(engine = name, id, %public_key, friends = friends.len(), "sim engine created");

        Ok(Self {
            id,
            name: name.to_owned(),
            config: network.config().clone(),
            network,
            udp: options.effective_udp(),
            tick: 0,
            secret_key,
            public_key,
            dht_id,
            nospam,
            self_name,
            status_message,
            status: UserStatus::Online,
            connection: ConnectionStatus::Offline,
            joining: None,
            friends,
            seen_requests: HashSet::new(),
            next_message: 0,
            events: Vec::new(),
        })
    }

    /// Name the engine was created with.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, to: &PublicKey, packet: Packet) -> bool {
        self.network.send(self.id, self.public_key, to, packet)
    }

    fn broadcast(&self, packet: &Packet) {
        for friend in self.friends.values().filter(|f| f.connection.is_connected()) {
            self.send(&friend.public_key, packet.clone());
        }
    }

    fn friend(&self, id: FriendId) -> Result<&Friend, EngineError> {
        self.friends.get(&id).ok_or(EngineError::FriendNotFound(id))
    }

    fn online_friend(&mut self, id: FriendId) -> Result<&mut Friend, EngineError> {
        let friend = self.friends.get_mut(&id).ok_or(EngineError::FriendNotFound(id))?;
        if !friend.connection.is_connected() {
            return Err(EngineError::FriendNotConnected(id));
        }
        Ok(friend)
    }

    fn find_friend(&self, key: &PublicKey) -> Option<FriendId> {
        self.friends.iter().find(|(_, f)| f.public_key == *key).map(|(id, _)| *id)
    }

    fn insert_friend(&mut self, key: PublicKey, request: Option<PendingRequest>) -> FriendId {
        let mut id = FriendId(0);
        while self.friends.contains_key(&id) {
            id = id.successor();
        }
        self.seen_requests.remove(&key);
        self.friends.insert(id, Friend::new(key, self.tick, request));
        id
    }

    fn link_status(&self) -> ConnectionStatus {
        if self.connection == ConnectionStatus::ConnectedTcp {
            ConnectionStatus::ConnectedTcp
        } else {
            ConnectionStatus::ConnectedUdp
        }
    }

    fn join_through(&mut self, node: &BootstrapNode, relay: bool) {
        if self.connection.is_connected() || self.joining.is_some() {
            return;
        }
        if !self.network.is_live(node) {
            tracing::trace!(engine = %self.name, %node, "node does not answer");
            return;
        }
        self.joining = Some(Join { remaining: self.config.join_delay.max(1), relay });
    }

    fn advance_join(&mut self) {
        let Some(join) = self.joining.as_mut() else {
            return;
        };
        join.remaining = join.remaining.saturating_sub(1);
        if join.remaining > 0 {
            return;
        }

        let relay = join.relay;
        self.joining = None;
        self.connection = if relay || !self.udp {
            ConnectionStatus::ConnectedTcp
        } else {
            ConnectionStatus::ConnectedUdp
        };
        self.network.set_online(self.id);
        tracing::debug!(engine = %self.name, status = ?self.connection, "sim engine connected");
        self.events.push(EngineEvent::SelfConnectionStatus { status: self.connection });
    }

    fn mark_online(&mut self, id: FriendId) {
        let status = self.link_status();
        let now = self.network.env().unix_time();
        let Some(friend) = self.friends.get_mut(&id) else {
            return;
        };
        friend.connection = status;
        friend.last_online = now;
        friend.request = None;
        let key = friend.public_key;

        tracing::debug!(engine = %self.name, friend = %id, "friend online");
        self.events.push(EngineEvent::FriendConnectionStatus { friend: id, status });
        self.send(&key, Packet::HelloAck);
        self.send(&key, Packet::Name(self.self_name.clone()));
        self.send(&key, Packet::StatusMessage(self.status_message.clone()));
        self.send(&key, Packet::Status(self.status));
    }

    fn on_packet(&mut self, from: PublicKey, packet: Packet) {
        if let Packet::FriendRequest { nospam, message } = packet {
            self.on_friend_request(from, nospam, message);
            return;
        }
        let Some(id) = self.find_friend(&from) else {
            tracing::trace!(engine = %self.name, %from, "packet from stranger dropped");
            return;
        };

        let tick = self.tick;
        let online = self.friends.get_mut(&id).is_some_and(|f| {
            f.last_seen = tick;
            f.connection.is_connected()
        });
        if !online {
            self.mark_online(id);
        }
        self.on_friend_packet(id, packet);
    }

    fn on_friend_request(&mut self, from: PublicKey, nospam: Nospam, message: Vec<u8>) {
        if nospam != self.nospam {
            tracing::debug!(engine = %self.name, %from, "friend request with stale nospam dropped");
            return;
        }
        if self.find_friend(&from).is_some() || !self.seen_requests.insert(from) {
            return;
        }
        self.events.push(EngineEvent::FriendRequest { public_key: from, message });
    }

    fn on_friend_packet(&mut self, id: FriendId, packet: Packet) {
        let Some(friend) = self.friends.get_mut(&id) else {
            return;
        };
        let key = friend.public_key;

        match packet {
            Packet::FriendRequest { .. } | Packet::Hello | Packet::HelloAck => {},
            Packet::Name(name) => {
                friend.name.clone_from(&name);
                self.events.push(EngineEvent::FriendName { friend: id, name });
            },
            Packet::StatusMessage(message) => {
                friend.status_message.clone_from(&message);
                self.events.push(EngineEvent::FriendStatusMessage { friend: id, message });
            },
            Packet::Status(status) => {
                friend.status = status;
                self.events.push(EngineEvent::FriendStatus { friend: id, status });
            },
            Packet::Typing(typing) => {
                friend.typing = typing;
                self.events.push(EngineEvent::FriendTyping { friend: id, typing });
            },
            Packet::Message { id: message_id, kind, body } => {
                self.events.push(EngineEvent::FriendMessage { friend: id, kind, message: body });
                self.send(&key, Packet::Receipt(message_id));
            },
            Packet::Receipt(message) => {
                self.events.push(EngineEvent::FriendReadReceipt { friend: id, message });
            },
            Packet::FileOffer { file, kind, size, file_id, filename } => {
                friend.incoming.insert(
                    file,
                    Incoming {
                        size,
                        file_id,
                        state: TransferState::Offered,
                        position: 0,
                        finished: false,
                    },
                );
                let file = receiving_number(file);
                self.events.push(EngineEvent::FileRecv { friend: id, file, kind, size, filename });
            },
            Packet::FileSeek { file, position } => {
                if let Some(out) = friend.outgoing.get_mut(&file)
                    && out.state == TransferState::Offered
                    && position <= out.size
                {
                    out.requested = position;
                    out.written = position;
                }
            },
            Packet::FileControl { file, control, to_sender: true } => {
                let known = match control {
                    FileControl::Cancel => friend.outgoing.remove(&file).is_some(),
                    FileControl::Resume | FileControl::Pause => {
                        friend.outgoing.get_mut(&file).map(|out| out.state = remote_state(control)).is_some()
                    },
                };
                if known {
                    self.events.push(EngineEvent::FileRecvControl {
                        friend: id,
                        file: FileNumber(file),
                        control,
                    });
                }
            },
            Packet::FileControl { file, control, to_sender: false } => {
                let known = match control {
                    FileControl::Cancel => friend.incoming.remove(&file).is_some(),
                    FileControl::Resume | FileControl::Pause => {
                        friend.incoming.get_mut(&file).map(|inc| inc.state = remote_state(control)).is_some()
                    },
                };
                if known {
                    self.events.push(EngineEvent::FileRecvControl {
                        friend: id,
                        file: receiving_number(file),
                        control,
                    });
                }
            },
            Packet::FileChunk { file, position, data } => {
                let Some(inc) = friend.incoming.get_mut(&file) else {
                    return;
                };
                if position != inc.position {
                    tracing::warn!(engine = %self.name, friend = %id, position, expected = inc.position, "chunk out of order dropped");
                    return;
                }
                inc.position += data.len() as u64;
                self.events.push(EngineEvent::FileRecvChunk {
                    friend: id,
                    file: receiving_number(file),
                    position,
                    data,
                });
            },
        }
    }

    fn maintain_friends(&mut self) {
        let tick = self.tick;
        let keepalive = u64::from(self.config.keepalive.max(1));
        let resend = u64::from(self.config.request_resend.max(1));
        let timeout = u64::from(self.config.timeout);
        let now = self.network.env().unix_time();

        let mut outbox = Vec::new();
        let mut lost = Vec::new();
        for (&id, friend) in &mut self.friends {
            if tick >= friend.next_hello {
                friend.next_hello = tick + keepalive;
                outbox.push((friend.public_key, Packet::Hello));
            }
            if let Some(request) = friend.request.as_mut()
                && tick >= request.next_send
            {
                request.next_send = tick + resend;
                outbox.push((
                    friend.public_key,
                    Packet::FriendRequest { nospam: request.nospam, message: request.message.clone() },
                ));
            }
            if friend.connection.is_connected() && tick.saturating_sub(friend.last_seen) > timeout {
                friend.connection = ConnectionStatus::Offline;
                friend.last_online = now;
                friend.outgoing.clear();
                friend.incoming.clear();
                lost.push(id);
            }
        }

        for id in lost {
            tracing::debug!(engine = %self.name, friend = %id, "friend timed out");
            self.events
                .push(EngineEvent::FriendConnectionStatus { friend: id, status: ConnectionStatus::Offline });
        }
        for (key, packet) in outbox {
            self.send(&key, packet);
        }
    }

    fn pump_transfers(&mut self) {
        let chunk = self.config.chunk_size.max(1) as u64;
        let window = chunk * self.config.chunks_per_iterate.max(1) as u64;

        for (&id, friend) in &mut self.friends {
            for (&n, out) in &mut friend.outgoing {
                if out.state != TransferState::Running || out.finished {
                    continue;
                }
                while out.requested < out.size && out.requested - out.written < window {
                    let length = (out.size - out.requested).min(chunk);
                    self.events.push(EngineEvent::FileChunkRequest {
                        friend: id,
                        file: FileNumber(n),
                        position: out.requested,
                        length: length as usize,
                    });
                    out.requested += length;
                }
                if out.written == out.size {
                    out.finished = true;
                    self.events.push(EngineEvent::FileChunkRequest {
                        friend: id,
                        file: FileNumber(n),
                        position: out.size,
                        length: 0,
                    });
                }
            }

            for (&n, inc) in &mut friend.incoming {
                if inc.state == TransferState::Running && !inc.finished && inc.position == inc.size {
                    inc.finished = true;
                    self.events.push(EngineEvent::FileRecvChunk {
                        friend: id,
                        file: receiving_number(n),
                        position: inc.size,
                        data: Bytes::new(),
                    });
                }
            }
        }
    }
}

fn remote_state(control: FileControl) -> TransferState {
    match control {
        FileControl::Pause => TransferState::Paused,
        FileControl::Resume | FileControl::Cancel => TransferState::Running,
    }
}

fn local_transition(
    state: TransferState,
    control: FileControl,
    friend: FriendId,
    file: FileNumber,
    accepting: bool,
) -> Result<TransferState, EngineError> {
    match (control, state) {
        (FileControl::Resume, TransferState::Paused) => Ok(TransferState::Running),
        (FileControl::Resume, TransferState::Offered) if accepting => Ok(TransferState::Running),
        (FileControl::Pause, TransferState::Running) => Ok(TransferState::Paused),
        _ => Err(EngineError::FileDenied { friend, file }),
    }
}

impl Drop for SimEngine {
    fn drop(&mut self) {
        self.network.detach(self.id, &self.public_key);
    }
}

impl fmt::Debug for SimEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimEngine")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("connection", &self.connection)
            .field("friends", &self.friends.len())
            .finish_non_exhaustive()
    }
}

impl ProtocolEngine for SimEngine {
    fn iterate(&mut self) -> Vec<EngineEvent> {
        self.tick += 1;
        self.network.advance_clock();
        self.advance_join();

        for (from, packet) in self.network.receive(self.id) {
            self.on_packet(from, packet);
        }
        if self.connection.is_connected() {
            self.maintain_friends();
        }
        self.pump_transfers();

        mem::take(&mut self.events)
    }

    fn iteration_interval(&self) -> Duration {
        self.config.iteration_interval()
    }

    fn address(&self) -> Address {
        Address::new(self.public_key, self.nospam)
    }

    fn public_key(&self) -> PublicKey {
        self.public_key
    }

    fn secret_key(&self) -> SecretKey {
        self.secret_key.clone()
    }

    fn dht_id(&self) -> PublicKey {
        self.dht_id
    }

    fn nospam(&self) -> Nospam {
        self.nospam
    }

    fn set_nospam(&mut self, nospam: Nospam) {
        self.nospam = nospam;
    }

    fn udp_port(&self) -> Result<u16, EngineError> {
        if !self.udp {
            return Err(EngineError::Unsupported("udp is disabled"));
        }
        Ok(UDP_PORT_BASE.wrapping_add(self.id as u16))
    }

    fn self_name(&self) -> String {
        self.self_name.clone()
    }

    fn set_self_name(&mut self, name: &str) -> Result<(), EngineError> {
        check_len(name.len(), MAX_NAME_LENGTH)?;
        name.clone_into(&mut self.self_name);
        self.broadcast(&Packet::Name(name.to_owned()));
        Ok(())
    }

    fn self_status_message(&self) -> String {
        self.status_message.clone()
    }

    fn set_self_status_message(&mut self, message: &str) -> Result<(), EngineError> {
        check_len(message.len(), MAX_STATUS_MESSAGE_LENGTH)?;
        message.clone_into(&mut self.status_message);
        self.broadcast(&Packet::StatusMessage(message.to_owned()));
        Ok(())
    }

    fn self_status(&self) -> UserStatus {
        self.status
    }

    fn set_self_status(&mut self, status: UserStatus) {
        self.status = status;
        self.broadcast(&Packet::Status(status));
    }

    fn self_connection_status(&self) -> ConnectionStatus {
        if self.joining.is_some() && !self.connection.is_connected() {
            ConnectionStatus::Pending
        } else {
            self.connection
        }
    }

    fn set_typing(&mut self, friend: FriendId, typing: bool) -> Result<(), EngineError> {
        let entry = self.friend(friend)?;
        if entry.connection.is_connected() {
            let key = entry.public_key;
            self.send(&key, Packet::Typing(typing));
        }
        Ok(())
    }

    fn bootstrap(&mut self, node: &BootstrapNode) -> Result<(), EngineError> {
        check_node(node)?;
        if !self.udp {
            tracing::trace!(engine = %self.name, %node, "udp disabled, bootstrap ignored");
            return Ok(());
        }
        self.join_through(node, false);
        Ok(())
    }

    fn add_tcp_relay(&mut self, node: &BootstrapNode) -> Result<(), EngineError> {
        check_node(node)?;
        self.join_through(node, true);
        Ok(())
    }

    fn friend_add(&mut self, address: &Address, message: &[u8]) -> Result<FriendId, EngineError> {
        if message.is_empty() {
            return Err(EngineError::NoMessage);
        }
        check_len(message.len(), MAX_FRIEND_REQUEST_LENGTH)?;
        let key = address.public_key();
        if key == self.public_key {
            return Err(EngineError::OwnKey);
        }
        if self.find_friend(&key).is_some() {
            return Err(EngineError::AlreadySent);
        }

        let request =
            PendingRequest { nospam: address.nospam(), message: message.to_vec(), next_send: self.tick };
        Ok(self.insert_friend(key, Some(request)))
    }

    fn friend_add_norequest(&mut self, public_key: &PublicKey) -> Result<FriendId, EngineError> {
        if *public_key == self.public_key {
            return Err(EngineError::OwnKey);
        }
        if self.find_friend(public_key).is_some() {
            return Err(EngineError::AlreadySent);
        }
        Ok(self.insert_friend(*public_key, None))
    }

    fn friend_delete(&mut self, friend: FriendId) -> Result<(), EngineError> {
        self.friends.remove(&friend).map(drop).ok_or(EngineError::FriendNotFound(friend))
    }

    fn friend_exists(&self, friend: FriendId) -> bool {
        self.friends.contains_key(&friend)
    }

    fn friend_list(&self) -> Vec<FriendId> {
        self.friends.keys().copied().collect()
    }

    fn friend_list_size(&self) -> usize {
        self.friends.len()
    }

    fn friend_by_public_key(&self, public_key: &PublicKey) -> Result<FriendId, EngineError> {
        self.find_friend(public_key).ok_or(EngineError::PublicKeyNotFound(*public_key))
    }

    fn friend_public_key(&self, friend: FriendId) -> Result<PublicKey, EngineError> {
        Ok(self.friend(friend)?.public_key)
    }

    fn friend_connection_status(&self, friend: FriendId) -> Result<ConnectionStatus, EngineError> {
        Ok(self.friend(friend)?.connection)
    }

    fn friend_status(&self, friend: FriendId) -> Result<UserStatus, EngineError> {
        Ok(self.friend(friend)?.status)
    }

    fn friend_status_message(&self, friend: FriendId) -> Result<String, EngineError> {
        Ok(self.friend(friend)?.status_message.clone())
    }

    fn friend_name(&self, friend: FriendId) -> Result<String, EngineError> {
        Ok(self.friend(friend)?.name.clone())
    }

    fn friend_typing(&self, friend: FriendId) -> Result<bool, EngineError> {
        Ok(self.friend(friend)?.typing)
    }

    fn friend_last_online(&self, friend: FriendId) -> Result<u64, EngineError> {
        let entry = self.friend(friend)?;
        if entry.connection.is_connected() {
            Ok(self.network.env().unix_time())
        } else {
            Ok(entry.last_online)
        }
    }

    fn friend_send_message(
        &mut self,
        friend: FriendId,
        kind: MessageType,
        message: &[u8],
    ) -> Result<MessageId, EngineError> {
        if message.is_empty() {
            return Err(EngineError::NoMessage);
        }
        check_len(message.len(), MAX_MESSAGE_LENGTH)?;
        let key = self.online_friend(friend)?.public_key;

        let id = MessageId(self.next_message);
        self.next_message = self.next_message.wrapping_add(1);
        self.send(&key, Packet::Message { id, kind, body: message.to_vec() });
        Ok(id)
    }

    fn file_send(
        &mut self,
        friend: FriendId,
        kind: FileKind,
        size: u64,
        file_id: Option<FileId>,
        filename: &[u8],
    ) -> Result<FileNumber, EngineError> {
        check_len(filename.len(), MAX_FILENAME_LENGTH)?;
        let file_id = file_id.unwrap_or_else(|| {
            let mut bytes = [0u8; FILE_ID_SIZE];
            self.network.env().random_bytes(&mut bytes);
            FileId(bytes)
        });

        let entry = self.online_friend(friend)?;
        let mut n = 0;
        while entry.outgoing.contains_key(&n) {
            n += 1;
        }
        if n >= 1 << RECEIVER_FILE_SHIFT {
            return Err(EngineError::SendQueueFull);
        }
        entry.outgoing.insert(
            n,
            Outgoing {
                size,
                file_id,
                state: TransferState::Offered,
                requested: 0,
                written: 0,
                finished: false,
            },
        );
        let key = entry.public_key;

        self.send(&key, Packet::FileOffer { file: n, kind, size, file_id, filename: filename.to_vec() });
        Ok(FileNumber(n))
    }

    fn file_send_chunk(
        &mut self,
        friend: FriendId,
        file: FileNumber,
        position: u64,
        data: &[u8],
    ) -> Result<(), EngineError> {
        let chunk = self.config.chunk_size.max(1) as u64;
        let entry = self.online_friend(friend)?;
        let FileSide::Sending(n) = FileSide::of(file) else {
            return Err(EngineError::FileNotFound { friend, file });
        };
        let out = entry.outgoing.get_mut(&n).ok_or(EngineError::FileNotFound { friend, file })?;
        if out.state != TransferState::Running {
            return Err(EngineError::FileDenied { friend, file });
        }
        let expected = out.size.saturating_sub(position).min(chunk);
        if position != out.written || position >= out.size || data.len() as u64 != expected {
            return Err(EngineError::FileBadPosition { friend, file, position });
        }
        out.written += expected;
        let key = entry.public_key;

        self.send(&key, Packet::FileChunk { file: n, position, data: Bytes::copy_from_slice(data) });
        Ok(())
    }

    fn file_control(
        &mut self,
        friend: FriendId,
        file: FileNumber,
        control: FileControl,
    ) -> Result<(), EngineError> {
        let entry = self.online_friend(friend)?;
        let missing = EngineError::FileNotFound { friend, file };

        let (n, to_sender) = match FileSide::of(file) {
            FileSide::Sending(n) => {
                if control == FileControl::Cancel {
                    entry.outgoing.remove(&n).ok_or(missing)?;
                } else {
                    let out = entry.outgoing.get_mut(&n).ok_or(missing)?;
                    out.state = local_transition(out.state, control, friend, file, false)?;
                }
                (n, false)
            },
            FileSide::Receiving(n) => {
                if control == FileControl::Cancel {
                    entry.incoming.remove(&n).ok_or(missing)?;
                } else {
                    let inc = entry.incoming.get_mut(&n).ok_or(missing)?;
                    inc.state = local_transition(inc.state, control, friend, file, true)?;
                }
                (n, true)
            },
        };
        let key = entry.public_key;

        self.send(&key, Packet::FileControl { file: n, control, to_sender });
        Ok(())
    }

    fn file_seek(&mut self, friend: FriendId, file: FileNumber, position: u64) -> Result<(), EngineError> {
        let entry = self.online_friend(friend)?;
        let FileSide::Receiving(n) = FileSide::of(file) else {
            return Err(EngineError::FileDenied { friend, file });
        };
        let inc = entry.incoming.get_mut(&n).ok_or(EngineError::FileNotFound { friend, file })?;
        if inc.state != TransferState::Offered {
            return Err(EngineError::FileNotPaused { friend, file });
        }
        if position >= inc.size {
            return Err(EngineError::FileBadPosition { friend, file, position });
        }
        inc.position = position;
        let key = entry.public_key;

        self.send(&key, Packet::FileSeek { file: n, position });
        Ok(())
    }

    fn file_id(&self, friend: FriendId, file: FileNumber) -> Result<FileId, EngineError> {
        let entry = self.friend(friend)?;
        let found = match FileSide::of(file) {
            FileSide::Sending(n) => entry.outgoing.get(&n).map(|out| out.file_id),
            FileSide::Receiving(n) => entry.incoming.get(&n).map(|inc| inc.file_id),
        };
        found.ok_or(EngineError::FileNotFound { friend, file })
    }

    fn savedata(&self) -> Result<Vec<u8>, EngineError> {
        let state = SavedState {
            secret_key: self.secret_key.clone(),
            public_key: self.public_key,
            nospam: self.nospam,
            name: self.self_name.clone(),
            status_message: self.status_message.clone(),
            friends: self.friends.iter().map(|(id, f)| (id.0, f.public_key)).collect(),
        };
        let mut bytes = Vec::new();
        ciborium::into_writer(&state, &mut bytes).map_err(|e| EngineError::Savedata(e.to_string()))?;
        Ok(bytes)
    }
}
