//! Shared medium between simulated engines.
//!
//! Every engine attached to a [`SimNetwork`] has an inbox. Sending a packet
//! samples a latency, counted in iterations of the recipient, and appends it
//! to the recipient's inbox. Packets from one sender to one recipient never
//! overtake each other. Only handshake packets can be lost; everything after
//! the handshake is delivered reliably, as a real session layer would.
//!
//! The engine lock is always taken before the network lock. The network never
//! calls back into an engine.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use duet_core::{
    BootstrapNode, EngineError, EngineFactory, EngineOptions, Environment, FileControl, FileId,
    FileKind, MessageId, MessageType, Nospam, PUBLIC_KEY_SIZE, ProtocolEngine, PublicKey,
    UserStatus,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{SimConfig, SimEngine, SimEnv};

/// Port live and dead bootstrap nodes listen on.
const NODE_UDP_PORT: u16 = 33445;

/// Port live nodes accept relay connections on.
const NODE_TCP_PORT: u16 = 443;

/// What one engine sends another.
#[derive(Debug, Clone)]
pub(super) enum Packet {
    FriendRequest { nospam: Nospam, message: Vec<u8> },
    Hello,
    HelloAck,
    Name(String),
    StatusMessage(String),
    Status(UserStatus),
    Typing(bool),
    Message { id: MessageId, kind: MessageType, body: Vec<u8> },
    Receipt(MessageId),
    FileOffer { file: u32, kind: FileKind, size: u64, file_id: FileId, filename: Vec<u8> },
    FileSeek { file: u32, position: u64 },
    FileControl { file: u32, control: FileControl, to_sender: bool },
    FileChunk { file: u32, position: u64, data: Bytes },
}

impl Packet {
    fn is_lossy(&self) -> bool {
        matches!(self, Self::FriendRequest { .. } | Self::Hello | Self::HelloAck)
    }
}

struct InFlight {
    from: PublicKey,
    remaining: u32,
    packet: Packet,
}

#[derive(Default)]
struct Node {
    inbox: Vec<InFlight>,
    online: bool,
}

struct NetState {
    rng: ChaCha8Rng,
    nodes: HashMap<u64, Node>,
    by_key: HashMap<PublicKey, u64>,
    next_id: u64,
    endpoints: HashSet<(String, u16)>,
    node_list: Vec<BootstrapNode>,
}

/// Simulated network and engine factory.
///
/// Clones share the same medium.
#[derive(Clone)]
pub struct SimNetwork {
    config: Arc<SimConfig>,
    env: Arc<dyn Environment>,
    clock: Option<Arc<SimEnv>>,
    state: Arc<Mutex<NetState>>,
}

impl SimNetwork {
    /// Network whose identities, latencies and losses replay from
    /// `config.seed`.
    pub fn new(config: SimConfig) -> Self {
        let env = Arc::new(SimEnv::with_seed(config.seed));
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self::build(config, env.clone(), Some(env), rng)
    }

    /// Network drawing identities and its own seed from `env`.
    pub fn with_env(config: SimConfig, env: Arc<dyn Environment>) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(env.random_u64());
        Self::build(config, env, None, rng)
    }

    fn build(
        config: SimConfig,
        env: Arc<dyn Environment>,
        clock: Option<Arc<SimEnv>>,
        rng: ChaCha8Rng,
    ) -> Self {
        let mut node_list = Vec::with_capacity(2 * config.live_nodes + config.dead_nodes);
        let mut endpoints = HashSet::new();
        let node_key = || {
            let mut key = [0u8; PUBLIC_KEY_SIZE];
            env.random_bytes(&mut key);
            PublicKey::from_bytes(key)
        };

        for i in 0..config.live_nodes {
            let host = format!("10.66.0.{i}");
            node_list.push(BootstrapNode::udp(host.clone(), NODE_UDP_PORT).with_key(node_key()));
            endpoints.insert((host, NODE_UDP_PORT));
        }
        for i in 0..config.dead_nodes {
            node_list.push(BootstrapNode::udp(format!("10.66.1.{i}"), NODE_UDP_PORT).with_key(node_key()));
        }
        for i in 0..config.live_nodes {
            let host = format!("10.66.0.{i}");
            node_list.push(BootstrapNode::tcp(host.clone(), NODE_TCP_PORT).with_key(node_key()));
            endpoints.insert((host, NODE_TCP_PORT));
        }

        let state = NetState {
            rng,
            nodes: HashMap::new(),
            by_key: HashMap::new(),
            next_id: 0,
            endpoints,
            node_list,
        };
        Self { config: Arc::new(config), env, clock, state: Arc::new(Mutex::new(state)) }
    }

    fn state(&self) -> MutexGuard<'_, NetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configuration the network was built with.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Every bootstrap node of this network: live UDP nodes, dead UDP nodes,
    /// then TCP relays.
    pub fn node_list(&self) -> Vec<BootstrapNode> {
        self.state().node_list.clone()
    }

    /// Engines currently attached. Zero once every engine was dropped.
    pub fn live_engines(&self) -> usize {
        self.state().nodes.len()
    }

    pub(super) fn env(&self) -> &Arc<dyn Environment> {
        &self.env
    }

    pub(super) fn advance_clock(&self) {
        if let Some(clock) = &self.clock {
            clock.advance(self.config.iteration_interval());
        }
    }

    /// Attach an engine with `key`. A later engine with the same key takes
    /// over its traffic.
    pub(super) fn attach(&self, key: PublicKey) -> u64 {
        let mut state = self.state();
        let id = state.next_id;
        state.next_id += 1;
        state.nodes.insert(id, Node::default());
        state.by_key.insert(key, id);
        id
    }

    pub(super) fn detach(&self, id: u64, key: &PublicKey) {
        let mut state = self.state();
        state.nodes.remove(&id);
        if state.by_key.get(key) == Some(&id) {
            state.by_key.remove(key);
        }
    }

    pub(super) fn set_online(&self, id: u64) {
        if let Some(node) = self.state().nodes.get_mut(&id) {
            node.online = true;
        }
    }

    pub(super) fn is_live(&self, node: &BootstrapNode) -> bool {
        self.state().endpoints.contains(&(node.host.clone(), node.port))
    }

    /// Queue `packet` for the engine owning `to`.
    ///
    /// Returns whether the packet was queued. Packets from or to an offline
    /// engine are dropped, as are lost handshake packets.
    pub(super) fn send(&self, from_id: u64, from: PublicKey, to: &PublicKey, packet: Packet) -> bool {
        let config = &self.config;
        let mut guard = self.state();
        let state = &mut *guard;

        if !state.nodes.get(&from_id).is_some_and(|n| n.online) {
            return false;
        }
        let Some(&to_id) = state.by_key.get(to) else {
            return false;
        };
        if config.loss_rate > 0.0
            && packet.is_lossy()
            && state.rng.gen_bool(config.loss_rate.clamp(0.0, 1.0))
        {
            tracing::trace!(?packet, "packet lost");
            return false;
        }

        let sampled = state.rng.gen_range(config.latency_min..=config.latency_max.max(config.latency_min));
        let Some(node) = state.nodes.get_mut(&to_id).filter(|n| n.online) else {
            return false;
        };
        let behind = node.inbox.iter().filter(|p| p.from == from).map(|p| p.remaining).max();
        let remaining = behind.map_or(sampled, |b| b.max(sampled)).max(1);
        node.inbox.push(InFlight { from, remaining, packet });
        true
    }

    /// Age the inbox of `id` by one iteration and take what arrived.
    pub(super) fn receive(&self, id: u64) -> Vec<(PublicKey, Packet)> {
        let mut state = self.state();
        let Some(node) = state.nodes.get_mut(&id) else {
            return Vec::new();
        };

        let mut arrived = Vec::new();
        let mut pending = Vec::with_capacity(node.inbox.len());
        for mut flight in node.inbox.drain(..) {
            flight.remaining -= 1;
            if flight.remaining == 0 {
                arrived.push((flight.from, flight.packet));
            } else {
                pending.push(flight);
            }
        }
        node.inbox = pending;
        arrived
    }
}

impl EngineFactory for SimNetwork {
    fn create(
        &self,
        name: &str,
        options: &EngineOptions,
    ) -> Result<Box<dyn ProtocolEngine>, EngineError> {
        let engine = SimEngine::new(self.clone(), name, options)?;
        Ok(Box::new(engine))
    }
}

impl fmt::Debug for SimNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimNetwork")
            .field("config", &self.config)
            .field("live_engines", &self.live_engines())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fill: u8) -> PublicKey {
        PublicKey::from_bytes([fill; PUBLIC_KEY_SIZE])
    }

    fn online_pair(network: &SimNetwork) -> (u64, u64) {
        let a = network.attach(key(1));
        let b = network.attach(key(2));
        network.set_online(a);
        network.set_online(b);
        (a, b)
    }

    fn drain(network: &SimNetwork, id: u64, rounds: usize) -> Vec<Packet> {
        (0..rounds).flat_map(|_| network.receive(id)).map(|(_, p)| p).collect()
    }

    #[test]
    fn node_list_has_live_dead_and_relays() {
        let network = SimNetwork::new(SimConfig::fast(1));
        let nodes = network.node_list();
        assert_eq!(nodes.len(), 4 + 2 + 4);
        assert_eq!(nodes.iter().filter(|n| n.is_relay()).count(), 4);
        assert!(network.is_live(&nodes[0]));
        assert!(!network.is_live(&nodes[4]));
    }

    #[test]
    fn packets_from_one_sender_arrive_in_order() {
        let network = SimNetwork::new(SimConfig { latency_max: 9, ..SimConfig::fast(5) });
        let (a, b) = online_pair(&network);

        for n in 0..50u32 {
            assert!(network.send(a, key(1), &key(2), Packet::Receipt(MessageId(n))));
        }

        let ids: Vec<u32> = drain(&network, b, 20)
            .into_iter()
            .map(|p| match p {
                Packet::Receipt(MessageId(n)) => n,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(ids, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn offline_recipient_drops_packets() {
        let network = SimNetwork::new(SimConfig::fast(2));
        let a = network.attach(key(1));
        let b = network.attach(key(2));
        network.set_online(a);

        assert!(!network.send(a, key(1), &key(2), Packet::Hello));
        assert!(drain(&network, b, 5).is_empty());
    }

    #[test]
    fn full_loss_only_hits_handshake_packets() {
        let network = SimNetwork::new(SimConfig::fast(3).with_loss(1.0));
        let (a, _b) = online_pair(&network);

        assert!(!network.send(a, key(1), &key(2), Packet::Hello));
        assert!(network.send(a, key(1), &key(2), Packet::Typing(true)));
    }

    #[test]
    fn detach_keeps_newer_owner_of_key() {
        let network = SimNetwork::new(SimConfig::fast(4));
        let old = network.attach(key(7));
        let new = network.attach(key(7));
        network.detach(old, &key(7));

        assert_eq!(network.live_engines(), 1);
        assert_eq!(network.state().by_key.get(&key(7)), Some(&new));
    }
}
