//! Bootstrap and relay node descriptions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::PublicKey;

/// Transport a node is reachable over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeProtocol {
    /// DHT bootstrap over UDP
    Udp,
    /// TCP relay
    Tcp,
    /// TCP relay reached through a SOCKS5 proxy
    Socks5,
}

/// A well-known rendezvous endpoint used to join the network.
///
/// Nodes are immutable once loaded and shared read-only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BootstrapNode {
    /// Transport
    pub protocol: NodeProtocol,
    /// Host name or IP literal
    pub host: String,
    /// Port
    pub port: u16,
    /// Node's DHT key, if published
    #[serde(default)]
    pub public_key: Option<PublicKey>,
}

impl BootstrapNode {
    /// UDP bootstrap node without a pinned key.
    pub fn udp(host: impl Into<String>, port: u16) -> Self {
        Self { protocol: NodeProtocol::Udp, host: host.into(), port, public_key: None }
    }

    /// TCP relay without a pinned key.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self { protocol: NodeProtocol::Tcp, host: host.into(), port, public_key: None }
    }

    /// Pin the node's key.
    #[must_use]
    pub fn with_key(mut self, key: PublicKey) -> Self {
        self.public_key = Some(key);
        self
    }

    /// True for nodes used as TCP relays.
    pub fn is_relay(&self) -> bool {
        matches!(self.protocol, NodeProtocol::Tcp | NodeProtocol::Socks5)
    }
}

impl fmt::Display for BootstrapNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proto = match self.protocol {
            NodeProtocol::Udp => "udp",
            NodeProtocol::Tcp => "tcp",
            NodeProtocol::Socks5 => "socks5",
        };
        write!(f, "{proto}://{}:{}", self.host, self.port)
    }
}
