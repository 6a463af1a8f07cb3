//! Options an engine is created with.

use serde::{Deserialize, Serialize};

/// Proxy flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    /// HTTP CONNECT proxy
    Http,
    /// SOCKS5 proxy
    Socks5,
}

/// Proxy endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyOptions {
    /// Flavour
    #[serde(rename = "type")]
    pub kind: ProxyType,
    /// Proxy host
    pub host: String,
    /// Proxy port
    pub port: u16,
}

/// Creation options shared by both peers of a session.
///
/// Defaults match what the conformance suite runs with: UDP and IPv6 on,
/// local discovery and hole punching off, DHT announcements on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Enable IPv6 sockets
    pub ipv6_enabled: bool,
    /// Enable UDP. Forced off when a proxy is configured.
    pub udp_enabled: bool,
    /// Route TCP through this proxy
    pub proxy: Option<ProxyOptions>,
    /// First UDP port to try binding
    pub start_port: u16,
    /// Last UDP port to try binding
    pub end_port: u16,
    /// Port for the TCP relay server, 0 to disable
    pub tcp_port: u16,
    /// LAN discovery
    pub local_discovery_enabled: bool,
    /// Announce ourselves in the DHT
    pub dht_announcements_enabled: bool,
    /// UDP hole punching
    pub hole_punching_enabled: bool,
    /// Saved state to restore from, `None` for a fresh profile
    #[serde(skip)]
    pub savedata: Option<Vec<u8>>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            ipv6_enabled: true,
            udp_enabled: true,
            proxy: None,
            start_port: 0,
            end_port: 0,
            tcp_port: 0,
            local_discovery_enabled: false,
            dht_announcements_enabled: true,
            hole_punching_enabled: false,
            savedata: None,
        }
    }
}

impl EngineOptions {
    /// Whether UDP is actually usable with these options.
    pub fn effective_udp(&self) -> bool {
        self.udp_enabled && self.proxy.is_none()
    }

    /// Copy of these options restoring from `savedata`.
    #[must_use]
    pub fn with_savedata(&self, savedata: Vec<u8>) -> Self {
        Self { savedata: Some(savedata), ..self.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_disables_udp() {
        let mut options = EngineOptions::default();
        assert!(options.effective_udp());

        options.proxy =
            Some(ProxyOptions { kind: ProxyType::Socks5, host: "127.0.0.1".into(), port: 9050 });
        assert!(!options.effective_udp());
    }

    #[test]
    fn with_savedata_keeps_other_options() {
        let options = EngineOptions { tcp_port: 33445, ..EngineOptions::default() };
        let restored = options.with_savedata(vec![1, 2, 3]);

        assert_eq!(restored.tcp_port, 33445);
        assert_eq!(restored.savedata.as_deref(), Some(&[1u8, 2, 3][..]));
    }
}
