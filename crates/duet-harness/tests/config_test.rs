//! Loading harness configuration from TOML.

use std::{fs, time::Duration};

use duet_core::NodeProtocol;
use duet_harness::{ConfigError, HarnessConfig, NetworkMode, WaitPolicy};

const FULL: &str = r#"
threshold = 30
connect_cadence = 5
all_peers_cadence = 2
batch = 50
bootstrap_per_attempt = 4
bootstrap_min_interval_ms = 250
driver_stop_timeout_ms = 200
driver_join_attempts = 2
drive_both = true
network = "local"
seed = 7

[engine]
ipv6_enabled = false
udp_enabled = true
start_port = 33445
end_port = 33545

[[nodes]]
protocol = "udp"
host = "127.0.0.1"
port = 33445

[[nodes]]
protocol = "tcp"
host = "relay.example.org"
port = 3389

[sim]
loss_rate = 0.1
"#;

#[test]
fn full_document_round_trips_every_knob() {
    let config = HarnessConfig::from_toml_str(FULL).unwrap();

    assert_eq!(config.threshold, 30);
    assert_eq!(config.batch, 50);
    assert!(config.drive_both);
    assert_eq!(config.network, NetworkMode::Local);
    assert_eq!(config.seed, Some(7));
    assert!(!config.engine.ipv6_enabled);
    assert_eq!(config.engine.start_port, 33445);
    assert_eq!(config.driver_stop_timeout(), Duration::from_millis(200));
    assert_eq!(config.bootstrap_min_interval(), Duration::from_millis(250));

    assert_eq!(config.nodes.len(), 2);
    assert_eq!(config.nodes[0].protocol, NodeProtocol::Udp);
    assert_eq!(config.nodes[1].protocol, NodeProtocol::Tcp);
    assert_eq!(config.nodes[1].host, "relay.example.org");
}

#[test]
fn policies_follow_the_cadences() {
    let config = HarnessConfig::from_toml_str(FULL).unwrap();
    assert_eq!(WaitPolicy::from_config(&config), WaitPolicy { threshold: 30, cadence: 5, batch: 50 });
    assert_eq!(WaitPolicy::all_peers(&config), WaitPolicy { threshold: 30, cadence: 2, batch: 50 });
}

#[test]
fn zero_batch_is_rejected() {
    let err = HarnessConfig::from_toml_str("batch = 0").unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { field: "batch", .. }));
}

#[test]
fn empty_node_host_is_rejected() {
    let doc = "[[nodes]]\nprotocol = \"udp\"\nhost = \"\"\nport = 1\n";
    let err = HarnessConfig::from_toml_str(doc).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { field: "nodes", .. }));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = HarnessConfig::from_toml_file(&dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn file_on_disk_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("duet.toml");
    fs::write(&path, "threshold = 4\nnetwork = \"local\"\n").unwrap();

    let config = HarnessConfig::from_toml_file(&path).unwrap();
    assert_eq!(config.threshold, 4);
    assert_eq!(config.network, NetworkMode::Local);
    assert_eq!(config.batch, HarnessConfig::default().batch);
}
