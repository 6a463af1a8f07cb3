//! Coverage accounting across fixtures sharing one log.

use std::sync::Arc;

use duet_harness::{
    CoverageLog, CoverageReport, HarnessConfig, NetworkMode, SessionFixture, SimConfig, SimNetwork,
    scenario,
};

fn fixture(seed: u64, log: &CoverageLog) -> SessionFixture {
    let network = SimNetwork::new(SimConfig::fast(seed));
    let config = HarnessConfig {
        threshold: 60,
        batch: 20,
        driver_stop_timeout_ms: 500,
        network: NetworkMode::Local,
        seed: Some(seed),
        nodes: network.node_list(),
        ..HarnessConfig::default()
    };
    SessionFixture::new(Arc::new(network), config).with_coverage_log(log.clone())
}

#[test]
fn untouched_log_misses_everything_declared() {
    let report = CoverageReport::compute(&CoverageLog::new());
    assert!(report.undeclared.is_empty());
    assert_eq!(report.missed.len(), report.declared);
    assert!(report.missed.contains(&"friend_add"));
}

#[test]
fn shared_log_accumulates_across_fixtures() {
    let log = CoverageLog::new();

    let mut first = fixture(50, &log);
    scenario::run("connect", &mut first).unwrap().unwrap();
    drop(first);

    let mut second = fixture(51, &log);
    scenario::run("friend_request", &mut second).unwrap().unwrap();
    drop(second);

    let report = CoverageReport::compute(&log);
    for name in ["bootstrap", "iterate", "self_connection_status", "friend_add", "on_friend_request"] {
        assert!(!report.missed.contains(&name), "{name} should have been invoked");
    }
    // Nothing here sends files.
    assert!(report.missed.contains(&"file_send"));
    assert!(report.missed.contains(&"on_file_recv_chunk"));
}

#[test]
fn callbacks_without_handlers_are_not_counted() {
    let log = CoverageLog::new();
    let mut fx = fixture(52, &log);
    scenario::run("connect", &mut fx).unwrap().unwrap();

    // Nobody listened for requests or messages.
    let report = CoverageReport::compute(&log);
    assert!(report.missed.contains(&"on_friend_request"));
    assert!(report.missed.contains(&"on_friend_message"));
}
