//! Background driver resilience.
//!
//! A panicking or failing handler never takes the driver down, and a driver
//! stuck behind the engine lock is reported rather than waited on forever.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use duet_core::{EngineFactory, EngineOptions, EventKind};
use duet_harness::{
    CoverageLog, HandlerError, HarnessConfig, IterationDriver, LatchValue, NetworkMode, PeerHandle,
    SessionFixture, Side, SimConfig, SimNetwork, StopOutcome, scenario,
};

fn fixture(seed: u64) -> SessionFixture {
    let network = SimNetwork::new(SimConfig::fast(seed));
    let config = HarnessConfig {
        threshold: 50,
        batch: 20,
        driver_stop_timeout_ms: 500,
        network: NetworkMode::Local,
        seed: Some(seed),
        nodes: network.node_list(),
        ..HarnessConfig::default()
    };
    SessionFixture::new(Arc::new(network), config)
}

#[test]
fn panicking_handler_keeps_driver_running() {
    let mut fx = fixture(40);
    fx.setup().unwrap();
    let bob = fx.bob().unwrap().clone();
    bob.register(EventKind::SelfConnectionStatus, Box::new(|_engine, _event| panic!("handler exploded")));

    let policy = fx.wait_policy();
    let outcome = fx.waiter(policy).unwrap().until("bob connected", || bob.self_connection_status().is_connected());
    assert!(outcome.is_satisfied());
    fx.loop_for(2).unwrap();

    assert!(fx.is_driven(Side::Bob));
    assert!(bob.has_handler(EventKind::SelfConnectionStatus));
    scenario::connect(&mut fx).unwrap();

    let report = fx.teardown();
    assert_eq!(report.stopped, 1);
    assert_eq!(report.blocked, 0);
}

#[test]
fn failing_handler_is_logged_and_ignored() {
    let mut fx = fixture(41);
    fx.setup().unwrap();
    let bob = fx.bob().unwrap().clone();
    let latches = bob.latches();
    bob.register(
        EventKind::FriendRequest,
        Box::new(move |_engine, event| {
            latches.raise(EventKind::FriendRequest, LatchValue::from_event(event));
            Err(HandlerError::Unexpected("rejected on purpose".into()))
        }),
    );

    scenario::connect(&mut fx).unwrap();
    let address = bob.address();
    fx.alice().unwrap().with_engine(|e| e.friend_add(&address, b"hi")).unwrap();

    let policy = fx.wait_policy();
    let outcome = fx.waiter(policy).unwrap().until_latch(&bob, EventKind::FriendRequest);
    assert!(outcome.is_satisfied());
    assert!(fx.is_driven(Side::Bob));
}

#[test]
fn driver_stuck_on_engine_lock_is_reported_blocked() {
    let network = SimNetwork::new(SimConfig::fast(42));
    let engine = network.create("bob", &EngineOptions::default()).unwrap();
    let bob = PeerHandle::new("bob", engine, CoverageLog::new());

    let (mut driver, outcome, elapsed) = bob.with_engine(|_engine| {
        let driver = IterationDriver::start(&bob).unwrap();
        // Let the thread reach `iterate` and block on the lock we hold.
        thread::sleep(Duration::from_millis(100));
        let mut driver = driver;
        #[allow(clippy::disallowed_methods)]
        let started = Instant::now();
        let outcome = driver.stop(Duration::from_millis(50), 2);
        (driver, outcome, started.elapsed())
    });

    assert_eq!(outcome, StopOutcome::Blocked);
    assert!(elapsed < Duration::from_secs(2));
    assert!(bob.is_driven());

    // Once the lock is released the detached thread notices the stop flag.
    thread::sleep(Duration::from_millis(100));
    assert!(!driver.is_running());
    assert_eq!(driver.stop(Duration::from_millis(50), 1), StopOutcome::Stopped);
}

#[test]
fn try_with_engine_gives_up_while_the_engine_is_held() {
    let network = SimNetwork::new(SimConfig::fast(43));
    let engine = network.create("bob", &EngineOptions::default()).unwrap();
    let bob = PeerHandle::new("bob", engine, CoverageLog::new());

    let contended = bob.with_engine(|_engine| {
        thread::scope(|s| s.spawn(|| bob.try_with_engine(|e| e.public_key())).join().unwrap())
    });
    assert!(contended.is_none());
    assert_eq!(bob.try_with_engine(|e| e.public_key()), Some(bob.public_key()));
}
