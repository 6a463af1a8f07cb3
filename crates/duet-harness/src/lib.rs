//! Two-peer conformance harness for messaging protocol engines.
//!
//! Two engines, Alice and Bob, are created from an
//! [`EngineFactory`](duet_core::EngineFactory), bootstrapped into a network,
//! befriended, and driven through scenarios that check observable behavior.
//!
//! # Driving
//!
//! Engines only make progress when iterated. Bob is iterated by a background
//! [`IterationDriver`]; Alice is iterated by the test thread inside every
//! [`ConditionWaiter`] round, so a wait never relies on luck to make progress.
//!
//! # Observing
//!
//! Callbacks are edge-triggered. The [`capture`] module turns them into
//! latches the test thread polls, and [`invariants`] checks friend-table and
//! transfer properties against snapshots after every scenario step.
//!
//! # Simulation
//!
//! The [`sim`] module provides a seeded in-memory engine and network, so the
//! harness can be exercised without a real protocol implementation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bootstrap;
pub mod capture;
pub mod config;
pub mod coverage;
pub mod driver;
pub mod error;
pub mod fixture;
pub mod invariants;
pub mod peer;
pub mod scenario;
pub mod sim;
pub mod waiter;

pub use bootstrap::{AttemptReport, BootstrapCoordinator};
pub use capture::{ChainedCapture, Handler, LatchBoard, LatchValue, Latches, Registration};
pub use config::{ConfigError, HarnessConfig, NetworkMode};
pub use coverage::{CoverageLog, CoverageReport, EngineOp, RecordingEngine, SCENARIO_CATALOGUE, Surface};
pub use driver::{IterationDriver, StopOutcome};
pub use error::{HandlerError, HarnessError};
pub use fixture::{SessionFixture, Side, TeardownReport};
pub use invariants::{
    Invariant, InvariantKind, InvariantRegistry, InvariantResult, PeerSnapshot, SessionSnapshot,
    TransferSnapshot, Violation, Violations,
};
pub use peer::PeerHandle;
pub use scenario::{ScenarioError, ScenarioResult};
pub use sim::{SimConfig, SimEngine, SimEnv, SimNetwork};
pub use waiter::{ConditionWaiter, RetryOutcome, WaitOutcome, WaitPolicy};
