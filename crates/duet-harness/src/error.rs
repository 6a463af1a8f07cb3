//! Harness-level errors.
//!
//! These cover the machinery around the engines: creating them, spawning
//! drivers, and loading configuration. Failures of the protocol itself are
//! reported through [`ScenarioError`](crate::scenario::ScenarioError).

use duet_core::EngineError;
use thiserror::Error;

use crate::{config::ConfigError, fixture::Side};

/// Errors from fixture and driver management.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// The factory could not build a peer
    #[error("failed to create engine for {peer}: {source}")]
    EngineCreation {
        /// Peer being created
        peer: String,
        /// Underlying engine error
        #[source]
        source: EngineError,
    },

    /// The driver thread could not be spawned
    #[error("failed to spawn iteration driver for {peer}: {source}")]
    Spawn {
        /// Peer the driver was for
        peer: String,
        /// OS error
        #[source]
        source: std::io::Error,
    },

    /// A second driver was started on the same peer
    #[error("peer {peer} is already driven by an iteration driver")]
    AlreadyDriven {
        /// Peer that already has a driver
        peer: String,
    },

    /// An operation needed a peer the fixture has not created
    #[error("{0} is not set up")]
    PeerMissing(Side),

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failure reported by a callback handler.
///
/// Handler failures are logged at the capture boundary and never propagate
/// to the driver.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// An engine call made from the handler failed
    #[error("engine call failed: {0}")]
    Engine(#[from] EngineError),

    /// The event did not match what the handler expected
    #[error("unexpected event: {0}")]
    Unexpected(String),
}
