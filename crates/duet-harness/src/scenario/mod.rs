//! Reusable conformance scenarios.
//!
//! Every scenario takes a set-up [`SessionFixture`], drives both peers
//! through one protocol behavior and returns a [`ScenarioResult`]. Scenarios
//! compose: most of them start from [`befriend`], which in turn starts from
//! [`connect`].
//!
//! Failures split into two groups. Timeouts and "not connected" errors are
//! environmental, a public network can cause them on a good day. Everything
//! else is a conformance failure of the engine under test.

mod connect;
mod file_transfer;
mod friend;
mod identity;
mod messaging;
mod presence;
mod suite;

use duet_core::{EngineError, FriendId};
use thiserror::Error;

pub use connect::connect;
pub use file_transfer::{TransferOutcome, TransferSession, file_transfer, seeded_payload};
pub use friend::{
    Handshake, OnlineWatch, add_friend_norequest, await_friend_online, befriend, delete_friend,
    friend_handshake, friend_request, watch_friend_online,
};
pub use identity::{SavedataOutcome, savedata_roundtrip, self_identity, self_profile};
pub use messaging::message_delivery;
pub use presence::{
    name_propagation, status_message_propagation, typing_propagation, user_status_propagation,
};
pub use suite::{TRANSFER_OFFSET, TRANSFER_SIZE, run, scenario_names};

use crate::{
    error::HarnessError,
    fixture::SessionFixture,
    invariants::{InvariantKind, Violation, Violations},
    peer::PeerHandle,
    waiter::WaitOutcome,
};

/// Why a scenario failed.
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// A wait ran out of rounds
    #[error("{peer}: timed out waiting for {what} after {rounds} rounds")]
    TimedOut {
        /// Peer that was waited on
        peer: String,
        /// Condition waited for
        what: String,
        /// Rounds used
        rounds: u32,
    },

    /// An operation needed a connected friend
    #[error("{peer}: friend not connected during {operation}")]
    NotConnected {
        /// Peer that made the call
        peer: String,
        /// Operation refused
        operation: &'static str,
    },

    /// Observable state broke an invariant
    #[error("invariant violated: {0}")]
    Invariant(#[from] Violations),

    /// An engine call failed outright
    #[error("{peer}: {operation} failed: {source}")]
    Engine {
        /// Peer that made the call
        peer: String,
        /// Operation that failed
        operation: &'static str,
        /// Engine error
        #[source]
        source: EngineError,
    },

    /// The harness itself failed
    #[error(transparent)]
    Harness(#[from] HarnessError),
}

impl ScenarioError {
    /// Whether the failure is attributable to the network rather than the
    /// engine under test.
    pub fn is_environmental(&self) -> bool {
        matches!(self, Self::TimedOut { .. } | Self::NotConnected { .. })
    }
}

impl From<Violation> for ScenarioError {
    fn from(violation: Violation) -> Self {
        Self::Invariant(violation.into())
    }
}

/// Scenario result type.
pub type ScenarioResult<T> = Result<T, ScenarioError>;

/// Map an engine error from `operation` on `peer`.
///
/// A not-connected friend is environmental, anything else is not.
pub(crate) fn engine_error(peer: &PeerHandle, operation: &'static str) -> impl FnOnce(EngineError) -> ScenarioError {
    let name = peer.name().to_owned();
    move |source| {
        if source.is_not_connected() {
            ScenarioError::NotConnected { peer: name, operation }
        } else {
            ScenarioError::Engine { peer: name, operation, source }
        }
    }
}

/// Turn a wait outcome into a result.
pub(crate) fn require(outcome: WaitOutcome, peer: &PeerHandle, what: &str) -> ScenarioResult<u32> {
    match outcome {
        WaitOutcome::Satisfied { rounds } => Ok(rounds),
        WaitOutcome::TimedOut { rounds } => {
            Err(ScenarioError::TimedOut { peer: peer.name().to_owned(), what: what.to_owned(), rounds })
        },
    }
}

/// Fail with a content mismatch unless `got == expected`.
pub(crate) fn expect_eq<T>(peer: &PeerHandle, what: &str, got: &T, expected: &T) -> ScenarioResult<()>
where
    T: PartialEq + std::fmt::Debug + ?Sized,
{
    if got == expected {
        return Ok(());
    }
    Err(Violation::new(
        InvariantKind::ContentIntegrity,
        format!("{}: {what} is {got:?}, expected {expected:?}", peer.name()),
    )
    .into())
}

/// Id `peer` holds for `other`.
pub(crate) fn friend_id_of(peer: &PeerHandle, other: &PeerHandle) -> ScenarioResult<FriendId> {
    let key = other.public_key();
    peer.with_engine(|e| e.friend_by_public_key(&key)).map_err(engine_error(peer, "friend_by_public_key"))
}

/// Run the fixture's invariants against a fresh snapshot.
pub(crate) fn check_invariants(fx: &SessionFixture) -> ScenarioResult<()> {
    fx.check_invariants()??;
    Ok(())
}
