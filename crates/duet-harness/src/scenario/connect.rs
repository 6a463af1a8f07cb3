//! Getting both peers onto the network.

use super::{ScenarioError, ScenarioResult};
use crate::{fixture::SessionFixture, waiter::WaitOutcome};

/// Bootstrap both peers until each reports a connected status.
///
/// Cheap when already connected: the first round sees it and returns.
pub fn connect(fx: &mut SessionFixture) -> ScenarioResult<()> {
    let alice = fx.alice()?.clone();
    let bob = fx.bob()?.clone();

    let policy = fx.wait_policy();
    let outcome = fx.waiter(policy)?.until_connected();
    if let WaitOutcome::TimedOut { rounds } = outcome {
        return Err(ScenarioError::TimedOut {
            peer: format!("{}+{}", alice.name(), bob.name()),
            what: "self connection".to_owned(),
            rounds,
        });
    }

    for peer in [&alice, &bob] {
        let port = peer.with_engine(|e| e.udp_port());
        tracing::info!(
            peer = %peer.name(),
            status = ?peer.self_connection_status(),
            port = ?port.ok(),
            rounds = outcome.rounds(),
            "connected"
        );
    }
    Ok(())
}
