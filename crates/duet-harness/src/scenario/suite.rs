//! The conformance suite: every catalogue entry as a runnable recipe.
//!
//! A recipe sets up its own preconditions, so any entry can run alone on a
//! fresh fixture.

use duet_core::{MessageType, UserStatus};

use super::{
    ScenarioResult, add_friend_norequest, await_friend_online, befriend, connect, delete_friend,
    file_transfer, friend_request, message_delivery, name_propagation, savedata_roundtrip,
    seeded_payload, self_identity, self_profile, status_message_propagation, typing_propagation,
    user_status_propagation, watch_friend_online,
};
use crate::{
    coverage::SCENARIO_CATALOGUE,
    fixture::{SessionFixture, Side},
};

/// Size of the file the suite transfers.
pub const TRANSFER_SIZE: usize = 1024 * 1024;

/// Offset the receiver seeks to before resuming.
pub const TRANSFER_OFFSET: u64 = 567;

const REQUEST_MESSAGE: &str = "Gentoo";

/// Catalogue names in suite order.
pub fn scenario_names() -> impl Iterator<Item = &'static str> {
    SCENARIO_CATALOGUE.iter().map(|doc| doc.name)
}

/// Set up `fx` and run the scenario called `name`.
///
/// Returns `None` for a name that is not in the catalogue.
pub fn run(name: &str, fx: &mut SessionFixture) -> Option<ScenarioResult<()>> {
    let recipe: fn(&mut SessionFixture) -> ScenarioResult<()> = match name {
        "self_identity" => self_identity,
        "self_profile" => self_profile,
        "connect" => connect,
        "add_friend_norequest" => mutual_norequest,
        "friend_request" => |fx| friend_request(fx, Side::Alice, REQUEST_MESSAGE).map(drop),
        "status_message_propagation" => |fx| {
            befriend(fx, Side::Alice, REQUEST_MESSAGE)?;
            status_message_propagation(fx, Side::Bob, "Installing Gentoo")
        },
        "user_status_propagation" => |fx| {
            befriend(fx, Side::Alice, REQUEST_MESSAGE)?;
            user_status_propagation(fx, Side::Bob, UserStatus::Busy)
        },
        "name_propagation" => |fx| {
            befriend(fx, Side::Alice, REQUEST_MESSAGE)?;
            name_propagation(fx, Side::Bob, "Gentoo")
        },
        "typing_propagation" => |fx| {
            befriend(fx, Side::Alice, REQUEST_MESSAGE)?;
            typing_propagation(fx, Side::Bob)
        },
        "message_delivery" => |fx| {
            befriend(fx, Side::Alice, REQUEST_MESSAGE)?;
            message_delivery(fx, Side::Alice, MessageType::Normal, "Install Gentoo")?;
            message_delivery(fx, Side::Bob, MessageType::Action, "installs Gentoo").map(drop)
        },
        "file_transfer" => |fx| {
            befriend(fx, Side::Alice, REQUEST_MESSAGE)?;
            let payload = seeded_payload(fx.config().seed.unwrap_or_default(), TRANSFER_SIZE);
            file_transfer(fx, Side::Bob, payload, TRANSFER_OFFSET).map(drop)
        },
        "savedata_roundtrip" => |fx| {
            befriend(fx, Side::Alice, REQUEST_MESSAGE)?;
            savedata_roundtrip(fx, Side::Alice).map(drop)
        },
        "delete_friend" => |fx| {
            let handshake = befriend(fx, Side::Alice, REQUEST_MESSAGE)?;
            delete_friend(fx, Side::Alice, handshake.requester)?;
            delete_friend(fx, Side::Bob, handshake.responder)
        },
        _ => return None,
    };

    let span = tracing::info_span!("scenario", name);
    let _enter = span.enter();
    if let Err(err) = fx.setup() {
        return Some(Err(err.into()));
    }
    Some(recipe(fx))
}

/// Both peers add each other by key and wait to see each other online.
fn mutual_norequest(fx: &mut SessionFixture) -> ScenarioResult<()> {
    connect(fx)?;
    let watches = [watch_friend_online(fx, Side::Alice)?, watch_friend_online(fx, Side::Bob)?];
    add_friend_norequest(fx, Side::Alice)?;
    add_friend_norequest(fx, Side::Bob)?;
    for watch in watches {
        await_friend_online(fx, watch)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::HarnessConfig,
        sim::{SimConfig, SimNetwork},
    };

    #[test]
    fn every_catalogue_entry_has_a_recipe() {
        let network = SimNetwork::new(SimConfig::fast(1));
        let mut fx = SessionFixture::new(Arc::new(network), HarnessConfig::default());
        assert!(run("no_such_scenario", &mut fx).is_none());
        assert!(!fx.is_set_up());

        assert_eq!(scenario_names().count(), SCENARIO_CATALOGUE.len());
        assert_eq!(scenario_names().next(), Some("self_identity"));
    }
}
