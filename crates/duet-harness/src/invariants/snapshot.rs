//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture what the engines expose at one point in time.
//! Invariants operate on snapshots rather than live engines so a check sees
//! one consistent view.

use std::collections::BTreeMap;

use duet_core::{ConnectionStatus, FileNumber, FriendId, ProtocolEngine, PublicKey};

/// Snapshot of both peers plus live transfers.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    /// Per-peer state.
    pub peers: Vec<PeerSnapshot>,
    /// Transfers in progress or just finished.
    pub transfers: Vec<TransferSnapshot>,
}

impl SessionSnapshot {
    /// Snapshot of the given peers.
    pub fn from_peers(peers: Vec<PeerSnapshot>) -> Self {
        Self { peers, transfers: Vec::new() }
    }

    /// Add a transfer record.
    #[must_use]
    pub fn with_transfer(mut self, transfer: TransferSnapshot) -> Self {
        self.transfers.push(transfer);
        self
    }
}

/// One peer's friend table as the engine reports it.
#[derive(Debug, Clone, Default)]
pub struct PeerSnapshot {
    /// Peer name.
    pub name: String,
    /// Result of `friend_list`.
    pub friend_list: Vec<FriendId>,
    /// Result of `friend_list_size`.
    pub list_size: usize,
    /// `friend_exists` probed for every listed id and its successor.
    pub exists: BTreeMap<FriendId, bool>,
    /// Per-friend details for listed ids.
    pub friends: Vec<FriendSnapshot>,
}

impl PeerSnapshot {
    /// Empty snapshot for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Query `engine` for its friend table.
    pub fn capture(name: &str, engine: &dyn ProtocolEngine) -> Self {
        let friend_list = engine.friend_list();
        let mut exists = BTreeMap::new();
        let mut friends = Vec::with_capacity(friend_list.len());

        for &id in &friend_list {
            exists.insert(id, engine.friend_exists(id));
            let successor = id.successor();
            exists.entry(successor).or_insert_with(|| engine.friend_exists(successor));

            if let Ok(public_key) = engine.friend_public_key(id) {
                let connection =
                    engine.friend_connection_status(id).unwrap_or(ConnectionStatus::Offline);
                friends.push(FriendSnapshot { id, public_key, connection });
            }
        }

        Self { name: name.to_owned(), list_size: engine.friend_list_size(), friend_list, exists, friends }
    }

    /// Set the friend list and a matching size.
    #[must_use]
    pub fn with_friends(mut self, ids: impl IntoIterator<Item = FriendId>) -> Self {
        self.friend_list = ids.into_iter().collect();
        self.list_size = self.friend_list.len();
        for id in &self.friend_list {
            self.exists.insert(*id, true);
        }
        self
    }

    /// Record a `friend_exists` probe result.
    #[must_use]
    pub fn with_exists(mut self, id: FriendId, exists: bool) -> Self {
        self.exists.insert(id, exists);
        self
    }
}

/// One friend entry.
#[derive(Debug, Clone)]
pub struct FriendSnapshot {
    /// Friend id.
    pub id: FriendId,
    /// Friend's public key.
    pub public_key: PublicKey,
    /// Last reported connection status.
    pub connection: ConnectionStatus,
}

/// Progress of one file transfer.
#[derive(Debug, Clone)]
pub struct TransferSnapshot {
    /// Receiving peer.
    pub peer: String,
    /// Sender as seen by the receiver.
    pub friend: FriendId,
    /// Transfer number on the receiver.
    pub file: FileNumber,
    /// Declared total size.
    pub total: u64,
    /// Every offset observed, in arrival order.
    pub offsets: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_friends_sets_size_and_existence() {
        let peer = PeerSnapshot::new("bob").with_friends([FriendId(0), FriendId(1)]);
        assert_eq!(peer.list_size, 2);
        assert_eq!(peer.exists.get(&FriendId(1)), Some(&true));
        assert_eq!(peer.exists.get(&FriendId(2)), None);
    }
}
