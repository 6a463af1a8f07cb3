//! Standard invariant checks.
//!
//! These hold for any engine at any point of a session, whatever scenario
//! ran before.

use std::collections::BTreeSet;

use super::{Invariant, InvariantKind, InvariantResult, SessionSnapshot, Violation};

/// Every listed friend id exists, and no id is listed twice.
pub struct FriendListConsistency;

impl Invariant for FriendListConsistency {
    fn kind(&self) -> InvariantKind {
        InvariantKind::FriendListConsistency
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        for peer in &state.peers {
            let mut seen = BTreeSet::new();
            for id in &peer.friend_list {
                if !seen.insert(*id) {
                    return Err(Violation {
                        invariant: self.kind(),
                        message: format!("{}: friend {} listed twice", peer.name, id),
                    });
                }
                if peer.exists.get(id) == Some(&false) {
                    return Err(Violation {
                        invariant: self.kind(),
                        message: format!("{}: listed friend {} does not exist", peer.name, id),
                    });
                }
            }
        }
        Ok(())
    }
}

/// If the id after a friend exists, it is listed too.
///
/// A successor that exists without being listed is a phantom entry left
/// behind by an add or delete.
pub struct NoPhantomSuccessor;

impl Invariant for NoPhantomSuccessor {
    fn kind(&self) -> InvariantKind {
        InvariantKind::NoPhantomSuccessor
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        for peer in &state.peers {
            let listed: BTreeSet<_> = peer.friend_list.iter().copied().collect();
            for (id, exists) in &peer.exists {
                if *exists && !listed.contains(id) {
                    return Err(Violation {
                        invariant: self.kind(),
                        message: format!("{}: friend {} exists but is not listed", peer.name, id),
                    });
                }
            }
        }
        Ok(())
    }
}

/// The reported list size equals the length of the list.
pub struct ListSizeAgreement;

impl Invariant for ListSizeAgreement {
    fn kind(&self) -> InvariantKind {
        InvariantKind::ListSizeAgreement
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        for peer in &state.peers {
            if peer.list_size != peer.friend_list.len() {
                return Err(Violation {
                    invariant: self.kind(),
                    message: format!(
                        "{}: list size {} but {} ids listed",
                        peer.name,
                        peer.list_size,
                        peer.friend_list.len()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Transfer offsets never decrease and never pass the declared size.
pub struct TransferOffsetBounds;

impl Invariant for TransferOffsetBounds {
    fn kind(&self) -> InvariantKind {
        InvariantKind::TransferOffsetBounds
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        for transfer in &state.transfers {
            for window in transfer.offsets.windows(2) {
                if window[1] < window[0] {
                    return Err(Violation {
                        invariant: self.kind(),
                        message: format!(
                            "{} {} from {}: offset decreased {} → {}",
                            transfer.peer, transfer.file, transfer.friend, window[0], window[1]
                        ),
                    });
                }
            }
            if let Some(&last) = transfer.offsets.last()
                && last > transfer.total
            {
                return Err(Violation {
                    invariant: self.kind(),
                    message: format!(
                        "{} {}: offset {} past size {}",
                        transfer.peer, transfer.file, last, transfer.total
                    ),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use duet_core::{FileNumber, FriendId};

    use super::*;
    use crate::invariants::{PeerSnapshot, TransferSnapshot};

    fn single(peer: PeerSnapshot) -> SessionSnapshot {
        SessionSnapshot::from_peers(vec![peer])
    }

    #[test]
    fn consistency_passes_for_unique_existing_ids() {
        let peer = PeerSnapshot::new("bob").with_friends([FriendId(0), FriendId(1)]);
        assert!(FriendListConsistency.check(&single(peer)).is_ok());
    }

    #[test]
    fn consistency_fails_for_duplicate() {
        let mut peer = PeerSnapshot::new("bob").with_friends([FriendId(0)]);
        peer.friend_list.push(FriendId(0));
        let result = FriendListConsistency.check(&single(peer));
        assert!(result.unwrap_err().message.contains("twice"));
    }

    #[test]
    fn consistency_fails_for_dangling_id() {
        let peer =
            PeerSnapshot::new("bob").with_friends([FriendId(3)]).with_exists(FriendId(3), false);
        assert!(FriendListConsistency.check(&single(peer)).is_err());
    }

    #[test]
    fn phantom_successor_is_caught() {
        let peer =
            PeerSnapshot::new("bob").with_friends([FriendId(0)]).with_exists(FriendId(1), true);
        let result = NoPhantomSuccessor.check(&single(peer));
        assert!(result.unwrap_err().message.contains("#1"));
    }

    #[test]
    fn absent_successor_passes() {
        let peer =
            PeerSnapshot::new("bob").with_friends([FriendId(0)]).with_exists(FriendId(1), false);
        assert!(NoPhantomSuccessor.check(&single(peer)).is_ok());
    }

    #[test]
    fn list_size_mismatch_is_caught() {
        let mut peer = PeerSnapshot::new("alice").with_friends([FriendId(0)]);
        peer.list_size = 2;
        assert!(ListSizeAgreement.check(&single(peer)).is_err());
    }

    fn transfer(total: u64, offsets: &[u64]) -> SessionSnapshot {
        SessionSnapshot::default().with_transfer(TransferSnapshot {
            peer: "alice".into(),
            friend: FriendId(0),
            file: FileNumber(65536),
            total,
            offsets: offsets.to_vec(),
        })
    }

    #[test]
    fn increasing_offsets_within_size_pass() {
        assert!(TransferOffsetBounds.check(&transfer(100, &[10, 50, 100])).is_ok());
    }

    #[test]
    fn decreasing_offset_is_caught() {
        let result = TransferOffsetBounds.check(&transfer(100, &[10, 50, 20]));
        assert!(result.unwrap_err().message.contains("50 → 20"));
    }

    #[test]
    fn offset_past_size_is_caught() {
        assert!(TransferOffsetBounds.check(&transfer(100, &[10, 101])).is_err());
    }
}
