//! Invariant checking over both peers' observable state.
//!
//! Invariants are properties that must hold after every scenario step, not
//! just at the end of a particular scenario. The harness extracts what the
//! engines expose into a [`SessionSnapshot`] and runs registered
//! [`Invariant`] checks against it.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! let snapshot = fixture.snapshot()?;
//! registry.check_all(&snapshot)?;
//! ```

mod checks;
mod snapshot;

use std::fmt;

pub use checks::{FriendListConsistency, ListSizeAgreement, NoPhantomSuccessor, TransferOffsetBounds};
pub use snapshot::{FriendSnapshot, PeerSnapshot, SessionSnapshot, TransferSnapshot};

/// Identifies an invariant in violation reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvariantKind {
    /// Listed ids exist and are unique
    FriendListConsistency,
    /// The id after every friend is either listed or absent
    NoPhantomSuccessor,
    /// Reported list size equals list length
    ListSizeAgreement,
    /// Transfer offsets stay in bounds and never go back
    TransferOffsetBounds,
    /// What arrived is what was sent
    ContentIntegrity,
    /// Keys, address and nospam agree with each other
    IdentityConsistency,
}

impl fmt::Display for InvariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FriendListConsistency => "friend_list_consistency",
            Self::NoPhantomSuccessor => "no_phantom_successor",
            Self::ListSizeAgreement => "list_size_agreement",
            Self::TransferOffsetBounds => "transfer_offset_bounds",
            Self::ContentIntegrity => "content_integrity",
            Self::IdentityConsistency => "identity_consistency",
        };
        f.write_str(name)
    }
}

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Violated invariant.
    pub invariant: InvariantKind,
    /// Description of what went wrong.
    pub message: String,
}

impl Violation {
    /// Violation of `invariant` described by `message`.
    pub fn new(invariant: InvariantKind, message: impl Into<String>) -> Self {
        Self { invariant, message: message.into() }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// Every violation found by one [`InvariantRegistry::check_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violations(pub Vec<Violation>);

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<_> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for Violations {}

impl From<Violation> for Violations {
    fn from(violation: Violation) -> Self {
        Self(vec![violation])
    }
}

/// An invariant that can be checked against session state.
pub trait Invariant: Send + Sync {
    /// Which invariant this is.
    fn kind(&self) -> InvariantKind;

    /// Check the invariant against a snapshot.
    fn check(&self, state: &SessionSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Registry with every friend-table and transfer invariant.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(FriendListConsistency);
        registry.add(NoPhantomSuccessor);
        registry.add(ListSizeAgreement);
        registry.add(TransferOffsetBounds);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants, collecting every violation.
    pub fn check_all(&self, state: &SessionSnapshot) -> Result<(), Violations> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(Violations(violations)) }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_has_invariants() {
        let registry = InvariantRegistry::standard();
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn empty_snapshot_passes_invariants() {
        let registry = InvariantRegistry::standard();
        assert!(registry.check_all(&SessionSnapshot::default()).is_ok());
    }

    #[test]
    fn violations_render_every_entry() {
        let violations = Violations(vec![
            Violation { invariant: InvariantKind::ListSizeAgreement, message: "a".into() },
            Violation { invariant: InvariantKind::NoPhantomSuccessor, message: "b".into() },
        ]);
        assert_eq!(violations.to_string(), "list_size_agreement: a; no_phantom_successor: b");
    }
}
