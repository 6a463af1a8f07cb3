//! Identity and identifier types shared by engines and the harness.
//!
//! Keys are fixed-size byte arrays rendered as upper-case hex. An [`Address`]
//! is what a peer hands out to be befriended: its public key, the current
//! nospam value and a two-byte XOR checksum over both.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::AddressError;

/// Size of a long-term public key.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of a long-term secret key.
pub const SECRET_KEY_SIZE: usize = 32;

/// Size of the nospam field inside an address.
pub const NOSPAM_SIZE: usize = 4;

/// Size of the checksum trailing an address.
pub const CHECKSUM_SIZE: usize = 2;

/// Size of a full address: public key, nospam and checksum.
pub const ADDRESS_SIZE: usize = PUBLIC_KEY_SIZE + NOSPAM_SIZE + CHECKSUM_SIZE;

/// Size of a file identifier.
pub const FILE_ID_SIZE: usize = 32;

/// Longest accepted friend request message.
pub const MAX_FRIEND_REQUEST_LENGTH: usize = 1016;

/// Longest accepted friend message.
pub const MAX_MESSAGE_LENGTH: usize = 1372;

/// Longest accepted display name.
pub const MAX_NAME_LENGTH: usize = 128;

/// Longest accepted status message.
pub const MAX_STATUS_MESSAGE_LENGTH: usize = 1007;

/// Longest accepted file name.
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Long-term public key of a peer.
///
/// Serialized as an upper-case hex string so keys read naturally in config
/// files.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    /// Wrap raw key bytes.
    pub const fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

impl FromStr for PublicKey {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| AddressError::NotHex)?;
        let array: [u8; PUBLIC_KEY_SIZE] =
            bytes.try_into().map_err(|b: Vec<u8>| AddressError::Length(b.len()))?;
        Ok(Self(array))
    }
}

impl TryFrom<String> for PublicKey {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        key.to_string()
    }
}

/// Long-term secret key of a peer. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKey([u8; SECRET_KEY_SIZE]);

impl SecretKey {
    /// Wrap raw key bytes.
    pub const fn from_bytes(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Anti-spam value embedded in an address.
///
/// Changing it invalidates addresses handed out earlier: requests carrying a
/// stale nospam are dropped by the recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Nospam(pub u32);

/// Address a peer publishes so others can send it friend requests.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    public_key: PublicKey,
    nospam: Nospam,
}

impl Address {
    /// Build an address from its parts.
    pub fn new(public_key: PublicKey, nospam: Nospam) -> Self {
        Self { public_key, nospam }
    }

    /// Public key prefix of the address.
    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Nospam carried by the address.
    pub fn nospam(&self) -> Nospam {
        self.nospam
    }

    /// Wire form: public key, big-endian nospam, checksum.
    pub fn to_bytes(&self) -> [u8; ADDRESS_SIZE] {
        let mut out = [0u8; ADDRESS_SIZE];
        out[..PUBLIC_KEY_SIZE].copy_from_slice(self.public_key.as_bytes());
        out[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + NOSPAM_SIZE]
            .copy_from_slice(&self.nospam.0.to_be_bytes());
        let checksum = checksum(&out[..PUBLIC_KEY_SIZE + NOSPAM_SIZE]);
        out[PUBLIC_KEY_SIZE + NOSPAM_SIZE..].copy_from_slice(&checksum);
        out
    }

    /// Parse the wire form, verifying the checksum.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AddressError> {
        if bytes.len() != ADDRESS_SIZE {
            return Err(AddressError::Length(bytes.len()));
        }

        let body = &bytes[..PUBLIC_KEY_SIZE + NOSPAM_SIZE];
        if checksum(body) != bytes[PUBLIC_KEY_SIZE + NOSPAM_SIZE..] {
            return Err(AddressError::Checksum);
        }

        let mut key = [0u8; PUBLIC_KEY_SIZE];
        key.copy_from_slice(&bytes[..PUBLIC_KEY_SIZE]);
        let mut nospam = [0u8; NOSPAM_SIZE];
        nospam.copy_from_slice(&bytes[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + NOSPAM_SIZE]);

        Ok(Self { public_key: PublicKey(key), nospam: Nospam(u32::from_be_bytes(nospam)) })
    }
}

/// XOR of alternating bytes, folded into two bytes.
fn checksum(body: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let mut sum = [0u8; CHECKSUM_SIZE];
    for (i, byte) in body.iter().enumerate() {
        sum[i % CHECKSUM_SIZE] ^= byte;
    }
    sum
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.to_bytes()))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| AddressError::NotHex)?;
        Self::from_bytes(&bytes)
    }
}

/// Locally assigned friend number.
///
/// Unique per engine while the relationship exists. Engines may hand a freed
/// number out again after the friend was deleted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct FriendId(pub u32);

impl FriendId {
    /// The numerically next id. Used to probe for phantom entries.
    pub fn successor(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for FriendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-friend file transfer number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileNumber(pub u32);

impl fmt::Display for FileNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file{}", self.0)
    }
}

/// Stable identifier of a file offered for transfer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub [u8; FILE_ID_SIZE]);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({self})")
    }
}

/// Identifier of a sent friend message, echoed back by read receipts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u32);

/// Connection status of the engine itself or of a friend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Not connected.
    #[default]
    Offline,
    /// Bootstrap in progress, not yet reachable.
    Pending,
    /// Reachable over UDP.
    ConnectedUdp,
    /// Reachable through a TCP relay.
    ConnectedTcp,
}

impl ConnectionStatus {
    /// True for either connected variant.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::ConnectedUdp | Self::ConnectedTcp)
    }
}

/// Presence a peer advertises to its friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UserStatus {
    /// Available.
    #[default]
    Online,
    /// Away from keyboard.
    Away,
    /// Do not disturb.
    Busy,
}

/// Kind of a friend message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Plain text.
    Normal,
    /// An action ("/me").
    Action,
}

/// Kind of an offered file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Arbitrary data.
    Data,
    /// Profile picture.
    Avatar,
}

/// Control commands for an active transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileControl {
    /// Accept or continue the transfer.
    Resume,
    /// Pause the transfer.
    Pause,
    /// Abort the transfer. Also used to close a completed transfer.
    Cancel,
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn key(fill: u8) -> PublicKey {
        PublicKey::from_bytes([fill; PUBLIC_KEY_SIZE])
    }

    #[test]
    fn address_renders_as_76_hex_chars() {
        let address = Address::new(key(0xab), Nospam(0x1234_5678));
        let rendered = address.to_string();

        assert_eq!(rendered.len(), 2 * ADDRESS_SIZE);
        assert!(rendered.starts_with(&key(0xab).to_string()));
    }

    #[test]
    fn nospam_changes_address_but_not_key() {
        let a = Address::new(key(1), Nospam(1));
        let b = Address::new(key(1), Nospam(2));

        assert_ne!(a.to_string(), b.to_string());
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let mut bytes = Address::new(key(7), Nospam(99)).to_bytes();
        bytes[ADDRESS_SIZE - 1] ^= 0xff;

        assert_eq!(Address::from_bytes(&bytes), Err(AddressError::Checksum));
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert_eq!(Address::from_bytes(&[0u8; 12]), Err(AddressError::Length(12)));
        assert_eq!("zz".parse::<Address>(), Err(AddressError::NotHex));
    }

    #[test]
    fn friend_id_successor_saturates() {
        assert_eq!(FriendId(3).successor(), FriendId(4));
        assert_eq!(FriendId(u32::MAX).successor(), FriendId(u32::MAX));
    }

    #[test]
    fn secret_key_debug_is_redacted() {
        let sk = SecretKey::from_bytes([9; SECRET_KEY_SIZE]);
        assert_eq!(format!("{sk:?}"), "SecretKey(..)");
    }

    proptest! {
        #[test]
        fn parsed_address_matches_its_parts(bytes in any::<[u8; 32]>(), nospam in any::<u32>()) {
            let address = Address::new(PublicKey::from_bytes(bytes), Nospam(nospam));
            let parsed: Address = address.to_string().parse().unwrap();

            let parsed_key = parsed.public_key();
            prop_assert_eq!(parsed_key.as_bytes(), &bytes);
            prop_assert_eq!(parsed.nospam(), Nospam(nospam));
        }
    }
}
