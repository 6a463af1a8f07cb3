//! Engine-facing vocabulary for the duet conformance harness.
//!
//! The protocol engine under test is an opaque capability. This crate names
//! everything the harness needs from it: identities, friend and file
//! identifiers, the event kinds an engine reports, the errors it returns, and
//! the [`ProtocolEngine`] trait itself.
//!
//! # Architecture
//!
//! Engines are Sans-IO from the harness' point of view: the harness calls
//! [`ProtocolEngine::iterate`] and receives the events that became ready, then
//! dispatches them to registered handlers. Nothing in this crate spawns
//! threads or performs I/O.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod env;
pub mod error;
pub mod event;
pub mod node;
pub mod options;
pub mod types;

pub use engine::{EngineFactory, ProtocolEngine};
pub use env::{Environment, SystemEnv};
pub use error::{AddressError, EngineError};
pub use event::{EngineEvent, EventKind};
pub use node::{BootstrapNode, NodeProtocol};
pub use options::{EngineOptions, ProxyOptions, ProxyType};
pub use types::{
    ADDRESS_SIZE, Address, ConnectionStatus, FILE_ID_SIZE, FileControl, FileId, FileKind,
    FileNumber, FriendId, MAX_FILENAME_LENGTH, MAX_FRIEND_REQUEST_LENGTH, MAX_MESSAGE_LENGTH,
    MAX_NAME_LENGTH, MAX_STATUS_MESSAGE_LENGTH, MessageId, MessageType, Nospam, PUBLIC_KEY_SIZE,
    PublicKey, SECRET_KEY_SIZE, SecretKey, UserStatus,
};
