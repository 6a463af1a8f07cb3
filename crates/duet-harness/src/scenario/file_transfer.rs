//! File transfer from a seeked offset, verified by digest.
//!
//! The receiver seeks to the offset and resumes from its `FileRecv`
//! handler, appends every chunk to a [`TransferSession`], and cancels once
//! the terminating empty chunk arrives. The sender answers chunk requests
//! from the payload. Both sides run inside handlers, so the transfer makes
//! progress on whichever thread iterates each peer.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use duet_core::{EngineEvent, EventKind, FileControl, FileKind, FileNumber, FriendId};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

use super::{ScenarioError, ScenarioResult, check_invariants, engine_error, friend_id_of};
use crate::{
    capture::{self, LatchValue},
    error::HandlerError,
    fixture::{SessionFixture, Side},
    invariants::{InvariantKind, TransferSnapshot, Violation, Violations},
    waiter::{RetryOutcome, WaitOutcome},
};

/// Name the sender offers the payload under.
const FILENAME: &str = "duet-transfer.bin";

/// Receiver-side progress of one incoming file.
#[derive(Debug, Clone)]
pub struct TransferSession {
    friend: FriendId,
    file: FileNumber,
    start: u64,
    offset: u64,
    total: u64,
    hasher: Sha256,
    offsets: Vec<u64>,
}

impl TransferSession {
    /// Session for `file` of `total` bytes, receiving from `start`.
    pub fn new(friend: FriendId, file: FileNumber, start: u64, total: u64) -> Self {
        Self { friend, file, start, offset: start, total, hasher: Sha256::new(), offsets: vec![start] }
    }

    /// Append a chunk that claims to start at `position`.
    ///
    /// Rejects chunks that skip ahead, go back, or run past the declared
    /// size. A rejected chunk leaves the session unchanged.
    pub fn append(&mut self, position: u64, data: &[u8]) -> Result<(), Violation> {
        if position != self.offset {
            return Err(Violation::new(
                InvariantKind::TransferOffsetBounds,
                format!("{} from {}: chunk at {position}, expected {}", self.file, self.friend, self.offset),
            ));
        }
        let end = self.offset + data.len() as u64;
        if end > self.total {
            return Err(Violation::new(
                InvariantKind::TransferOffsetBounds,
                format!("{} from {}: chunk ends at {end}, past size {}", self.file, self.friend, self.total),
            ));
        }
        self.hasher.update(data);
        self.offset = end;
        self.offsets.push(end);
        Ok(())
    }

    /// Whether every byte from the start offset has arrived.
    pub fn is_complete(&self) -> bool {
        self.offset == self.total
    }

    /// Next expected offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Offset the transfer was resumed from.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Bytes received so far.
    pub fn received(&self) -> u64 {
        self.offset - self.start
    }

    /// SHA-256 of the bytes received so far.
    pub fn digest(&self) -> [u8; 32] {
        self.hasher.clone().finalize().into()
    }

    /// Record for invariant checks.
    pub fn snapshot(&self, peer: &str) -> TransferSnapshot {
        TransferSnapshot {
            peer: peer.to_owned(),
            friend: self.friend,
            file: self.file,
            total: self.total,
            offsets: self.offsets.clone(),
        }
    }
}

/// `len` pseudo-random bytes that replay from `seed`.
pub fn seeded_payload(seed: u64, len: usize) -> Bytes {
    let mut payload = vec![0u8; len];
    ChaCha8Rng::seed_from_u64(seed).fill_bytes(&mut payload);
    Bytes::from(payload)
}

/// What a completed transfer delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Transfer number on the sender
    pub file: FileNumber,
    /// Bytes delivered
    pub bytes: u64,
    /// SHA-256 of the delivered bytes
    pub digest: [u8; 32],
}

#[derive(Default)]
struct Shared {
    session: Option<TransferSession>,
    problems: Vec<Violation>,
}

fn shared(state: &Mutex<Shared>) -> std::sync::MutexGuard<'_, Shared> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `from` sends `payload` to the other side, which seeks to `offset` before
/// resuming. The receiver must end up with exactly `payload[offset..]`.
pub fn file_transfer(
    fx: &mut SessionFixture,
    from: Side,
    payload: Bytes,
    offset: u64,
) -> ScenarioResult<TransferOutcome> {
    let sender = fx.peer(from)?.clone();
    let receiver = fx.counterpart(from)?.clone();
    let total = payload.len() as u64;
    if offset >= total {
        return Err(Violation::new(
            InvariantKind::TransferOffsetBounds,
            format!("offset {offset} not inside a {total} byte payload"),
        )
        .into());
    }

    let target = friend_id_of(&sender, &receiver)?;
    let source = friend_id_of(&receiver, &sender)?;
    let expected: [u8; 32] = Sha256::digest(&payload[offset as usize..]).into();
    let state = Arc::new(Mutex::new(Shared::default()));

    for kind in [EventKind::FileRecv, EventKind::FileRecvChunk] {
        receiver.reset_latch(kind);
    }
    sender.reset_latch(EventKind::FileRecvControl);

    let recv_state = Arc::clone(&state);
    let recv_latches = receiver.latches();
    let _offer = receiver.capture(
        EventKind::FileRecv,
        Box::new(move |engine, event| {
            let EngineEvent::FileRecv { friend, file, size, filename, .. } = event else {
                return Ok(());
            };
            if *friend != source {
                return Ok(());
            }
            if *size != total || filename.as_slice() != FILENAME.as_bytes() {
                let message = format!("{file} from {friend}: offer of {size} bytes named {filename:?}");
                shared(&recv_state).problems.push(Violation::new(InvariantKind::ContentIntegrity, message.clone()));
                return Err(HandlerError::Unexpected(message));
            }
            engine.file_seek(*friend, *file, offset)?;
            engine.file_control(*friend, *file, FileControl::Resume)?;
            shared(&recv_state).session = Some(TransferSession::new(*friend, *file, offset, total));
            recv_latches.raise(EventKind::FileRecv, LatchValue::from_event(event));
            Ok(())
        }),
    );

    let chunk_state = Arc::clone(&state);
    let chunk_latches = receiver.latches();
    let _chunks = receiver.capture(
        EventKind::FileRecvChunk,
        Box::new(move |engine, event| {
            let EngineEvent::FileRecvChunk { friend, file, position, data } = event else {
                return Ok(());
            };
            let mut guard = shared(&chunk_state);
            let Shared { session, problems } = &mut *guard;
            let Some(session) = session.as_mut().filter(|s| s.friend == *friend && s.file == *file) else {
                return Ok(());
            };

            if !data.is_empty() {
                if let Err(violation) = session.append(*position, data) {
                    problems.push(violation);
                }
                return Ok(());
            }

            if !session.is_complete() {
                problems.push(Violation::new(
                    InvariantKind::TransferOffsetBounds,
                    format!("{file} from {friend}: ended at {} of {}", session.offset(), total),
                ));
            } else if session.digest() != expected {
                problems.push(Violation::new(
                    InvariantKind::ContentIntegrity,
                    format!("{file} from {friend}: digest mismatch over {} bytes", session.received()),
                ));
            }
            drop(guard);
            chunk_latches.raise(EventKind::FileRecvChunk, LatchValue::from_event(event));
            engine.file_control(*friend, *file, FileControl::Cancel)?;
            Ok(())
        }),
    );

    let chunk_payload = payload.clone();
    let _requests = sender.capture(
        EventKind::FileChunkRequest,
        Box::new(move |engine, event| {
            let EngineEvent::FileChunkRequest { friend, file, position, length } = event else {
                return Ok(());
            };
            if *friend != target || *length == 0 {
                return Ok(());
            }
            let start = usize::try_from(*position).unwrap_or(usize::MAX);
            let Some(data) = start.checked_add(*length).and_then(|end| chunk_payload.get(start..end)) else {
                return Err(HandlerError::Unexpected(format!("chunk {position}+{length} outside payload")));
            };
            engine.file_send_chunk(*friend, *file, *position, data)?;
            Ok(())
        }),
    );

    let _cancel = sender.capture(
        EventKind::FileRecvControl,
        capture::latching_if(&sender, EventKind::FileRecvControl, move |event| {
            matches!(event, EngineEvent::FileRecvControl { friend, control: FileControl::Cancel, .. } if *friend == target)
        }),
    );

    let policy = fx.wait_policy();
    let sent = fx.waiter(policy)?.retry_call("file_send", || {
        sender
            .with_engine(|e| e.file_send(target, FileKind::Data, total, None, FILENAME.as_bytes()))
            .map(Some)
    });
    let file = match sent {
        RetryOutcome::Succeeded(file) => file,
        RetryOutcome::NotConnected(err) | RetryOutcome::Failed(err) => {
            return Err(engine_error(&sender, "file_send")(err));
        },
        RetryOutcome::TimedOut { rounds } => {
            return Err(ScenarioError::TimedOut {
                peer: sender.name().to_owned(),
                what: "file offer".to_owned(),
                rounds,
            });
        },
    };
    let file_id = sender.with_engine(|e| e.file_id(target, file)).map_err(engine_error(&sender, "file_id"))?;
    tracing::info!(peer = %from, %file, %file_id, total, offset, "file offered");

    let policy = fx.all_peers_policy();
    let outcome = fx.waiter(policy)?.until("file transfer complete", || {
        receiver.is_raised(EventKind::FileRecvChunk) && sender.is_raised(EventKind::FileRecvControl)
    });

    let (session, problems) = {
        let mut guard = shared(&state);
        (guard.session.take(), std::mem::take(&mut guard.problems))
    };
    if let Some(session) = &session {
        fx.record_transfer(session.snapshot(receiver.name()));
    }
    if !problems.is_empty() {
        return Err(Violations(problems).into());
    }
    if let WaitOutcome::TimedOut { rounds } = outcome {
        let progress = session.as_ref().map_or(0, TransferSession::received);
        return Err(ScenarioError::TimedOut {
            peer: receiver.name().to_owned(),
            what: format!("file transfer ({progress} of {} bytes)", total - offset),
            rounds,
        });
    }
    check_invariants(fx)?;

    let session = session.ok_or_else(|| {
        Violation::new(InvariantKind::ContentIntegrity, format!("{}: no transfer session", receiver.name()))
    })?;
    let outcome = TransferOutcome { file, bytes: session.received(), digest: session.digest() };
    tracing::info!(peer = %from, %file, bytes = outcome.bytes, "file transfer verified");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> TransferSession {
        TransferSession::new(FriendId(0), FileNumber(1 << 16), 10, 100)
    }

    #[test]
    fn appends_advance_the_offset() {
        let mut session = session();
        session.append(10, &[0; 40]).unwrap();
        session.append(50, &[0; 50]).unwrap();
        assert!(session.is_complete());
        assert_eq!(session.received(), 90);
        assert_eq!(session.snapshot("bob").offsets, vec![10, 50, 100]);
    }

    #[test]
    fn gap_is_rejected_without_moving() {
        let mut session = session();
        let err = session.append(20, &[0; 5]).unwrap_err();
        assert_eq!(err.invariant, InvariantKind::TransferOffsetBounds);
        assert_eq!(session.offset(), 10);
    }

    #[test]
    fn overrun_is_rejected() {
        let mut session = session();
        assert!(session.append(10, &[0; 91]).is_err());
    }

    #[test]
    fn payload_replays_from_seed() {
        assert_eq!(seeded_payload(3, 64), seeded_payload(3, 64));
        assert_ne!(seeded_payload(3, 64), seeded_payload(4, 64));
        assert_eq!(seeded_payload(3, 1000).len(), 1000);
    }

    #[test]
    fn digest_covers_only_received_bytes() {
        let mut session = session();
        session.append(10, b"tail").unwrap();
        let expected: [u8; 32] = Sha256::digest(b"tail").into();
        assert_eq!(session.digest(), expected);
    }
}
