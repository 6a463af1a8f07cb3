//! One peer under test.
//!
//! A [`PeerHandle`] is a cheap, cloneable reference to an engine plus the
//! harness state attached to it: the latch board, the handler table and the
//! "driven" claim an [`IterationDriver`](crate::driver::IterationDriver)
//! holds.
//!
//! # Locking
//!
//! The engine sits behind one mutex. [`PeerHandle::iterate`] holds it while
//! dispatching callbacks, so handler invocations for one peer never overlap
//! and a handler can drive the engine through the `&mut dyn ProtocolEngine`
//! it receives. Latches and handlers have their own locks; the lock order is
//! engine, then handlers, then latches.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, TryLockError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use duet_core::{
    Address, ConnectionStatus, EngineEvent, EventKind, FriendId, ProtocolEngine, PublicKey,
};

use crate::{
    capture::{Handler, LatchValue, Latches, Registration},
    coverage::{CoverageLog, RecordingEngine},
};

struct Slot {
    generation: u64,
    handler: Handler,
}

#[derive(Default)]
struct HandlerTable {
    slots: [Option<Slot>; EventKind::COUNT],
}

struct PeerInner {
    name: String,
    engine: Mutex<RecordingEngine>,
    handlers: Mutex<HandlerTable>,
    latches: Latches,
    generation: AtomicU64,
    driven: AtomicBool,
}

/// Shared handle to one engine under test.
#[derive(Clone)]
pub struct PeerHandle {
    inner: Arc<PeerInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn try_lock<T>(mutex: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    match mutex.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

impl PeerHandle {
    /// Wrap `engine`, recording its calls into `log`.
    pub fn new(name: impl Into<String>, engine: Box<dyn ProtocolEngine>, log: CoverageLog) -> Self {
        Self {
            inner: Arc::new(PeerInner {
                name: name.into(),
                engine: Mutex::new(RecordingEngine::new(engine, log)),
                handlers: Mutex::new(HandlerTable::default()),
                latches: Latches::new(),
                generation: AtomicU64::new(0),
                driven: AtomicBool::new(false),
            }),
        }
    }

    /// Peer name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Run `f` with exclusive access to the engine.
    ///
    /// Blocks while the peer is being iterated. Must not be called from a
    /// handler of the same peer.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut dyn ProtocolEngine) -> R) -> R {
        let mut engine = lock(&self.inner.engine);
        f(&mut *engine)
    }

    /// Like [`with_engine`](Self::with_engine), but returns `None` instead of
    /// waiting when the engine is busy.
    pub fn try_with_engine<R>(&self, f: impl FnOnce(&mut dyn ProtocolEngine) -> R) -> Option<R> {
        let mut engine = try_lock(&self.inner.engine)?;
        Some(f(&mut *engine))
    }

    /// Process pending events once and dispatch them to handlers.
    ///
    /// Returns the number of events the engine reported. Handler errors and
    /// panics are logged and swallowed here.
    pub fn iterate(&self) -> usize {
        let mut engine = lock(&self.inner.engine);
        let events = engine.iterate();
        if events.is_empty() {
            return 0;
        }

        let mut handlers = lock(&self.inner.handlers);
        for event in &events {
            let kind = event.kind();
            let Some(slot) = handlers.slots[kind.index()].as_mut() else {
                tracing::trace!(peer = %self.inner.name, ?kind, "no handler");
                continue;
            };
            engine.log().event(kind);
            self.dispatch(&mut *engine, slot, event);
        }
        events.len()
    }

    fn dispatch(&self, engine: &mut dyn ProtocolEngine, slot: &mut Slot, event: &EngineEvent) {
        let kind = event.kind();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (slot.handler)(engine, event)));
        match outcome {
            Ok(Ok(())) => {},
            Ok(Err(err)) => {
                tracing::warn!(peer = %self.inner.name, ?kind, error = %err, "handler failed");
            },
            Err(payload) => {
                tracing::warn!(
                    peer = %self.inner.name,
                    ?kind,
                    panic = panic_message(payload.as_ref()),
                    "handler panicked"
                );
            },
        }
    }

    /// How long a driver sleeps between iterations of this peer.
    pub fn iteration_interval(&self) -> Duration {
        self.with_engine(|e| e.iteration_interval())
    }

    /// Current address.
    pub fn address(&self) -> Address {
        self.with_engine(|e| e.address())
    }

    /// Long-term public key.
    pub fn public_key(&self) -> PublicKey {
        self.with_engine(|e| e.public_key())
    }

    /// Own connection status, straight from the engine.
    pub fn self_connection_status(&self) -> ConnectionStatus {
        self.with_engine(|e| e.self_connection_status())
    }

    /// Whether `friend` is a valid id on this peer.
    pub fn friend_exists(&self, friend: FriendId) -> bool {
        self.with_engine(|e| e.friend_exists(friend))
    }

    /// Install `handler` for `kind`, replacing any previous one.
    ///
    /// The handler stays until [`unregister`](Self::unregister) or another
    /// registration for the same kind.
    pub fn register(&self, kind: EventKind, handler: Handler) {
        let _ = self.install(kind, handler);
    }

    /// Install `handler` for `kind` for the lifetime of the returned guard.
    pub fn capture(&self, kind: EventKind, handler: Handler) -> Registration {
        let generation = self.install(kind, handler);
        Registration::new(self.clone(), kind, generation)
    }

    fn install(&self, kind: EventKind, handler: Handler) -> u64 {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.handlers).slots[kind.index()] = Some(Slot { generation, handler });
        generation
    }

    /// Remove the handler for `kind`, if any.
    pub fn unregister(&self, kind: EventKind) {
        lock(&self.inner.handlers).slots[kind.index()] = None;
    }

    pub(crate) fn unregister_generation(&self, kind: EventKind, generation: u64) {
        let mut handlers = lock(&self.inner.handlers);
        let slot = &mut handlers.slots[kind.index()];
        if slot.as_ref().is_some_and(|s| s.generation == generation) {
            *slot = None;
        }
    }

    /// Whether a handler is installed for `kind`.
    pub fn has_handler(&self, kind: EventKind) -> bool {
        lock(&self.inner.handlers).slots[kind.index()].is_some()
    }

    /// Shared latch board of this peer.
    pub fn latches(&self) -> Latches {
        self.inner.latches.clone()
    }

    /// Value latched for `kind`, if raised.
    pub fn latch(&self, kind: EventKind) -> Option<LatchValue> {
        self.inner.latches.get(kind)
    }

    /// Whether `kind` is latched.
    pub fn is_raised(&self, kind: EventKind) -> bool {
        self.inner.latches.is_raised(kind)
    }

    /// Lower the latch for `kind`.
    pub fn reset_latch(&self, kind: EventKind) {
        self.inner.latches.reset(kind);
    }

    pub(crate) fn claim_driver(&self) -> bool {
        self.inner
            .driven
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_driver(&self) {
        self.inner.driven.store(false, Ordering::Release);
    }

    /// Whether an iteration driver currently owns this peer.
    pub fn is_driven(&self) -> bool {
        self.inner.driven.load(Ordering::Acquire)
    }

    /// Drop every handler so their captured state is released.
    pub(crate) fn clear_handlers(&self) {
        *lock(&self.inner.handlers) = HandlerTable::default();
    }

    /// [`clear_handlers`](Self::clear_handlers) without waiting. Returns
    /// false when a dispatch holds the table.
    pub(crate) fn try_clear_handlers(&self) -> bool {
        match try_lock(&self.inner.handlers) {
            Some(mut handlers) => {
                *handlers = HandlerTable::default();
                true
            },
            None => false,
        }
    }

    /// Remove and return the handler for `kind`.
    pub(crate) fn take_handler(&self, kind: EventKind) -> Option<Handler> {
        lock(&self.inner.handlers).slots[kind.index()].take().map(|slot| slot.handler)
    }

    /// Install `handler` unless another one took the slot meanwhile.
    pub(crate) fn restore_handler(&self, kind: EventKind, handler: Handler) -> bool {
        let mut handlers = lock(&self.inner.handlers);
        let slot = &mut handlers.slots[kind.index()];
        if slot.is_some() {
            return false;
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        *slot = Some(Slot { generation, handler });
        true
    }
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerHandle")
            .field("name", &self.inner.name)
            .field("driven", &self.is_driven())
            .finish_non_exhaustive()
    }
}
