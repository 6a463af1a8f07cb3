//! Background iteration of one peer.
//!
//! An [`IterationDriver`] owns one named OS thread that pumps
//! [`PeerHandle::iterate`] at the interval the engine advertises. Stopping is
//! cooperative: the loop checks a flag at the top of every pass, and
//! [`IterationDriver::stop`] waits on a completion channel with a bounded
//! number of bounded attempts. A thread that does not finish in time is
//! reported as [`StopOutcome::Blocked`] and detached; it keeps its own
//! reference to the peer, so nothing it touches is freed under it.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{error::HarnessError, peer::PeerHandle};

/// Result of [`IterationDriver::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The thread exited and was joined
    Stopped,
    /// The thread did not exit within the join budget and was detached
    Blocked,
}

/// Signals loop exit on drop, including when the loop unwinds.
struct ExitSignal {
    running: Arc<AtomicBool>,
    done: Sender<()>,
}

impl Drop for ExitSignal {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        let _ = self.done.send(());
    }
}

/// Background thread iterating one peer until stopped.
#[derive(Debug)]
pub struct IterationDriver {
    peer: PeerHandle,
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    done: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl IterationDriver {
    /// Spawn the driver thread for `peer`.
    ///
    /// Fails with [`HarnessError::AlreadyDriven`] if another driver owns the
    /// peer.
    pub fn start(peer: &PeerHandle) -> Result<Self, HarnessError> {
        if !peer.claim_driver() {
            return Err(HarnessError::AlreadyDriven { peer: peer.name().to_owned() });
        }

        let stop = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let (done_tx, done) = mpsc::channel();

        let signal = ExitSignal { running: Arc::clone(&running), done: done_tx };
        let thread_peer = peer.clone();
        let thread_stop = Arc::clone(&stop);

        let spawned = thread::Builder::new()
            .name(format!("iterate-{}", peer.name()))
            .spawn(move || run(&thread_peer, &thread_stop, signal));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                peer.release_driver();
                return Err(HarnessError::Spawn { peer: peer.name().to_owned(), source });
            },
        };

        tracing::debug!(peer = %peer.name(), "iteration driver started");
        Ok(Self { peer: peer.clone(), stop, running, done, handle: Some(handle) })
    }

    /// Peer this driver iterates.
    pub fn peer(&self) -> &PeerHandle {
        &self.peer
    }

    /// Whether the loop is still alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the loop to exit and wait up to `joins` attempts of `timeout`.
    ///
    /// Never blocks longer than `joins * timeout` plus one iteration-free
    /// join. Calling it again after it returned is a no-op reporting
    /// [`StopOutcome::Stopped`].
    pub fn stop(&mut self, timeout: Duration, joins: u32) -> StopOutcome {
        let Some(handle) = self.handle.take() else {
            return StopOutcome::Stopped;
        };
        self.stop.store(true, Ordering::Release);

        for attempt in 1..=joins.max(1) {
            match self.done.recv_timeout(timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if handle.join().is_err() {
                        tracing::warn!(peer = %self.peer.name(), "iteration thread panicked");
                    }
                    self.peer.release_driver();
                    tracing::debug!(peer = %self.peer.name(), attempt, "iteration driver stopped");
                    return StopOutcome::Stopped;
                },
                Err(RecvTimeoutError::Timeout) => {
                    tracing::debug!(peer = %self.peer.name(), attempt, "iteration driver still running");
                },
            }
        }

        tracing::warn!(
            peer = %self.peer.name(),
            joins,
            timeout_ms = timeout.as_millis() as u64,
            "iteration driver BLOCKED, detaching"
        );
        StopOutcome::Blocked
    }
}

impl Drop for IterationDriver {
    fn drop(&mut self) {
        if self.handle.is_some() {
            // Not stopped explicitly: ask the loop to exit and detach.
            self.stop.store(true, Ordering::Release);
        }
    }
}

fn run(peer: &PeerHandle, stop: &AtomicBool, signal: ExitSignal) {
    let span = tracing::debug_span!("iterate", peer = %peer.name());
    span.in_scope(|| {
        while !stop.load(Ordering::Acquire) {
            peer.iterate();
            thread::sleep(peer.iteration_interval());
        }
    });
    drop(signal);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        coverage::CoverageLog,
        sim::{SimConfig, SimNetwork},
    };
    use duet_core::{EngineFactory, EngineOptions};

    fn peer(network: &SimNetwork, name: &str) -> PeerHandle {
        let engine = network.create(name, &EngineOptions::default()).unwrap();
        PeerHandle::new(name, engine, CoverageLog::new())
    }

    #[test]
    fn second_driver_is_refused() {
        let network = SimNetwork::new(SimConfig::fast(1));
        let bob = peer(&network, "bob");

        let mut first = IterationDriver::start(&bob).unwrap();
        let second = IterationDriver::start(&bob);
        assert!(matches!(second, Err(HarnessError::AlreadyDriven { .. })));

        assert_eq!(first.stop(Duration::from_secs(1), 3), StopOutcome::Stopped);
        assert!(!bob.is_driven());

        let mut third = IterationDriver::start(&bob).unwrap();
        assert_eq!(third.stop(Duration::from_secs(1), 3), StopOutcome::Stopped);
    }

    #[test]
    fn stop_is_idempotent() {
        let network = SimNetwork::new(SimConfig::fast(2));
        let bob = peer(&network, "bob");

        let mut driver = IterationDriver::start(&bob).unwrap();
        assert!(driver.is_running());
        assert_eq!(driver.stop(Duration::from_secs(1), 1), StopOutcome::Stopped);
        assert!(!driver.is_running());
        assert_eq!(driver.stop(Duration::from_secs(1), 1), StopOutcome::Stopped);
    }
}
