//! Connection lifecycle with in-flight request tracking.
//!
//! The link state lives in an `ArcSwap` so the dispatcher can read it without
//! locking, and in-flight requests are counted with RAII guards. A watch
//! channel tells pending requests when the connection has gone away.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::watch;

/// State of the bus link, transitioned by the [`LinkController`].
///
/// State machine: Starting -> Ready -> Draining -> Closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Interfaces are being registered; requests are already dispatched.
    Starting,
    /// Registration finished.
    Ready,
    /// New requests are answered with an error while in-flight ones finish.
    Draining,
    /// The connection is gone. No more replies are sent.
    Closed,
}

impl LinkState {
    /// Whether requests arriving in this state are dispatched.
    #[must_use]
    pub fn accepts_requests(self) -> bool {
        matches!(self, Self::Starting | Self::Ready)
    }
}

/// Tracks link state, in-flight requests and the closed signal.
#[derive(Debug)]
pub struct LinkController {
    closed_signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    state: ArcSwap<LinkState>,
    transition: Mutex<()>,
}

impl LinkController {
    /// Creates a controller in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            closed_signal: tx,
            in_flight: Arc::new(AtomicU64::new(0)),
            state: ArcSwap::from_pointee(LinkState::Starting),
            transition: Mutex::new(()),
        }
    }

    /// Moves `Starting` to `Ready`. Later states are left alone.
    pub fn set_ready(&self) {
        let _guard = self.transition.lock();
        if self.state() == LinkState::Starting {
            self.state.store(Arc::new(LinkState::Ready));
        }
    }

    /// Moves to `Draining` unless the link is already closed.
    pub fn begin_drain(&self) {
        let _guard = self.transition.lock();
        if self.state() != LinkState::Closed {
            self.state.store(Arc::new(LinkState::Draining));
        }
    }

    /// Moves to `Closed` and wakes every closed-signal receiver.
    ///
    /// Returns `false` if the link was already closed.
    pub fn mark_closed(&self) -> bool {
        let _guard = self.transition.lock();
        if self.state() == LinkState::Closed {
            return false;
        }
        self.state.store(Arc::new(LinkState::Closed));
        // Receivers may all be gone already.
        let _ = self.closed_signal.send(true);
        true
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        **self.state.load()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == LinkState::Closed
    }

    /// Returns a receiver that flips to `true` when the link closes.
    #[must_use]
    pub fn closed_receiver(&self) -> watch::Receiver<bool> {
        self.closed_signal.subscribe()
    }

    /// Creates an RAII guard that counts one in-flight request.
    ///
    /// The counter is decremented when the guard drops, including during
    /// unwinding.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits for all in-flight requests to finish, up to `timeout`.
    ///
    /// Returns `true` once the counter reaches zero, `false` on timeout.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for LinkController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
