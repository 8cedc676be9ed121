//! Dispatcher lifecycle: admission of new dispatches and draining on shutdown.
//!
//! State lives in an `ArcSwap` so admission checks never lock; in-flight
//! dispatches are counted by RAII guards and the last guard out wakes any
//! drain waiter.

use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Notify;

use crate::dispatch::error::DispatchError;

/// State machine: Running -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Accepting dispatches.
    Running,
    /// Rejecting new dispatches while in-flight ones finish.
    Draining,
    /// Drained; singleton handlers released.
    Stopped,
}

#[derive(Debug)]
pub struct Lifecycle {
    state: ArcSwap<DispatcherState>,
    in_flight: AtomicU64,
    idle: Notify,
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(DispatcherState::Running),
            in_flight: AtomicU64::new(0),
            idle: Notify::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> DispatcherState {
        **self.state.load()
    }

    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Admits one root dispatch.
    ///
    /// # Errors
    ///
    /// `ShuttingDown` once draining has begun.
    pub fn try_enter(self: &Arc<Self>) -> Result<DispatchGuard, DispatchError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = DispatchGuard {
            lifecycle: Arc::clone(self),
        };
        if self.state() == DispatcherState::Running {
            Ok(guard)
        } else {
            Err(DispatchError::ShuttingDown)
        }
    }

    /// Moves Running to Draining. Returns `false` if draining had already begun.
    pub fn begin_drain(&self) -> bool {
        let previous = self.state.rcu(|current| {
            Arc::new(match **current {
                DispatcherState::Running => DispatcherState::Draining,
                other => other,
            })
        });
        *previous == DispatcherState::Running
    }

    /// Waits until no dispatch is in flight, up to `timeout`.
    ///
    /// Returns `true` and moves to Stopped once drained; returns `false` on
    /// timeout, leaving the state unchanged.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let mut idle = pin!(self.idle.notified());
            idle.as_mut().enable();

            if self.in_flight() == 0 {
                self.mark_stopped();
                return true;
            }
            if tokio::time::timeout_at(deadline, idle).await.is_err() {
                let drained = self.in_flight() == 0;
                if drained {
                    self.mark_stopped();
                }
                return drained;
            }
        }
    }

    pub fn mark_stopped(&self) {
        self.state.store(Arc::new(DispatcherState::Stopped));
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts one in-flight dispatch until dropped, including on panic.
#[derive(Debug)]
pub struct DispatchGuard {
    lifecycle: Arc<Lifecycle>,
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        if self.lifecycle.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.lifecycle.idle.notify_waiters();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
