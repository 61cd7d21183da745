//! Single-slot availability gate for the display.
//!
//! The dispatch path waits for the gate to be free before sending a
//! batch; link feedback (or the guess timer) frees it again. At most
//! one batch is considered on screen at any time.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A two-state flag with waiters on both transitions.
///
/// `mark_busy` and `mark_free` are idempotent: only an actual state
/// flip wakes the waiters of that transition. Waiters registered at the
/// moment of the flip are all woken; waiters arriving afterwards see
/// the new state immediately.
#[derive(Debug)]
pub struct AvailabilityGate {
    free: AtomicBool,
    freed: Notify,
    occupied: Notify,
}

impl AvailabilityGate {
    /// Create a gate, initially free.
    #[must_use]
    pub fn new() -> Self {
        Self {
            free: AtomicBool::new(true),
            freed: Notify::new(),
            occupied: Notify::new(),
        }
    }

    /// Whether nothing is currently considered on screen.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.free.load(Ordering::Acquire)
    }

    /// Mark the display occupied. No-op when already occupied.
    pub fn mark_busy(&self) {
        if self.free.swap(false, Ordering::AcqRel) {
            self.occupied.notify_waiters();
        }
    }

    /// Mark the display free. No-op when already free.
    pub fn mark_free(&self) {
        if !self.free.swap(true, Ordering::AcqRel) {
            self.freed.notify_waiters();
        }
    }

    /// Wait until the display is free. Returns immediately if it is.
    pub async fn wait_free(&self) {
        loop {
            // Register before checking, so a flip between the check and
            // the await cannot be missed.
            let freed = self.freed.notified();
            if self.is_free() {
                return;
            }
            freed.await;
        }
    }

    /// Wait until the display is occupied. Returns immediately if it is.
    pub async fn wait_busy(&self) {
        loop {
            let occupied = self.occupied.notified();
            if !self.is_free() {
                return;
            }
            occupied.await;
        }
    }
}

impl Default for AvailabilityGate {
    fn default() -> Self {
        Self::new()
    }
}
